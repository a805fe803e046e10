//! Dead code elimination within a single method body.
//!
//! Runs a backward register-liveness analysis over each body's control flow
//! graph and deletes every instruction that neither has an observable effect
//! nor defines a register some later instruction reads. This is the cleanup
//! stage after accessor elimination: rewritten call sites routinely leave
//! behind argument-materializing `const`s that nothing consumes anymore.
//!
//! The analysis is per-method and register-based, no heap or inter-procedural
//! reasoning. Anything with a side effect ([`Instruction::has_side_effects`])
//! is pinned: invokes, field and array writes, returns, throws, branches,
//! monitor operations, allocations, and instructions that can trap. Exception
//! edges are handled conservatively: every block overlapping a try region is
//! given the handler as a successor, so values a handler reads stay live
//! throughout the region.
//!
//! Methods are independent, so bodies are processed in parallel.

use std::collections::HashSet;

use rayon::prelude::*;

use crate::config::Configuration;
use crate::ir::class::MethodCode;
use crate::ir::context::DexContext;
use crate::ir::instruction::Instruction;
use crate::ir::store::{program_classes_mut, DexStore};
use crate::passes::{Pass, PassStats};
use crate::Result;

/// Removes instructions whose values are never observed.
pub struct LocalDcePass;

impl Default for LocalDcePass {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalDcePass {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Pass for LocalDcePass {
    fn name(&self) -> &'static str {
        "LocalDcePass"
    }

    fn description(&self) -> &'static str {
        "Deletes instructions with no observable effect"
    }

    fn run(
        &self,
        stores: &mut [DexStore],
        _ctx: &DexContext,
        _config: &Configuration,
    ) -> Result<PassStats> {
        let bodies: Vec<&mut MethodCode> = program_classes_mut(stores)
            .flat_map(|class| class.all_methods_mut())
            .filter_map(|method| method.code.as_mut())
            .collect();

        let mut stats = PassStats::default();
        stats.instructions_removed = bodies.into_par_iter().map(dce_body).sum();
        Ok(stats)
    }
}

/// Eliminates dead instructions from one body until nothing changes, and
/// returns how many were removed.
fn dce_body(code: &mut MethodCode) -> usize {
    let mut removed = 0;
    loop {
        let dead = find_dead(code);
        if dead.is_empty() {
            return removed;
        }
        removed += dead.len();
        code.remove_instructions(&dead);
    }
}

/// One round of liveness analysis, returning the sorted indices of dead
/// instructions.
fn find_dead(code: &MethodCode) -> Vec<usize> {
    let instructions = &code.instructions;
    if instructions.is_empty() {
        return Vec::new();
    }

    let blocks = split_blocks(code);
    let successors = block_successors(code, &blocks);

    // Backward dataflow to a fixpoint: a block's live-out is the union of its
    // successors' live-in.
    let mut live_in: Vec<HashSet<u16>> = vec![HashSet::new(); blocks.len()];
    loop {
        let mut changed = false;
        for b in (0..blocks.len()).rev() {
            let live_out = merged_live_out(&successors[b], &live_in);
            let computed = block_live_in(instructions, &blocks[b], live_out);
            if computed != live_in[b] {
                live_in[b] = computed;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // Marking pass: walk each block backward from its stable live-out and
    // collect what the transfer function would drop.
    let mut dead = Vec::new();
    for (b, block) in blocks.iter().enumerate() {
        let mut live = merged_live_out(&successors[b], &live_in);
        for i in block.clone().rev() {
            let instr = &instructions[i];
            if is_live(instr, &live) {
                if let Some(dst) = instr.def() {
                    live.remove(&dst);
                }
                live.extend(instr.uses());
            } else {
                dead.push(i);
            }
        }
    }
    dead.sort_unstable();
    dead
}

fn is_live(instr: &Instruction, live: &HashSet<u16>) -> bool {
    instr.has_side_effects() || instr.def().is_some_and(|dst| live.contains(&dst))
}

/// Splits the body into basic blocks, each a half-open index range.
///
/// Leaders are the entry, every branch target, every instruction after a
/// branch or terminator, and every exception handler entry.
fn split_blocks(code: &MethodCode) -> Vec<std::ops::Range<usize>> {
    let instructions = &code.instructions;
    let mut leaders: Vec<usize> = vec![0];
    for (i, instr) in instructions.iter().enumerate() {
        if let Some(target) = instr.branch_target() {
            leaders.push(target as usize);
            leaders.push(i + 1);
        } else if is_terminator(instr) {
            leaders.push(i + 1);
        }
    }
    for region in &code.tries {
        leaders.push(region.handler as usize);
    }
    leaders.retain(|&l| l < instructions.len());
    leaders.sort_unstable();
    leaders.dedup();

    leaders
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = leaders.get(n + 1).copied().unwrap_or(instructions.len());
            start..end
        })
        .collect()
}

fn is_terminator(instr: &Instruction) -> bool {
    matches!(
        instr,
        Instruction::Return { .. } | Instruction::ReturnVoid | Instruction::Throw { .. }
    )
}

fn block_successors(
    code: &MethodCode,
    blocks: &[std::ops::Range<usize>],
) -> Vec<Vec<usize>> {
    let instructions = &code.instructions;
    let block_of = |index: usize| -> usize {
        blocks.partition_point(|b| b.start <= index).saturating_sub(1)
    };

    let mut successors: Vec<Vec<usize>> = Vec::with_capacity(blocks.len());
    for (b, block) in blocks.iter().enumerate() {
        let mut succ = Vec::new();
        let last = &instructions[block.end - 1];
        match last.branch_target() {
            Some(target) => {
                succ.push(block_of(target as usize));
                // Conditional branches fall through as well.
                if !matches!(last, Instruction::Goto { .. }) && b + 1 < blocks.len() {
                    succ.push(b + 1);
                }
            }
            None if is_terminator(last) => {}
            None => {
                if b + 1 < blocks.len() {
                    succ.push(b + 1);
                }
            }
        }
        successors.push(succ);
    }

    // Any block inside a try region may transfer to its handler at any
    // instruction.
    for region in &code.tries {
        let (start, end) = (region.start as usize, region.end as usize);
        let handler = block_of(region.handler as usize);
        for (b, block) in blocks.iter().enumerate() {
            if block.start < end && block.end > start && !successors[b].contains(&handler) {
                successors[b].push(handler);
            }
        }
    }
    successors
}

fn merged_live_out(successors: &[usize], live_in: &[HashSet<u16>]) -> HashSet<u16> {
    let mut out = HashSet::new();
    for &s in successors {
        out.extend(live_in[s].iter().copied());
    }
    out
}

/// The backward transfer function for one block.
fn block_live_in(
    instructions: &[Instruction],
    block: &std::ops::Range<usize>,
    mut live: HashSet<u16>,
) -> HashSet<u16> {
    for i in block.clone().rev() {
        let instr = &instructions[i];
        if is_live(instr, &live) {
            if let Some(dst) = instr.def() {
                live.remove(&dst);
            }
            live.extend(instr.uses());
        }
    }
    live
}

#[cfg(test)]
mod tests {
    use super::{dce_body, LocalDcePass};
    use crate::config::Configuration;
    use crate::ir::access::AccessFlags;
    use crate::ir::builder::ClassBuilder;
    use crate::ir::context::DexContext;
    use crate::ir::instruction::{IfCond, Instruction, InvokeKind};
    use crate::ir::store::DexStore;
    use crate::passes::Pass;

    fn body_of(
        ctx: &DexContext,
        build: impl FnOnce(&mut crate::ir::builder::MethodBuilder),
    ) -> crate::ir::class::MethodCode {
        let class = ClassBuilder::new(ctx, "LScratch;")
            .direct_method("work", &[], "V", AccessFlags::STATIC, build)
            .build();
        class.direct_methods[0].code.clone().unwrap()
    }

    #[test]
    fn test_unused_const_is_removed() {
        let ctx = DexContext::new();
        let mut code = body_of(&ctx, |m| {
            m.registers(2, 0);
            let x = m.field("LScratch;", "x", "I");
            m.const_(0, 7);
            m.const_(1, 9);
            m.sput(1, x);
            m.ret_void();
        });
        assert_eq!(dce_body(&mut code), 1);
        assert_eq!(
            code.instructions,
            vec![
                Instruction::Const { dst: 1, value: 9 },
                Instruction::StaticPut {
                    src: 1,
                    field: ctx.intern_field(
                        ctx.intern_type("LScratch;"),
                        ctx.intern_string("x"),
                        ctx.intern_type("I"),
                    ),
                },
                Instruction::ReturnVoid,
            ]
        );
    }

    #[test]
    fn test_dead_copy_chain_is_removed_transitively() {
        let ctx = DexContext::new();
        let mut code = body_of(&ctx, |m| {
            m.registers(2, 0);
            m.const_(0, 1);
            m.instr(Instruction::Move { dst: 1, src: 0 });
            m.ret_void();
        });
        assert_eq!(dce_body(&mut code), 2);
        assert_eq!(code.instructions, vec![Instruction::ReturnVoid]);
    }

    #[test]
    fn test_invoke_is_pinned_but_unused_result_capture_is_not() {
        let ctx = DexContext::new();
        let mut code = body_of(&ctx, |m| {
            m.registers(1, 0);
            let callee = m.method("LScratch;", "compute", &[], "I");
            m.invoke(InvokeKind::Static, callee, &[]);
            m.move_result(0);
            m.ret_void();
        });
        assert_eq!(dce_body(&mut code), 1);
        assert!(matches!(code.instructions[0], Instruction::Invoke { .. }));
        assert!(matches!(code.instructions[1], Instruction::ReturnVoid));
    }

    #[test]
    fn test_value_used_on_one_branch_arm_stays_live() {
        let ctx = DexContext::new();
        let mut code = body_of(&ctx, |m| {
            m.registers(2, 0);
            let x = m.field("LScratch;", "x", "I");
            m.const_(0, 5);
            m.const_(1, 0);
            m.instr(Instruction::IfZ {
                cond: IfCond::Eq,
                a: 1,
                target: 4,
            });
            m.sput(0, x);
            m.ret_void();
        });
        // Register 0 reaches the store on the fall-through arm.
        assert_eq!(dce_body(&mut code), 0);
    }

    #[test]
    fn test_branch_targets_shift_after_removal() {
        let ctx = DexContext::new();
        let mut code = body_of(&ctx, |m| {
            m.registers(2, 0);
            let x = m.field("LScratch;", "x", "I");
            m.const_(0, 1); // dead
            m.instr(Instruction::Goto { target: 3 });
            m.const_(1, 2); // unreachable but harmless filler, target sits past it
            m.sput(1, x);
            m.ret_void();
        });
        // The dead const before the goto goes away and the target shifts
        // with it.
        dce_body(&mut code);
        let goto_at = code
            .instructions
            .iter()
            .position(|i| matches!(i, Instruction::Goto { .. }))
            .unwrap();
        assert_eq!(goto_at, 0);
        assert_eq!(code.instructions[0], Instruction::Goto { target: 2 });
        assert!(matches!(
            code.instructions[2],
            Instruction::StaticPut { .. }
        ));
    }

    #[test]
    fn test_value_read_by_exception_handler_stays_live() {
        let ctx = DexContext::new();
        let mut code = body_of(&ctx, |m| {
            m.registers(3, 0);
            let callee = m.method("LScratch;", "mayThrow", &[], "V");
            let x = m.field("LScratch;", "x", "I");
            m.const_(0, 42);
            m.invoke(InvokeKind::Static, callee, &[]);
            m.ret_void();
            // Handler stores the value materialized before the try region.
            m.instr(Instruction::MoveException { dst: 2 });
            m.sput(0, x);
            m.ret_void();
            m.try_block(1, 2, 3);
        });
        assert_eq!(dce_body(&mut code), 0);
    }

    #[test]
    fn test_pass_counts_removals_across_methods() {
        let ctx = DexContext::new();
        let class = ClassBuilder::new(&ctx, "LScratch;")
            .direct_method("a", &[], "V", AccessFlags::STATIC, |m| {
                m.registers(1, 0);
                m.const_(0, 1);
                m.ret_void();
            })
            .direct_method("b", &[], "V", AccessFlags::STATIC, |m| {
                m.registers(1, 0);
                m.const_(0, 2);
                m.ret_void();
            })
            .build();
        let mut store = DexStore::new("classes");
        store.add_classes(vec![class]);
        let mut stores = vec![store];

        let stats = LocalDcePass::new()
            .run(&mut stores, &ctx, &Configuration::empty())
            .unwrap();
        assert_eq!(stats.instructions_removed, 2);
    }
}
