//! Reference rebinding: normalize member references to their true definer.
//!
//! Bytecode emitters are allowed to reference a member through any ancestor
//! of its defining class. Downstream passes that key safety off "is this
//! reference's target concrete" need references to name the class that
//! actually holds the definition, so this pass rewrites every rebindable
//! reference to the lowest concretely-defining class found on the superclass
//! walk. References that already point at their definer, or whose definer is
//! not in the loaded program, are left untouched.
//!
//! Not every reference is rebindable: `invoke-super` and `invoke-interface`
//! dispatch relative to the call site, and `invoke-direct` is already exact,
//! so only static and virtual invokes plus the four field access kinds are
//! touched.

use std::collections::HashMap;

use rayon::prelude::*;
use tracing::trace;

use crate::config::Configuration;
use crate::ir::class::DexClass;
use crate::ir::context::{DexContext, FieldId, MethodId};
use crate::ir::instruction::{Instruction, InvokeKind};
use crate::ir::store::{program_classes, program_classes_mut, DexStore, ProgramIndex};
use crate::passes::{Pass, PassStats};
use crate::Result;

/// Rewrites member references to point at the most specific concretely-
/// defining class.
pub struct ReBindRefsPass;

impl Default for ReBindRefsPass {
    fn default() -> Self {
        Self::new()
    }
}

impl ReBindRefsPass {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// One planned reference replacement inside a method body.
#[derive(Debug, Clone, Copy)]
enum Rewrite {
    Field(FieldId),
    Method(MethodId),
}

impl Pass for ReBindRefsPass {
    fn name(&self) -> &'static str {
        "ReBindRefsPass"
    }

    fn description(&self) -> &'static str {
        "Rebinds member references to their lowest concretely-defining class"
    }

    fn run(
        &self,
        stores: &mut [DexStore],
        ctx: &DexContext,
        _config: &Configuration,
    ) -> Result<PassStats> {
        let index = ProgramIndex::build(stores, ctx)?;

        // Plan with shared borrows only, one unit of work per class; apply
        // afterwards. Nothing mutates while the index is being consulted.
        let classes: Vec<&DexClass> = program_classes(stores).collect();
        let plan: HashMap<MethodId, Vec<(usize, Rewrite)>> = classes
            .par_iter()
            .flat_map_iter(|&class| plan_class(class, stores, ctx, &index))
            .collect();

        let mut stats = PassStats::default();
        for class in program_classes_mut(stores) {
            for method in class.all_methods_mut() {
                let Some(rewrites) = plan.get(&method.id) else {
                    continue;
                };
                let Some(code) = method.code.as_mut() else {
                    continue;
                };
                for &(idx, rewrite) in rewrites {
                    match rewrite {
                        Rewrite::Field(new_field) => code.instructions[idx].rebind_field(new_field),
                        Rewrite::Method(new_method) => {
                            code.instructions[idx].rebind_method(new_method);
                        }
                    }
                    stats.refs_rebound += 1;
                }
            }
        }
        Ok(stats)
    }
}

/// Plans the rewrites for every method of one class.
fn plan_class(
    class: &DexClass,
    stores: &[DexStore],
    ctx: &DexContext,
    index: &ProgramIndex,
) -> Vec<(MethodId, Vec<(usize, Rewrite)>)> {
    let mut out = Vec::new();
    for method in class.all_methods() {
        let Some(code) = method.code.as_ref() else {
            continue;
        };
        let mut rewrites = Vec::new();
        for (idx, instr) in code.instructions.iter().enumerate() {
            if let Some(rewrite) = plan_instruction(instr, stores, ctx, index) {
                trace!(
                    method = %ctx.show_method(method.id),
                    instruction = %instr.show(ctx),
                    "rebinding reference"
                );
                rewrites.push((idx, rewrite));
            }
        }
        if !rewrites.is_empty() {
            out.push((method.id, rewrites));
        }
    }
    out
}

fn plan_instruction(
    instr: &Instruction,
    stores: &[DexStore],
    ctx: &DexContext,
    index: &ProgramIndex,
) -> Option<Rewrite> {
    match instr {
        Instruction::Invoke {
            kind: InvokeKind::Static | InvokeKind::Virtual,
            method,
            ..
        } => {
            let resolved = index.resolve_method(stores, ctx, *method)?;
            if resolved == *method {
                return None;
            }
            // The resolved definition must live in the list the invoke kind
            // dispatches through, otherwise the reference stays as emitted.
            let mref = ctx.method(resolved)?;
            let definer = index.class(stores, mref.class)?;
            let list_matches = match instr {
                Instruction::Invoke {
                    kind: InvokeKind::Static,
                    ..
                } => definer.direct_methods.iter().any(|m| m.id == resolved),
                _ => definer.virtual_methods.iter().any(|m| m.id == resolved),
            };
            list_matches.then_some(Rewrite::Method(resolved))
        }
        Instruction::StaticGet { field, .. } | Instruction::StaticPut { field, .. } => {
            rebind_field(stores, ctx, index, *field, true)
        }
        Instruction::InstanceGet { field, .. } | Instruction::InstancePut { field, .. } => {
            rebind_field(stores, ctx, index, *field, false)
        }
        _ => None,
    }
}

fn rebind_field(
    stores: &[DexStore],
    ctx: &DexContext,
    index: &ProgramIndex,
    field: FieldId,
    want_static: bool,
) -> Option<Rewrite> {
    let resolved = index.resolve_field(stores, ctx, field)?;
    if resolved == field {
        return None;
    }
    let fref = ctx.field(resolved)?;
    let definer = index.class(stores, fref.class)?;
    let list = if want_static {
        &definer.static_fields
    } else {
        &definer.instance_fields
    };
    list.iter()
        .any(|f| f.id == resolved)
        .then_some(Rewrite::Field(resolved))
}
