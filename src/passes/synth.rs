//! Synthetic accessor elimination.
//!
//! Front-end compilers insert wrapper methods (`access$000` and friends) so a
//! nested type can reach a private member of its enclosing type. Each wrapper
//! is pure dispatch overhead: one member access forwarding the wrapper's
//! parameters, then a return. This pass finds them, proves the access safe to
//! inline, rewrites every call site into the direct field get/put or invoke,
//! and deletes the wrappers nothing references anymore.
//!
//! # Safety
//!
//! The crux is the concreteness proof: a wrapper is only eliminated when the
//! member it forwards to is *concrete* - defined, unambiguously, by the class
//! its (rebound) reference names, inside the loaded program. A target defined
//! in another compilation unit, or resolvable to more than one definition,
//! cannot be proven safe, so such wrappers are skipped and survive the
//! pipeline untouched. Skips are traced, never errors.
//!
//! # Rewrite shape
//!
//! Call-site registers map onto the replacement operand-for-operand: the
//! wrapper's argument registers become the replacement's operand registers in
//! the same order, and a following `move-result` becomes the destination of
//! the direct access. Wrapper deletion is deferred until every call site in
//! the program has been rewritten, and only wrappers with zero remaining
//! references are deleted - re-running the pass on a clean program is a
//! no-op.
//!
//! Accessors can forward to other accessors, so the pass repeats its
//! scan-rewrite-delete round until a round changes nothing (bounded by
//! [`SynthConfig::max_rounds`]).

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use serde::Deserialize;
use tracing::debug;

use crate::config::Configuration;
use crate::ir::class::{DexClass, MethodCode, MethodDef};
use crate::ir::context::{DexContext, FieldId, MethodId};
use crate::ir::instruction::{Instruction, InvokeKind};
use crate::ir::store::{program_classes, program_classes_mut, DexStore, ProgramIndex};
use crate::passes::{Pass, PassStats};
use crate::{Error, Result};

/// Options for [`SynthPass`], read from the `"SynthPass"` section of the
/// configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// Upper bound on scan-rewrite-delete rounds. Each round can expose new
    /// wrappers (accessors forwarding to accessors), so the pass loops until
    /// stable or until this bound.
    pub max_rounds: usize,
    /// When set, a wrapper target that provably points above its true definer
    /// is reported as a configuration error instead of being skipped -
    /// catching the "forgot to run ReBindRefsPass first" misordering.
    pub require_rebound: bool,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            require_rebound: false,
        }
    }
}

/// Eliminates compiler-synthesized accessor wrappers.
pub struct SynthPass;

impl Default for SynthPass {
    fn default() -> Self {
        Self::new()
    }
}

impl SynthPass {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// What a recognized wrapper body forwards to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WrapperKind {
    /// `sget` + return.
    StaticGetter { field: FieldId },
    /// `iget` of the first parameter + return.
    InstanceGetter { field: FieldId },
    /// `sput` of the first parameter, then void or value return.
    StaticSetter { field: FieldId, returns_value: bool },
    /// `iput` of the second parameter into the first, then void or value
    /// return.
    InstanceSetter { field: FieldId, returns_value: bool },
    /// A single invoke forwarding every parameter in order.
    MethodForward { target: MethodId, dispatch: InvokeKind },
}

/// One planned call-site replacement: `len` instructions starting at `start`
/// become `replacement`.
#[derive(Debug, Clone)]
struct Edit {
    start: usize,
    len: usize,
    replacement: Vec<Instruction>,
}

impl Pass for SynthPass {
    fn name(&self) -> &'static str {
        "SynthPass"
    }

    fn description(&self) -> &'static str {
        "Replaces synthetic accessor calls with direct member accesses"
    }

    fn run(
        &self,
        stores: &mut [DexStore],
        ctx: &DexContext,
        config: &Configuration,
    ) -> Result<PassStats> {
        let options: SynthConfig = config.pass_options(self.name())?;

        let mut stats = PassStats::default();
        for _round in 0..options.max_rounds.max(1) {
            let round = run_round(stores, ctx, &options)?;
            stats.merge(&round);
            if !round.changed() {
                break;
            }
        }
        Ok(stats)
    }
}

fn run_round(
    stores: &mut [DexStore],
    ctx: &DexContext,
    options: &SynthConfig,
) -> Result<PassStats> {
    let index = ProgramIndex::build(stores, ctx)?;
    let mut stats = PassStats::default();

    // Scan: every direct method that looks like a wrapper and whose target
    // passes the concreteness proof.
    let mut wrappers: HashMap<MethodId, WrapperKind> = HashMap::new();
    for class in program_classes(stores) {
        for method in &class.direct_methods {
            let Some(kind) = detect_wrapper(method) else {
                continue;
            };
            if is_safe_target(kind, method.id, stores, ctx, &index, options)? {
                wrappers.insert(method.id, kind);
            }
        }
    }
    if wrappers.is_empty() {
        return Ok(stats);
    }

    // Plan call-site rewrites with shared borrows only.
    let classes: Vec<&DexClass> = program_classes(stores).collect();
    let plans: HashMap<MethodId, Vec<Edit>> = classes
        .par_iter()
        .flat_map_iter(|class| {
            class.all_methods().filter_map(|method| {
                let code = method.code.as_ref()?;
                let edits = plan_call_sites(code, &wrappers);
                (!edits.is_empty()).then(|| (method.id, edits))
            })
        })
        .collect();

    // Apply.
    for class in program_classes_mut(stores) {
        for method in class.all_methods_mut() {
            let Some(edits) = plans.get(&method.id) else {
                continue;
            };
            if let Some(code) = method.code.as_mut() {
                stats.call_sites_rewritten += edits.len();
                apply_edits(code, edits);
            }
        }
    }

    // Delete wrappers nothing references anymore. Deletion is deferred to
    // this point so no rewrite can observe a half-removed method.
    let mut still_referenced: HashSet<MethodId> = HashSet::new();
    for class in program_classes(stores) {
        for method in class.all_methods() {
            let Some(code) = method.code.as_ref() else {
                continue;
            };
            for instr in &code.instructions {
                if let Some(target) = instr.method_ref() {
                    if wrappers.contains_key(&target) {
                        still_referenced.insert(target);
                    }
                }
            }
        }
    }
    for class in program_classes_mut(stores) {
        let doomed: Vec<MethodId> = class
            .direct_methods
            .iter()
            .filter(|m| wrappers.contains_key(&m.id) && !still_referenced.contains(&m.id))
            .map(|m| m.id)
            .collect();
        for id in doomed {
            debug!(wrapper = %ctx.show_method(id), "removing synthetic accessor");
            class.remove_direct_method(id);
            stats.methods_removed += 1;
        }
    }
    Ok(stats)
}

/// Structural wrapper detection: a static, compiler-generated direct method
/// whose entire body is one member access forwarding its parameters, then the
/// matching return.
fn detect_wrapper(method: &MethodDef) -> Option<WrapperKind> {
    if !method.access.is_static() || !method.access.is_compiler_generated() {
        return None;
    }
    let code = method.code.as_ref()?;
    let params: Vec<u16> = (0..code.ins).map(|i| code.param_register(i)).collect();

    match code.instructions.as_slice() {
        [Instruction::StaticGet { dst, field }, Instruction::Return { src }] if src == dst => {
            Some(WrapperKind::StaticGetter { field: *field })
        }
        [Instruction::InstanceGet { dst, object, field }, Instruction::Return { src }]
            if params.first() == Some(object) && src == dst =>
        {
            Some(WrapperKind::InstanceGetter { field: *field })
        }
        [Instruction::StaticPut { src, field }, Instruction::ReturnVoid]
            if params.first() == Some(src) =>
        {
            Some(WrapperKind::StaticSetter {
                field: *field,
                returns_value: false,
            })
        }
        [Instruction::StaticPut { src, field }, Instruction::Return { src: ret }]
            if params.first() == Some(src) && ret == src =>
        {
            Some(WrapperKind::StaticSetter {
                field: *field,
                returns_value: true,
            })
        }
        [Instruction::InstancePut { src, object, field }, Instruction::ReturnVoid]
            if params.len() == 2 && params[0] == *object && params[1] == *src =>
        {
            Some(WrapperKind::InstanceSetter {
                field: *field,
                returns_value: false,
            })
        }
        [Instruction::InstancePut { src, object, field }, Instruction::Return { src: ret }]
            if params.len() == 2 && params[0] == *object && params[1] == *src && ret == src =>
        {
            Some(WrapperKind::InstanceSetter {
                field: *field,
                returns_value: true,
            })
        }
        [Instruction::Invoke {
            kind: kind @ (InvokeKind::Static | InvokeKind::Direct),
            method: target,
            args,
        }, Instruction::ReturnVoid]
            if args.as_slice() == params.as_slice() =>
        {
            Some(WrapperKind::MethodForward {
                target: *target,
                dispatch: *kind,
            })
        }
        [Instruction::Invoke {
            kind: kind @ (InvokeKind::Static | InvokeKind::Direct),
            method: target,
            args,
        }, Instruction::MoveResult { dst }, Instruction::Return { src }]
            if args.as_slice() == params.as_slice() && src == dst =>
        {
            Some(WrapperKind::MethodForward {
                target: *target,
                dispatch: *kind,
            })
        }
        _ => None,
    }
}

/// The concreteness proof. `Ok(false)` is the conservative skip; an error is
/// only produced under [`SynthConfig::require_rebound`].
fn is_safe_target(
    kind: WrapperKind,
    wrapper: MethodId,
    stores: &[DexStore],
    ctx: &DexContext,
    index: &ProgramIndex,
    options: &SynthConfig,
) -> Result<bool> {
    match kind {
        WrapperKind::StaticGetter { field } | WrapperKind::StaticSetter { field, .. } => {
            field_is_safe(field, true, stores, ctx, index, options)
        }
        WrapperKind::InstanceGetter { field } | WrapperKind::InstanceSetter { field, .. } => {
            field_is_safe(field, false, stores, ctx, index, options)
        }
        WrapperKind::MethodForward { target, .. } => {
            if target == wrapper {
                return Ok(false);
            }
            if !index.is_method_concrete(stores, ctx, target) {
                if options.require_rebound
                    && index
                        .resolve_method(stores, ctx, target)
                        .is_some_and(|resolved| resolved != target)
                {
                    return Err(Error::Config(format!(
                        "accessor target {} is not rebound; run ReBindRefsPass before SynthPass",
                        ctx.show_method(target)
                    )));
                }
                debug!(
                    target_method = %ctx.show_method(target),
                    "skipping accessor with non-concrete target"
                );
                return Ok(false);
            }
            // The forwarded-to method must dispatch without a vtable; a
            // virtual target could be overridden below the reference.
            let mref = ctx.method(target).ok_or_else(|| {
                invariant_error!("unresolvable method handle {}", ctx.show_method(target))
            })?;
            let definer = index.class(stores, mref.class);
            Ok(definer.is_some_and(|c| c.direct_methods.iter().any(|m| m.id == target)))
        }
    }
}

fn field_is_safe(
    field: FieldId,
    want_static: bool,
    stores: &[DexStore],
    ctx: &DexContext,
    index: &ProgramIndex,
    options: &SynthConfig,
) -> Result<bool> {
    if !index.is_field_concrete(stores, ctx, field) {
        if options.require_rebound
            && index
                .resolve_field(stores, ctx, field)
                .is_some_and(|resolved| resolved != field)
        {
            return Err(Error::Config(format!(
                "accessor target {} is not rebound; run ReBindRefsPass before SynthPass",
                ctx.show_field(field)
            )));
        }
        debug!(
            target_field = %ctx.show_field(field),
            "skipping accessor with non-concrete target"
        );
        return Ok(false);
    }
    let fref = ctx
        .field(field)
        .ok_or_else(|| invariant_error!("unresolvable field handle {}", ctx.show_field(field)))?;
    let definer = index.class(stores, fref.class);
    Ok(definer.is_some_and(|class| {
        let list = if want_static {
            &class.static_fields
        } else {
            &class.instance_fields
        };
        list.iter().any(|f| f.id == field)
    }))
}

/// Finds every rewritable wrapper call site in one body.
///
/// Getter call sites are only rewritten when a `move-result` consumes the
/// value; a result-less getter call is left in place (and keeps its wrapper
/// alive) rather than guessing at a scratch register.
fn plan_call_sites(code: &MethodCode, wrappers: &HashMap<MethodId, WrapperKind>) -> Vec<Edit> {
    let mut edits = Vec::new();
    let instructions = &code.instructions;
    let mut i = 0;
    while i < instructions.len() {
        let Instruction::Invoke {
            kind: InvokeKind::Static,
            method,
            args,
        } = &instructions[i]
        else {
            i += 1;
            continue;
        };
        let Some(kind) = wrappers.get(method) else {
            i += 1;
            continue;
        };
        let result_reg = match instructions.get(i + 1) {
            Some(Instruction::MoveResult { dst }) => Some(*dst),
            _ => None,
        };

        let edit = match *kind {
            WrapperKind::StaticGetter { field } => result_reg.map(|dst| Edit {
                start: i,
                len: 2,
                replacement: vec![Instruction::StaticGet { dst, field }],
            }),
            WrapperKind::InstanceGetter { field } => {
                result_reg.and_then(|dst| {
                    let object = *args.first()?;
                    Some(Edit {
                        start: i,
                        len: 2,
                        replacement: vec![Instruction::InstanceGet { dst, object, field }],
                    })
                })
            }
            WrapperKind::StaticSetter {
                field,
                returns_value,
            } => args.first().and_then(|&src| match result_reg {
                None => Some(Edit {
                    start: i,
                    len: 1,
                    replacement: vec![Instruction::StaticPut { src, field }],
                }),
                Some(dst) if returns_value => Some(Edit {
                    start: i,
                    len: 2,
                    replacement: vec![
                        Instruction::StaticPut { src, field },
                        Instruction::Move { dst, src },
                    ],
                }),
                Some(_) => None,
            }),
            WrapperKind::InstanceSetter {
                field,
                returns_value,
            } => {
                if args.len() < 2 {
                    None
                } else {
                    let (object, src) = (args[0], args[1]);
                    match result_reg {
                        None => Some(Edit {
                            start: i,
                            len: 1,
                            replacement: vec![Instruction::InstancePut { src, object, field }],
                        }),
                        Some(dst) if returns_value => Some(Edit {
                            start: i,
                            len: 2,
                            replacement: vec![
                                Instruction::InstancePut { src, object, field },
                                Instruction::Move { dst, src },
                            ],
                        }),
                        Some(_) => None,
                    }
                }
            }
            WrapperKind::MethodForward { target, dispatch } => Some(Edit {
                start: i,
                len: 1,
                replacement: vec![Instruction::Invoke {
                    kind: dispatch,
                    method: target,
                    args: args.clone(),
                }],
            }),
        };

        match edit {
            Some(edit) => {
                i = edit.start + edit.len;
                edits.push(edit);
            }
            None => i += 1,
        }
    }
    edits
}

/// Splices the planned replacements into the body, remapping branch targets
/// and try-region boundaries across the length changes.
fn apply_edits(code: &mut MethodCode, edits: &[Edit]) {
    let old = std::mem::take(&mut code.instructions);
    let mut new_instructions: Vec<Instruction> = Vec::with_capacity(old.len());
    // Maps every old index (plus an end sentinel) to its new position.
    let mut index_map: Vec<u32> = Vec::with_capacity(old.len() + 1);

    let mut next_edit = 0;
    for (i, instr) in old.into_iter().enumerate() {
        index_map.push(new_instructions.len() as u32);
        match edits.get(next_edit) {
            Some(edit) if i >= edit.start => {
                if i == edit.start {
                    new_instructions.extend(edit.replacement.iter().cloned());
                }
                if i + 1 == edit.start + edit.len {
                    next_edit += 1;
                }
            }
            _ => new_instructions.push(instr),
        }
    }
    index_map.push(new_instructions.len() as u32);

    for instr in &mut new_instructions {
        if let Some(target) = instr.branch_target_mut() {
            *target = index_map[*target as usize];
        }
    }
    for region in &mut code.tries {
        region.start = index_map[region.start as usize];
        region.end = index_map[region.end as usize];
        region.handler = index_map[region.handler as usize];
    }
    code.instructions = new_instructions;
}
