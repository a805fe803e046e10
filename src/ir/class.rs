//! Class, field and method definitions - the owned side of the IR.
//!
//! A [`DexClass`] present in a store *is* the concrete definition of its type;
//! member definitions nested inside it are the concrete definitions of their
//! interned references. A reference whose `(class, name, signature)` key finds
//! no definition anywhere in the loaded stores is an external stub and is
//! never rewritten by the passes.

use crate::ir::access::AccessFlags;
use crate::ir::context::{FieldId, MethodId, TypeId};
use crate::ir::instruction::Instruction;

/// Which method list of a class a method lives in.
///
/// Direct methods (static, private, constructors) are dispatched without a
/// vtable; virtual methods are dispatchable through the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum MethodListKind {
    /// The `direct_methods` list.
    Direct,
    /// The `virtual_methods` list.
    Virtual,
}

/// A guarded exception region inside a method body.
///
/// `start..end` is a half-open instruction index range; `handler` is the index
/// of the handler entry. The dead-code sweep shifts these together with branch
/// targets and never changes which instructions a region guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryBlock {
    /// First guarded instruction index.
    pub start: u32,
    /// One past the last guarded instruction index.
    pub end: u32,
    /// Handler entry instruction index.
    pub handler: u32,
}

/// The body of a concrete method: register shape plus the mutable,
/// sequence-ordered instruction list that passes rewrite in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCode {
    /// Total number of registers the body uses.
    pub registers: u16,
    /// Number of incoming argument registers; these occupy the highest
    /// `ins` register slots, so parameter `i` lives in
    /// `registers - ins + i`.
    pub ins: u16,
    /// The instruction sequence, owned in order.
    pub instructions: Vec<Instruction>,
    /// Guarded regions, if any.
    pub tries: Vec<TryBlock>,
}

impl MethodCode {
    /// Creates a body with the given register shape and instructions.
    #[must_use]
    pub fn new(registers: u16, ins: u16, instructions: Vec<Instruction>) -> Self {
        Self {
            registers,
            ins,
            instructions,
            tries: Vec::new(),
        }
    }

    /// Register index of parameter `i`.
    #[must_use]
    pub fn param_register(&self, i: u16) -> u16 {
        self.registers - self.ins + i
    }

    /// Removes the instructions at the given (sorted, deduplicated) indices,
    /// shifting branch targets and try-region boundaries down to compensate.
    ///
    /// Callers must never pass the index of a branch or of a try-region
    /// boundary instruction itself; the shipped passes only remove interior
    /// value-producing instructions, so region shape is preserved by
    /// construction.
    pub fn remove_instructions(&mut self, sorted_indices: &[usize]) {
        if sorted_indices.is_empty() {
            return;
        }

        let shift_for = |pos: u32| -> u32 {
            // Number of removed indices strictly below pos.
            let removed_below = sorted_indices.partition_point(|&i| (i as u32) < pos);
            pos - removed_below as u32
        };

        let mut keep = Vec::with_capacity(self.instructions.len() - sorted_indices.len());
        let mut next_removed = 0usize;
        for (idx, mut instr) in std::mem::take(&mut self.instructions).into_iter().enumerate() {
            if next_removed < sorted_indices.len() && sorted_indices[next_removed] == idx {
                next_removed += 1;
                continue;
            }
            if let Some(target) = instr.branch_target_mut() {
                *target = shift_for(*target);
            }
            keep.push(instr);
        }
        self.instructions = keep;

        for region in &mut self.tries {
            region.start = shift_for(region.start);
            region.end = shift_for(region.end);
            region.handler = shift_for(region.handler);
        }
    }
}

/// A field definition owned by its defining class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// The interned reference this definition backs.
    pub id: FieldId,
    /// Access flags.
    pub access: AccessFlags,
}

/// A method definition owned by its defining class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDef {
    /// The interned reference this definition backs.
    pub id: MethodId,
    /// Access flags.
    pub access: AccessFlags,
    /// The body; `None` for abstract and native methods.
    pub code: Option<MethodCode>,
}

impl MethodDef {
    /// Does this definition carry an instruction sequence?
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        self.code.is_some()
    }
}

/// A class definition: the concrete presence of a type in the loaded program.
#[derive(Debug, Clone)]
pub struct DexClass {
    /// The type this class defines.
    pub ty: TypeId,
    /// Superclass, absent only for the root object type.
    pub super_ty: Option<TypeId>,
    /// Implemented interfaces.
    pub interfaces: Vec<TypeId>,
    /// Access flags.
    pub access: AccessFlags,
    /// Static fields, in declaration order.
    pub static_fields: Vec<FieldDef>,
    /// Instance fields, in declaration order.
    pub instance_fields: Vec<FieldDef>,
    /// Static, private and constructor methods.
    pub direct_methods: Vec<MethodDef>,
    /// Dispatchable methods.
    pub virtual_methods: Vec<MethodDef>,
}

impl DexClass {
    /// Creates an empty class of type `ty`.
    #[must_use]
    pub fn new(ty: TypeId, super_ty: Option<TypeId>, access: AccessFlags) -> Self {
        Self {
            ty,
            super_ty,
            interfaces: Vec::new(),
            access,
            static_fields: Vec::new(),
            instance_fields: Vec::new(),
            direct_methods: Vec::new(),
            virtual_methods: Vec::new(),
        }
    }

    /// Looks up a field definition backing `id`, searching both field lists.
    #[must_use]
    pub fn field_def(&self, id: FieldId) -> Option<&FieldDef> {
        self.static_fields
            .iter()
            .chain(self.instance_fields.iter())
            .find(|f| f.id == id)
    }

    /// Looks up a method definition backing `id`, searching both method lists.
    #[must_use]
    pub fn method_def(&self, id: MethodId) -> Option<&MethodDef> {
        self.direct_methods
            .iter()
            .chain(self.virtual_methods.iter())
            .find(|m| m.id == id)
    }

    /// The method list of the given kind.
    #[must_use]
    pub fn methods(&self, kind: MethodListKind) -> &[MethodDef] {
        match kind {
            MethodListKind::Direct => &self.direct_methods,
            MethodListKind::Virtual => &self.virtual_methods,
        }
    }

    /// Iterates all method definitions, direct then virtual.
    pub fn all_methods(&self) -> impl Iterator<Item = &MethodDef> {
        self.direct_methods.iter().chain(self.virtual_methods.iter())
    }

    /// Iterates all method definitions mutably, direct then virtual.
    pub fn all_methods_mut(&mut self) -> impl Iterator<Item = &mut MethodDef> {
        self.direct_methods
            .iter_mut()
            .chain(self.virtual_methods.iter_mut())
    }

    /// Removes the direct method backing `id`. Returns whether a definition
    /// was actually removed.
    pub fn remove_direct_method(&mut self, id: MethodId) -> bool {
        let before = self.direct_methods.len();
        self.direct_methods.retain(|m| m.id != id);
        self.direct_methods.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::{MethodCode, TryBlock};
    use crate::ir::instruction::{IfCond, Instruction};

    #[test]
    fn test_param_register_mapping() {
        // 4 registers total, 2 ins: params live in v2, v3.
        let code = MethodCode::new(4, 2, Vec::new());
        assert_eq!(code.param_register(0), 2);
        assert_eq!(code.param_register(1), 3);
    }

    #[test]
    fn test_remove_instructions_shifts_branch_targets() {
        let mut code = MethodCode::new(
            2,
            0,
            vec![
                Instruction::Const { dst: 0, value: 1 }, // 0: dead
                Instruction::Const { dst: 1, value: 0 }, // 1
                Instruction::IfZ {
                    cond: IfCond::Eq,
                    a: 1,
                    target: 4,
                }, // 2
                Instruction::Const { dst: 1, value: 2 }, // 3
                Instruction::ReturnVoid,                 // 4
            ],
        );
        code.remove_instructions(&[0]);

        assert_eq!(code.instructions.len(), 4);
        assert_eq!(
            code.instructions[1].branch_target(),
            Some(3),
            "branch target must shift with removed predecessors"
        );
    }

    #[test]
    fn test_remove_instructions_shifts_try_regions() {
        let mut code = MethodCode::new(
            2,
            0,
            vec![
                Instruction::Const { dst: 0, value: 1 }, // 0: dead
                Instruction::Const { dst: 1, value: 0 }, // 1: dead
                Instruction::Nop,                        // 2
                Instruction::ReturnVoid,                 // 3
                Instruction::MoveException { dst: 0 },   // 4
            ],
        );
        code.tries.push(TryBlock {
            start: 2,
            end: 4,
            handler: 4,
        });
        code.remove_instructions(&[0, 1]);

        assert_eq!(code.tries[0].start, 0);
        assert_eq!(code.tries[0].end, 2);
        assert_eq!(code.tries[0].handler, 2);
    }
}
