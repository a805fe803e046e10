//! The tagged-variant instruction model.
//!
//! An [`Instruction`] is an opcode kind plus the payload appropriate to that
//! kind: register operands, an optional literal, and - for reference-carrying
//! kinds - the interned [`FieldId`]/[`MethodId`]/[`TypeId`] it touches.
//! Because the payload lives inside the variant, an instruction whose kind
//! and payload disagree cannot be constructed, and every consumer matches
//! exhaustively instead of downcasting.
//!
//! Branch targets are indices into the owning method's instruction sequence.
//! Passes that remove instructions are responsible for shifting targets (see
//! [`MethodCode::remove_instructions`](crate::ir::class::MethodCode::remove_instructions));
//! nothing in this module caches positions.

use strum::EnumDiscriminants;

use crate::ir::context::{DexContext, FieldId, MethodId, StringId, TypeId};

/// Dispatch discipline attached to an invoke instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum InvokeKind {
    /// Static dispatch to a class method.
    Static,
    /// Direct dispatch to a private method or constructor.
    Direct,
    /// Virtual dispatch through the receiver's class.
    Virtual,
    /// Dispatch through an interface reference.
    Interface,
    /// Non-virtual dispatch to the superclass implementation.
    Super,
}

/// Comparison performed by a conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum IfCond {
    /// Branch if equal.
    Eq,
    /// Branch if not equal.
    Ne,
    /// Branch if less than.
    Lt,
    /// Branch if greater or equal.
    Ge,
    /// Branch if greater than.
    Gt,
    /// Branch if less or equal.
    Le,
}

/// Two-operand arithmetic/logic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BinOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division; may throw on integer division by zero.
    Div,
    /// Remainder; may throw on integer division by zero.
    Rem,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise exclusive or.
    Xor,
    /// Shift left.
    Shl,
    /// Arithmetic shift right.
    Shr,
    /// Logical shift right.
    Ushr,
}

/// Single-operand operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum UnOp {
    /// Arithmetic negation.
    Neg,
    /// Bitwise complement.
    Not,
}

/// One Dalvik-style instruction.
///
/// The discriminant enum [`Opcode`] (derived via `strum`) gives a payload-free
/// tag for logging and assertions.
#[derive(Debug, Clone, PartialEq, Eq, EnumDiscriminants)]
#[strum_discriminants(name(Opcode), derive(Hash, strum::Display), allow(missing_docs))]
pub enum Instruction {
    /// No operation.
    Nop,
    /// Register-to-register copy.
    Move {
        /// Destination register.
        dst: u16,
        /// Source register.
        src: u16,
    },
    /// Capture the result of the immediately preceding invoke.
    MoveResult {
        /// Destination register.
        dst: u16,
    },
    /// Capture the pending exception at a handler entry.
    MoveException {
        /// Destination register.
        dst: u16,
    },
    /// Load a literal constant.
    Const {
        /// Destination register.
        dst: u16,
        /// Literal value.
        value: i64,
    },
    /// Load an interned string constant.
    ConstString {
        /// Destination register.
        dst: u16,
        /// The interned string.
        value: StringId,
    },
    /// Load a class reference.
    ConstClass {
        /// Destination register.
        dst: u16,
        /// The referenced type.
        ty: TypeId,
    },
    /// Return from a void method.
    ReturnVoid,
    /// Return a value.
    Return {
        /// Register holding the return value.
        src: u16,
    },
    /// Throw the exception object in `src`.
    Throw {
        /// Register holding the throwable.
        src: u16,
    },
    /// Enter the monitor of the object in `src`.
    MonitorEnter {
        /// Register holding the lock object.
        src: u16,
    },
    /// Exit the monitor of the object in `src`.
    MonitorExit {
        /// Register holding the lock object.
        src: u16,
    },
    /// Assert that `src` holds an instance of `ty`; throws on failure.
    CheckCast {
        /// Register checked.
        src: u16,
        /// Asserted type.
        ty: TypeId,
    },
    /// Test whether `src` holds an instance of `ty`.
    InstanceOf {
        /// Destination register (0/1 result).
        dst: u16,
        /// Register tested.
        src: u16,
        /// Tested type.
        ty: TypeId,
    },
    /// Allocate a new uninitialized instance of `ty`.
    NewInstance {
        /// Destination register.
        dst: u16,
        /// Instantiated type.
        ty: TypeId,
    },
    /// Allocate a new array of `ty` with length from `size`.
    NewArray {
        /// Destination register.
        dst: u16,
        /// Register holding the length.
        size: u16,
        /// Array type.
        ty: TypeId,
    },
    /// Read the length of the array in `src`.
    ArrayLength {
        /// Destination register.
        dst: u16,
        /// Register holding the array.
        src: u16,
    },
    /// Unconditional branch.
    Goto {
        /// Target instruction index.
        target: u32,
    },
    /// Two-register conditional branch.
    If {
        /// Comparison kind.
        cond: IfCond,
        /// First compared register.
        a: u16,
        /// Second compared register.
        b: u16,
        /// Target instruction index.
        target: u32,
    },
    /// Register-against-zero conditional branch.
    IfZ {
        /// Comparison kind.
        cond: IfCond,
        /// Compared register.
        a: u16,
        /// Target instruction index.
        target: u32,
    },
    /// Read an array element.
    ArrayGet {
        /// Destination register.
        dst: u16,
        /// Register holding the array.
        array: u16,
        /// Register holding the index.
        index: u16,
    },
    /// Write an array element.
    ArrayPut {
        /// Register holding the value.
        src: u16,
        /// Register holding the array.
        array: u16,
        /// Register holding the index.
        index: u16,
    },
    /// Read an instance field.
    InstanceGet {
        /// Destination register.
        dst: u16,
        /// Register holding the receiver.
        object: u16,
        /// The referenced field.
        field: FieldId,
    },
    /// Write an instance field.
    InstancePut {
        /// Register holding the value.
        src: u16,
        /// Register holding the receiver.
        object: u16,
        /// The referenced field.
        field: FieldId,
    },
    /// Read a static field.
    StaticGet {
        /// Destination register.
        dst: u16,
        /// The referenced field.
        field: FieldId,
    },
    /// Write a static field.
    StaticPut {
        /// Register holding the value.
        src: u16,
        /// The referenced field.
        field: FieldId,
    },
    /// Call a method. A result, if any, is picked up by a following
    /// [`Instruction::MoveResult`].
    Invoke {
        /// Dispatch discipline.
        kind: InvokeKind,
        /// The referenced method.
        method: MethodId,
        /// Argument registers in call order (receiver first for instance
        /// dispatch).
        args: Vec<u16>,
    },
    /// Two-operand arithmetic/logic.
    BinaryOp {
        /// Operation.
        op: BinOp,
        /// Destination register.
        dst: u16,
        /// Left operand register.
        a: u16,
        /// Right operand register.
        b: u16,
    },
    /// Single-operand arithmetic/logic.
    UnaryOp {
        /// Operation.
        op: UnOp,
        /// Destination register.
        dst: u16,
        /// Operand register.
        src: u16,
    },
}

impl Instruction {
    /// Payload-free opcode tag of this instruction.
    #[must_use]
    pub fn opcode(&self) -> Opcode {
        self.into()
    }

    /// The register this instruction defines, if any.
    #[must_use]
    pub fn def(&self) -> Option<u16> {
        match *self {
            Instruction::Move { dst, .. }
            | Instruction::MoveResult { dst }
            | Instruction::MoveException { dst }
            | Instruction::Const { dst, .. }
            | Instruction::ConstString { dst, .. }
            | Instruction::ConstClass { dst, .. }
            | Instruction::InstanceOf { dst, .. }
            | Instruction::NewInstance { dst, .. }
            | Instruction::NewArray { dst, .. }
            | Instruction::ArrayLength { dst, .. }
            | Instruction::ArrayGet { dst, .. }
            | Instruction::InstanceGet { dst, .. }
            | Instruction::StaticGet { dst, .. }
            | Instruction::BinaryOp { dst, .. }
            | Instruction::UnaryOp { dst, .. } => Some(dst),
            _ => None,
        }
    }

    /// The registers this instruction reads, in operand order.
    #[must_use]
    pub fn uses(&self) -> Vec<u16> {
        match self {
            Instruction::Move { src, .. }
            | Instruction::Return { src }
            | Instruction::Throw { src }
            | Instruction::MonitorEnter { src }
            | Instruction::MonitorExit { src }
            | Instruction::CheckCast { src, .. }
            | Instruction::InstanceOf { src, .. }
            | Instruction::ArrayLength { src, .. }
            | Instruction::UnaryOp { src, .. }
            | Instruction::StaticPut { src, .. } => vec![*src],
            Instruction::NewArray { size, .. } => vec![*size],
            Instruction::If { a, b, .. } => vec![*a, *b],
            Instruction::IfZ { a, .. } => vec![*a],
            Instruction::ArrayGet { array, index, .. } => vec![*array, *index],
            Instruction::ArrayPut { src, array, index } => vec![*src, *array, *index],
            Instruction::InstanceGet { object, .. } => vec![*object],
            Instruction::InstancePut { src, object, .. } => vec![*src, *object],
            Instruction::Invoke { args, .. } => args.clone(),
            Instruction::BinaryOp { a, b, .. } => vec![*a, *b],
            Instruction::Nop
            | Instruction::MoveResult { .. }
            | Instruction::MoveException { .. }
            | Instruction::Const { .. }
            | Instruction::ConstString { .. }
            | Instruction::ConstClass { .. }
            | Instruction::ReturnVoid
            | Instruction::Goto { .. }
            | Instruction::NewInstance { .. }
            | Instruction::StaticGet { .. } => Vec::new(),
        }
    }

    /// Does this instruction have effects observable outside the local
    /// register state?
    ///
    /// Essential kinds per the dead-code sweep: invokes, field/array writes,
    /// returns, throws, branches, monitor operations, allocation (which may
    /// run a class initializer), cast checks, exception-state capture, and
    /// division/remainder (which may throw). Reads of fields and arrays are
    /// deliberately not on this list.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        match self {
            Instruction::ReturnVoid
            | Instruction::Return { .. }
            | Instruction::Throw { .. }
            | Instruction::MonitorEnter { .. }
            | Instruction::MonitorExit { .. }
            | Instruction::CheckCast { .. }
            | Instruction::NewInstance { .. }
            | Instruction::NewArray { .. }
            | Instruction::Goto { .. }
            | Instruction::If { .. }
            | Instruction::IfZ { .. }
            | Instruction::ArrayPut { .. }
            | Instruction::InstancePut { .. }
            | Instruction::StaticPut { .. }
            | Instruction::Invoke { .. }
            | Instruction::MoveException { .. } => true,
            Instruction::BinaryOp { op, .. } => matches!(op, BinOp::Div | BinOp::Rem),
            _ => false,
        }
    }

    /// Is this an invoke of any kind?
    #[must_use]
    pub fn is_invoke(&self) -> bool {
        matches!(self, Instruction::Invoke { .. })
    }

    /// Does this instruction transfer control away from fallthrough?
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            Instruction::Goto { .. } | Instruction::If { .. } | Instruction::IfZ { .. }
        )
    }

    /// Branch target of this instruction, if it has one.
    #[must_use]
    pub fn branch_target(&self) -> Option<u32> {
        match *self {
            Instruction::Goto { target }
            | Instruction::If { target, .. }
            | Instruction::IfZ { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Mutable access to the branch target, if any.
    pub fn branch_target_mut(&mut self) -> Option<&mut u32> {
        match self {
            Instruction::Goto { target }
            | Instruction::If { target, .. }
            | Instruction::IfZ { target, .. } => Some(target),
            _ => None,
        }
    }

    /// The field this instruction references, if it is a field access.
    #[must_use]
    pub fn field_ref(&self) -> Option<FieldId> {
        match *self {
            Instruction::InstanceGet { field, .. }
            | Instruction::InstancePut { field, .. }
            | Instruction::StaticGet { field, .. }
            | Instruction::StaticPut { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Replaces the field reference. No-op for non-field kinds.
    pub fn rebind_field(&mut self, new_field: FieldId) {
        match self {
            Instruction::InstanceGet { field, .. }
            | Instruction::InstancePut { field, .. }
            | Instruction::StaticGet { field, .. }
            | Instruction::StaticPut { field, .. } => *field = new_field,
            _ => {}
        }
    }

    /// The method this instruction references, if it is an invoke.
    #[must_use]
    pub fn method_ref(&self) -> Option<MethodId> {
        match *self {
            Instruction::Invoke { method, .. } => Some(method),
            _ => None,
        }
    }

    /// Replaces the method reference. No-op for non-invoke kinds.
    pub fn rebind_method(&mut self, new_method: MethodId) {
        if let Instruction::Invoke { method, .. } = self {
            *method = new_method;
        }
    }

    /// The type this instruction references, if it is a type access.
    #[must_use]
    pub fn type_ref(&self) -> Option<TypeId> {
        match *self {
            Instruction::ConstClass { ty, .. }
            | Instruction::CheckCast { ty, .. }
            | Instruction::InstanceOf { ty, .. }
            | Instruction::NewInstance { ty, .. }
            | Instruction::NewArray { ty, .. } => Some(ty),
            _ => None,
        }
    }

    /// Readable rendering for traces and test failure output.
    #[must_use]
    pub fn show(&self, ctx: &DexContext) -> String {
        match self {
            Instruction::Invoke { kind, method, args } => {
                format!("invoke-{kind} {} {args:?}", ctx.show_method(*method))
            }
            Instruction::InstanceGet { dst, object, field } => {
                format!("iget v{dst}, v{object}, {}", ctx.show_field(*field))
            }
            Instruction::InstancePut { src, object, field } => {
                format!("iput v{src}, v{object}, {}", ctx.show_field(*field))
            }
            Instruction::StaticGet { dst, field } => {
                format!("sget v{dst}, {}", ctx.show_field(*field))
            }
            Instruction::StaticPut { src, field } => {
                format!("sput v{src}, {}", ctx.show_field(*field))
            }
            other => format!("{other:?}"),
        }
    }
}
