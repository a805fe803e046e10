//! Fluent construction of IR classes and method bodies.
//!
//! Loaders and tests assemble the object model through these builders so that
//! every entity is born with properly interned identity; hand-rolling a
//! [`DexClass`] is possible but easy to get wrong (a member definition whose
//! id is rooted at the wrong class is invisible to resolution).
//!
//! ```rust
//! use dexopt::{AccessFlags, DexContext};
//! use dexopt::ir::builder::ClassBuilder;
//!
//! let ctx = DexContext::new();
//! let class = ClassBuilder::new(&ctx, "Lcom/example/Alpha;")
//!     .static_field("x", "I", AccessFlags::PRIVATE | AccessFlags::STATIC)
//!     .direct_method(
//!         "get",
//!         &[],
//!         "I",
//!         AccessFlags::STATIC,
//!         |m| {
//!             m.registers(1, 0);
//!             let x = m.field("Lcom/example/Alpha;", "x", "I");
//!             m.sget(0, x);
//!             m.ret(0);
//!         },
//!     )
//!     .build();
//! assert_eq!(class.direct_methods.len(), 1);
//! ```

use crate::ir::access::AccessFlags;
use crate::ir::class::{DexClass, FieldDef, MethodCode, MethodDef, TryBlock};
use crate::ir::context::{DexContext, FieldId, MethodId, TypeId};
use crate::ir::instruction::{Instruction, InvokeKind};

/// Builds one [`DexClass`] with interned identity.
pub struct ClassBuilder<'a> {
    ctx: &'a DexContext,
    class: DexClass,
}

impl<'a> ClassBuilder<'a> {
    /// Starts a public class with `Ljava/lang/Object;` as superclass.
    #[must_use]
    pub fn new(ctx: &'a DexContext, descriptor: &str) -> Self {
        let ty = ctx.intern_type(descriptor);
        let object = ctx.intern_type("Ljava/lang/Object;");
        Self {
            ctx,
            class: DexClass::new(ty, Some(object), AccessFlags::PUBLIC),
        }
    }

    /// Replaces the access flags.
    #[must_use]
    pub fn access(mut self, access: AccessFlags) -> Self {
        self.class.access = access;
        self
    }

    /// Sets the superclass.
    #[must_use]
    pub fn super_class(mut self, descriptor: &str) -> Self {
        self.class.super_ty = Some(self.ctx.intern_type(descriptor));
        self
    }

    /// Adds an implemented interface.
    #[must_use]
    pub fn interface(mut self, descriptor: &str) -> Self {
        self.class.interfaces.push(self.ctx.intern_type(descriptor));
        self
    }

    /// Adds a static field definition.
    #[must_use]
    pub fn static_field(mut self, name: &str, ty: &str, access: AccessFlags) -> Self {
        let id = self.intern_own_field(name, ty);
        self.class.static_fields.push(FieldDef { id, access });
        self
    }

    /// Adds an instance field definition.
    #[must_use]
    pub fn instance_field(mut self, name: &str, ty: &str, access: AccessFlags) -> Self {
        let id = self.intern_own_field(name, ty);
        self.class.instance_fields.push(FieldDef { id, access });
        self
    }

    /// Adds a direct method whose body is assembled by `body`.
    #[must_use]
    pub fn direct_method(
        mut self,
        name: &str,
        params: &[&str],
        ret: &str,
        access: AccessFlags,
        body: impl FnOnce(&mut MethodBuilder),
    ) -> Self {
        let def = self.method_def(name, params, ret, access, Some(body));
        self.class.direct_methods.push(def);
        self
    }

    /// Adds a virtual method whose body is assembled by `body`.
    #[must_use]
    pub fn virtual_method(
        mut self,
        name: &str,
        params: &[&str],
        ret: &str,
        access: AccessFlags,
        body: impl FnOnce(&mut MethodBuilder),
    ) -> Self {
        let def = self.method_def(name, params, ret, access, Some(body));
        self.class.virtual_methods.push(def);
        self
    }

    /// Adds a bodyless virtual method (abstract or native).
    #[must_use]
    pub fn abstract_method(
        mut self,
        name: &str,
        params: &[&str],
        ret: &str,
        access: AccessFlags,
    ) -> Self {
        let def = self.method_def::<fn(&mut MethodBuilder)>(name, params, ret, access, None);
        self.class.virtual_methods.push(def);
        self
    }

    /// Finishes the class.
    #[must_use]
    pub fn build(self) -> DexClass {
        self.class
    }

    fn intern_own_field(&self, name: &str, ty: &str) -> FieldId {
        self.ctx.intern_field(
            self.class.ty,
            self.ctx.intern_string(name),
            self.ctx.intern_type(ty),
        )
    }

    fn method_def<F: FnOnce(&mut MethodBuilder)>(
        &self,
        name: &str,
        params: &[&str],
        ret: &str,
        access: AccessFlags,
        body: Option<F>,
    ) -> MethodDef {
        let param_ids: Vec<TypeId> = params.iter().map(|p| self.ctx.intern_type(p)).collect();
        let proto = self.ctx.intern_proto(&param_ids, self.ctx.intern_type(ret));
        let id = self
            .ctx
            .intern_method(self.class.ty, self.ctx.intern_string(name), proto);

        let code = body.map(|assemble| {
            let mut builder = MethodBuilder::new(self.ctx);
            assemble(&mut builder);
            builder.finish()
        });
        MethodDef { id, access, code }
    }
}

/// Builds one [`MethodCode`] body.
pub struct MethodBuilder<'a> {
    ctx: &'a DexContext,
    registers: u16,
    ins: u16,
    instructions: Vec<Instruction>,
    tries: Vec<TryBlock>,
}

impl<'a> MethodBuilder<'a> {
    fn new(ctx: &'a DexContext) -> Self {
        Self {
            ctx,
            registers: 0,
            ins: 0,
            instructions: Vec::new(),
            tries: Vec::new(),
        }
    }

    /// Sets the register shape: `total` registers, of which the highest
    /// `ins` hold the incoming arguments.
    pub fn registers(&mut self, total: u16, ins: u16) {
        self.registers = total;
        self.ins = ins;
    }

    /// Register index of parameter `i` under the current register shape.
    #[must_use]
    pub fn param(&self, i: u16) -> u16 {
        self.registers - self.ins + i
    }

    /// Interns a field reference for use in this body.
    #[must_use]
    pub fn field(&self, class: &str, name: &str, ty: &str) -> FieldId {
        self.ctx.intern_field(
            self.ctx.intern_type(class),
            self.ctx.intern_string(name),
            self.ctx.intern_type(ty),
        )
    }

    /// Interns a method reference for use in this body.
    #[must_use]
    pub fn method(&self, class: &str, name: &str, params: &[&str], ret: &str) -> MethodId {
        let param_ids: Vec<TypeId> = params.iter().map(|p| self.ctx.intern_type(p)).collect();
        let proto = self.ctx.intern_proto(&param_ids, self.ctx.intern_type(ret));
        self.ctx.intern_method(
            self.ctx.intern_type(class),
            self.ctx.intern_string(name),
            proto,
        )
    }

    /// Appends an arbitrary instruction.
    pub fn instr(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Appends `const dst, value`.
    pub fn const_(&mut self, dst: u16, value: i64) {
        self.instr(Instruction::Const { dst, value });
    }

    /// Appends `sget dst, field`.
    pub fn sget(&mut self, dst: u16, field: FieldId) {
        self.instr(Instruction::StaticGet { dst, field });
    }

    /// Appends `sput src, field`.
    pub fn sput(&mut self, src: u16, field: FieldId) {
        self.instr(Instruction::StaticPut { src, field });
    }

    /// Appends `iget dst, object, field`.
    pub fn iget(&mut self, dst: u16, object: u16, field: FieldId) {
        self.instr(Instruction::InstanceGet { dst, object, field });
    }

    /// Appends `iput src, object, field`.
    pub fn iput(&mut self, src: u16, object: u16, field: FieldId) {
        self.instr(Instruction::InstancePut { src, object, field });
    }

    /// Appends an invoke.
    pub fn invoke(&mut self, kind: InvokeKind, method: MethodId, args: &[u16]) {
        self.instr(Instruction::Invoke {
            kind,
            method,
            args: args.to_vec(),
        });
    }

    /// Appends `move-result dst`.
    pub fn move_result(&mut self, dst: u16) {
        self.instr(Instruction::MoveResult { dst });
    }

    /// Appends `return src`.
    pub fn ret(&mut self, src: u16) {
        self.instr(Instruction::Return { src });
    }

    /// Appends `return-void`.
    pub fn ret_void(&mut self) {
        self.instr(Instruction::ReturnVoid);
    }

    /// Registers a guarded region over `[start, end)` with the given handler
    /// entry.
    pub fn try_block(&mut self, start: u32, end: u32, handler: u32) {
        self.tries.push(TryBlock {
            start,
            end,
            handler,
        });
    }

    fn finish(self) -> MethodCode {
        let mut code = MethodCode::new(self.registers, self.ins, self.instructions);
        code.tries = self.tries;
        code
    }
}
