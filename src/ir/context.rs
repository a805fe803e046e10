//! The interning context: canonical identity for everything in the IR.
//!
//! This module provides the [`DexContext`], the process-unique (per pipeline
//! run) table set that canonicalizes type descriptors, strings, method
//! prototypes and member references. Every other IR entity stores the small
//! `Copy` id handles minted here instead of owning its own copies, which is
//! what lets the rest of the system compare identities instead of structures.
//!
//! # Interning guarantee
//!
//! Interning the same logical key twice returns the identical id for the
//! lifetime of the context. First-time interning allocates the canonical entry
//! and registers it permanently; entries are never removed, so an id handed
//! out once stays valid until the context is dropped - after the last pass and
//! the writer have finished.
//!
//! # Thread Safety
//!
//! The tables are built for the read-mostly access pattern of pass execution:
//! lookups are lock-free reads against append-only storage (`boxcar::Vec`),
//! while first-time insertion takes a per-shard lock in the `DashMap` index so
//! exactly one entry is minted per key even under concurrent interning from
//! rayon workers.
//!
//! # Examples
//!
//! ```rust
//! use dexopt::DexContext;
//!
//! let ctx = DexContext::new();
//! let a = ctx.intern_type("Lcom/example/Alpha;");
//! let b = ctx.intern_type("Lcom/example/Alpha;");
//! assert_eq!(a, b);
//! assert_eq!(ctx.type_descriptor(a), Some("Lcom/example/Alpha;"));
//! ```

use std::sync::Arc;

use dashmap::DashMap;

/// Handle to an interned type descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

/// Handle to an interned string constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

/// Handle to an interned method prototype (parameter types + return type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtoId(u32);

/// Handle to an interned field reference `(class, name, type)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(u32);

/// Handle to an interned method reference `(class, name, proto)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u32);

macro_rules! id_index {
    ($($id:ident),*) => {
        $(impl $id {
            /// Raw table index of this handle.
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        })*
    };
}

id_index!(TypeId, StringId, ProtoId, FieldId, MethodId);

/// An interned method prototype.
///
/// Prototypes are compared by id like everything else; two methods share a
/// `ProtoId` exactly when their parameter lists and return types are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proto {
    /// Ordered parameter types, receiver excluded.
    pub params: Box<[TypeId]>,
    /// Return type (`V` descriptor for void).
    pub ret: TypeId,
}

/// An interned field reference.
///
/// A reference, not a definition: whether a concrete field body backs it is a
/// property of the loaded program, answered by
/// [`ProgramIndex`](crate::ir::store::ProgramIndex), never cached here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    /// The class the reference names (not necessarily the true definer).
    pub class: TypeId,
    /// Field name.
    pub name: StringId,
    /// Field type.
    pub ty: TypeId,
}

/// An interned method reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodRef {
    /// The class the reference names (not necessarily the true definer).
    pub class: TypeId,
    /// Method name.
    pub name: StringId,
    /// Method prototype.
    pub proto: ProtoId,
}

/// Canonical identity tables for one pipeline run.
///
/// Constructed once before any IR object exists and dropped only after the
/// last pass and query have run. All components intern and resolve through a
/// shared `&DexContext`; there is no global state, so independent pipeline
/// runs (e.g. parallel tests) never interfere.
pub struct DexContext {
    strings: boxcar::Vec<Arc<str>>,
    string_index: DashMap<Arc<str>, StringId>,

    types: boxcar::Vec<Arc<str>>,
    type_index: DashMap<Arc<str>, TypeId>,

    protos: boxcar::Vec<Proto>,
    proto_index: DashMap<(Box<[TypeId]>, TypeId), ProtoId>,

    fields: boxcar::Vec<FieldRef>,
    field_index: DashMap<(TypeId, StringId, TypeId), FieldId>,

    methods: boxcar::Vec<MethodRef>,
    method_index: DashMap<(TypeId, StringId, ProtoId), MethodId>,
}

impl Default for DexContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DexContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self {
            strings: boxcar::Vec::new(),
            string_index: DashMap::new(),
            types: boxcar::Vec::new(),
            type_index: DashMap::new(),
            protos: boxcar::Vec::new(),
            proto_index: DashMap::new(),
            fields: boxcar::Vec::new(),
            field_index: DashMap::new(),
            methods: boxcar::Vec::new(),
            method_index: DashMap::new(),
        }
    }

    /// Interns a string constant, returning its canonical id.
    pub fn intern_string(&self, text: &str) -> StringId {
        if let Some(existing) = self.string_index.get(text) {
            return *existing;
        }
        let key: Arc<str> = Arc::from(text);
        *self
            .string_index
            .entry(key.clone())
            .or_insert_with(|| StringId(self.strings.push(key) as u32))
    }

    /// Interns a type descriptor (e.g. `Lcom/example/Alpha;`, `I`, `[B`).
    pub fn intern_type(&self, descriptor: &str) -> TypeId {
        if let Some(existing) = self.type_index.get(descriptor) {
            return *existing;
        }
        let key: Arc<str> = Arc::from(descriptor);
        *self
            .type_index
            .entry(key.clone())
            .or_insert_with(|| TypeId(self.types.push(key) as u32))
    }

    /// Interns a method prototype.
    pub fn intern_proto(&self, params: &[TypeId], ret: TypeId) -> ProtoId {
        let key: (Box<[TypeId]>, TypeId) = (params.into(), ret);
        if let Some(existing) = self.proto_index.get(&key) {
            return *existing;
        }
        *self.proto_index.entry(key).or_insert_with(|| {
            ProtoId(self.protos.push(Proto {
                params: params.into(),
                ret,
            }) as u32)
        })
    }

    /// Interns a field reference.
    ///
    /// If the field is not (yet, or ever) defined in the loaded program this
    /// still succeeds and yields a reference-only stub; concreteness is a
    /// separate question answered against the stores.
    pub fn intern_field(&self, class: TypeId, name: StringId, ty: TypeId) -> FieldId {
        let key = (class, name, ty);
        if let Some(existing) = self.field_index.get(&key) {
            return *existing;
        }
        *self
            .field_index
            .entry(key)
            .or_insert_with(|| FieldId(self.fields.push(FieldRef { class, name, ty }) as u32))
    }

    /// Interns a method reference, with the same stub behavior as
    /// [`intern_field`](Self::intern_field).
    pub fn intern_method(&self, class: TypeId, name: StringId, proto: ProtoId) -> MethodId {
        let key = (class, name, proto);
        if let Some(existing) = self.method_index.get(&key) {
            return *existing;
        }
        *self
            .method_index
            .entry(key)
            .or_insert_with(|| MethodId(self.methods.push(MethodRef { class, name, proto }) as u32))
    }

    /// The descriptor behind a type id.
    #[must_use]
    pub fn type_descriptor(&self, id: TypeId) -> Option<&str> {
        self.types.get(id.index()).map(|s| s.as_ref())
    }

    /// The text behind a string id.
    #[must_use]
    pub fn string(&self, id: StringId) -> Option<&str> {
        self.strings.get(id.index()).map(|s| s.as_ref())
    }

    /// The prototype behind a proto id.
    #[must_use]
    pub fn proto(&self, id: ProtoId) -> Option<&Proto> {
        self.protos.get(id.index())
    }

    /// The reference behind a field id.
    #[must_use]
    pub fn field(&self, id: FieldId) -> Option<&FieldRef> {
        self.fields.get(id.index())
    }

    /// The reference behind a method id.
    #[must_use]
    pub fn method(&self, id: MethodId) -> Option<&MethodRef> {
        self.methods.get(id.index())
    }

    /// Human-readable form of a field reference, for traces and messages.
    #[must_use]
    pub fn show_field(&self, id: FieldId) -> String {
        match self.field(id) {
            Some(f) => format!(
                "{}.{}:{}",
                self.type_descriptor(f.class).unwrap_or("?"),
                self.string(f.name).unwrap_or("?"),
                self.type_descriptor(f.ty).unwrap_or("?"),
            ),
            None => format!("<unresolved field #{}>", id.index()),
        }
    }

    /// Human-readable form of a method reference, for traces and messages.
    #[must_use]
    pub fn show_method(&self, id: MethodId) -> String {
        let Some(m) = self.method(id) else {
            return format!("<unresolved method #{}>", id.index());
        };
        let proto = match self.proto(m.proto) {
            Some(p) => {
                let params: Vec<&str> = p
                    .params
                    .iter()
                    .map(|t| self.type_descriptor(*t).unwrap_or("?"))
                    .collect();
                format!(
                    "({}){}",
                    params.join(""),
                    self.type_descriptor(p.ret).unwrap_or("?")
                )
            }
            None => "(?)?".to_string(),
        };
        format!(
            "{}.{}:{}",
            self.type_descriptor(m.class).unwrap_or("?"),
            self.string(m.name).unwrap_or("?"),
            proto,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::DexContext;

    #[test]
    fn test_type_interning_is_idempotent() {
        let ctx = DexContext::new();
        let a = ctx.intern_type("Lcom/example/Alpha;");
        let b = ctx.intern_type("Lcom/example/Alpha;");
        let c = ctx.intern_type("Lcom/example/Beta;");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(ctx.type_descriptor(a), Some("Lcom/example/Alpha;"));
    }

    #[test]
    fn test_proto_interning_structural_key() {
        let ctx = DexContext::new();
        let int_ty = ctx.intern_type("I");
        let obj_ty = ctx.intern_type("Ljava/lang/Object;");

        let p1 = ctx.intern_proto(&[obj_ty], int_ty);
        let p2 = ctx.intern_proto(&[obj_ty], int_ty);
        let p3 = ctx.intern_proto(&[int_ty], int_ty);
        assert_eq!(p1, p2);
        assert_ne!(p1, p3);

        let proto = ctx.proto(p1).unwrap();
        assert_eq!(&*proto.params, &[obj_ty]);
        assert_eq!(proto.ret, int_ty);
    }

    #[test]
    fn test_member_interning_identity() {
        let ctx = DexContext::new();
        let alpha = ctx.intern_type("Lcom/example/Alpha;");
        let int_ty = ctx.intern_type("I");
        let name = ctx.intern_string("x");

        let f1 = ctx.intern_field(alpha, name, int_ty);
        let f2 = ctx.intern_field(alpha, name, int_ty);
        assert_eq!(f1, f2);

        let proto = ctx.intern_proto(&[], int_ty);
        let m1 = ctx.intern_method(alpha, name, proto);
        let m2 = ctx.intern_method(alpha, name, proto);
        assert_eq!(m1, m2);
    }

    #[test]
    fn test_concurrent_interning_single_entry_per_key() {
        use std::sync::Arc;

        let ctx = Arc::new(DexContext::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || ctx.intern_type("Lcom/example/Contended;"))
            })
            .collect();

        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_show_helpers() {
        let ctx = DexContext::new();
        let alpha = ctx.intern_type("LAlpha;");
        let int_ty = ctx.intern_type("I");
        let name = ctx.intern_string("x");
        let field = ctx.intern_field(alpha, name, int_ty);
        assert_eq!(ctx.show_field(field), "LAlpha;.x:I");

        let proto = ctx.intern_proto(&[alpha], int_ty);
        let getter = ctx.intern_string("access$000");
        let method = ctx.intern_method(alpha, getter, proto);
        assert_eq!(ctx.show_method(method), "LAlpha;.access$000:(LAlpha;)I");
    }
}
