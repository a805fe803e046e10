//! Stores and the per-pass program index.
//!
//! A [`DexStore`] is the unit the pass manager operates over: a named, ordered
//! sequence of class collections (one per output container), together holding
//! a disjoint slice of the program. The [`ProgramIndex`] is the type-to-class
//! lookup every pass rebuilds at entry; it holds positions, not references, so
//! it can be consulted while other parts of the store tree are being mutated,
//! and it is thrown away at the pass boundary rather than cached across
//! mutations.

use std::collections::{HashMap, HashSet};

use crate::ir::class::{DexClass, FieldDef, MethodDef};
use crate::ir::context::{DexContext, FieldId, MethodId, TypeId};
use crate::Result;

/// One collection of classes destined for a single output container.
pub type DexClasses = Vec<DexClass>;

/// A named, ordered sequence of class collections.
///
/// A program may consist of multiple stores (split modules); their class sets
/// must be disjoint, which [`ProgramIndex::build`] verifies.
#[derive(Debug, Clone)]
pub struct DexStore {
    name: String,
    dexen: Vec<DexClasses>,
}

impl DexStore {
    /// Creates an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dexen: Vec::new(),
        }
    }

    /// The store's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends one class collection.
    pub fn add_classes(&mut self, classes: DexClasses) {
        self.dexen.push(classes);
    }

    /// The class collections, in container order.
    #[must_use]
    pub fn dexen(&self) -> &[DexClasses] {
        &self.dexen
    }

    /// Mutable access to the class collections.
    pub fn dexen_mut(&mut self) -> &mut Vec<DexClasses> {
        &mut self.dexen
    }

    /// Iterates every class in the store.
    pub fn classes(&self) -> impl Iterator<Item = &DexClass> {
        self.dexen.iter().flatten()
    }

    /// Iterates every class in the store mutably.
    pub fn classes_mut(&mut self) -> impl Iterator<Item = &mut DexClass> {
        self.dexen.iter_mut().flatten()
    }
}

/// Iterates every class across a sequence of stores.
pub fn program_classes(stores: &[DexStore]) -> impl Iterator<Item = &DexClass> {
    stores.iter().flat_map(DexStore::classes)
}

/// Iterates every class across a sequence of stores mutably.
pub fn program_classes_mut(stores: &mut [DexStore]) -> impl Iterator<Item = &mut DexClass> {
    stores.iter_mut().flat_map(DexStore::classes_mut)
}

/// Position of a class inside a store sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassLoc {
    /// Index into the store sequence.
    pub store: usize,
    /// Index of the class collection within the store.
    pub dex: usize,
    /// Index of the class within the collection.
    pub class: usize,
}

/// Type-to-class lookup over the loaded program, plus the member resolution
/// walk built on top of it.
///
/// Rebuilt by each pass at entry. Building is cheap (one scan of the class
/// lists) and rebuilding is what keeps resolution honest after a prior pass
/// deleted or rewrote members.
pub struct ProgramIndex {
    by_type: HashMap<TypeId, ClassLoc>,
}

impl ProgramIndex {
    /// Scans the stores and indexes every class by its type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`](crate::Error::Malformed) if the same type
    /// is defined by more than one class across the stores - stores must hold
    /// disjoint class sets - or if a loaded superclass chain is cyclic. Both
    /// are loader invariants; rejecting them here is what lets the resolution
    /// walks below assume every chain through loaded classes terminates.
    pub fn build(stores: &[DexStore], ctx: &DexContext) -> Result<Self> {
        let mut by_type = HashMap::new();
        for (store_idx, store) in stores.iter().enumerate() {
            for (dex_idx, classes) in store.dexen().iter().enumerate() {
                for (class_idx, class) in classes.iter().enumerate() {
                    let loc = ClassLoc {
                        store: store_idx,
                        dex: dex_idx,
                        class: class_idx,
                    };
                    if by_type.insert(class.ty, loc).is_some() {
                        return Err(malformed_error!(
                            "duplicate class definition for {}",
                            ctx.type_descriptor(class.ty).unwrap_or("?")
                        ));
                    }
                }
            }
        }

        let index = Self { by_type };
        for class in program_classes(stores) {
            let mut seen = HashSet::new();
            let mut current = Some(class.ty);
            while let Some(ty) = current {
                if !seen.insert(ty) {
                    return Err(malformed_error!(
                        "superclass cycle through {}",
                        ctx.type_descriptor(ty).unwrap_or("?")
                    ));
                }
                current = index.class(stores, ty).and_then(|c| c.super_ty);
            }
        }
        Ok(index)
    }

    /// Is the type defined by a loaded class?
    #[must_use]
    pub fn contains(&self, ty: TypeId) -> bool {
        self.by_type.contains_key(&ty)
    }

    /// The loaded class defining `ty`, if any.
    #[must_use]
    pub fn class<'a>(&self, stores: &'a [DexStore], ty: TypeId) -> Option<&'a DexClass> {
        let loc = self.by_type.get(&ty)?;
        stores
            .get(loc.store)?
            .dexen()
            .get(loc.dex)?
            .get(loc.class)
    }

    /// Resolves a field reference to the lowest concretely-defining class.
    ///
    /// Walks the superclass chain starting at the referenced class and
    /// returns the interned reference rooted at the first class that actually
    /// defines a field with the same name and type. Returns `None` when no
    /// loaded class defines one (external member, or the walk leaves the
    /// loaded program before finding a definition) and when the definition is
    /// ambiguous - a same-signature field in both the static and instance
    /// lists of one class proves nothing safely, so it resolves to nothing.
    #[must_use]
    pub fn resolve_field(
        &self,
        stores: &[DexStore],
        ctx: &DexContext,
        field: FieldId,
    ) -> Option<FieldId> {
        let fref = ctx.field(field)?;
        let mut current = Some(fref.class);
        while let Some(ty) = current {
            let class = self.class(stores, ty)?;
            let candidate = ctx.intern_field(class.ty, fref.name, fref.ty);
            let hits = class
                .static_fields
                .iter()
                .chain(class.instance_fields.iter())
                .filter(|f| f.id == candidate)
                .count();
            match hits {
                0 => current = class.super_ty,
                1 => return Some(candidate),
                _ => return None,
            }
        }
        None
    }

    /// Resolves a method reference to the lowest concretely-defining class.
    ///
    /// Same walk and same ambiguity rule as [`resolve_field`](Self::resolve_field),
    /// searching both the direct and virtual method lists of each class.
    #[must_use]
    pub fn resolve_method(
        &self,
        stores: &[DexStore],
        ctx: &DexContext,
        method: MethodId,
    ) -> Option<MethodId> {
        let mref = ctx.method(method)?;
        let mut current = Some(mref.class);
        while let Some(ty) = current {
            let class = self.class(stores, ty)?;
            let candidate = ctx.intern_method(class.ty, mref.name, mref.proto);
            let hits = class
                .direct_methods
                .iter()
                .chain(class.virtual_methods.iter())
                .filter(|m| m.id == candidate)
                .count();
            match hits {
                0 => current = class.super_ty,
                1 => return Some(candidate),
                _ => return None,
            }
        }
        None
    }

    /// The definition backing a field reference, at exactly the referenced
    /// class. `None` when the reference is external or points above the true
    /// definer.
    #[must_use]
    pub fn field_def<'a>(
        &self,
        stores: &'a [DexStore],
        ctx: &DexContext,
        field: FieldId,
    ) -> Option<&'a FieldDef> {
        let fref = ctx.field(field)?;
        self.class(stores, fref.class)?.field_def(field)
    }

    /// The definition backing a method reference, at exactly the referenced
    /// class.
    #[must_use]
    pub fn method_def<'a>(
        &self,
        stores: &'a [DexStore],
        ctx: &DexContext,
        method: MethodId,
    ) -> Option<&'a MethodDef> {
        let mref = ctx.method(method)?;
        self.class(stores, mref.class)?.method_def(method)
    }

    /// Is the field reference backed by an unambiguous definition at the
    /// class it names?
    ///
    /// This is the safety predicate of the accessor-elimination pass: after
    /// rebinding, a provably-safe target resolves to itself.
    #[must_use]
    pub fn is_field_concrete(&self, stores: &[DexStore], ctx: &DexContext, field: FieldId) -> bool {
        self.resolve_field(stores, ctx, field) == Some(field)
    }

    /// Is the method reference backed by an unambiguous definition with a
    /// body at the class it names?
    #[must_use]
    pub fn is_method_concrete(
        &self,
        stores: &[DexStore],
        ctx: &DexContext,
        method: MethodId,
    ) -> bool {
        self.resolve_method(stores, ctx, method) == Some(method)
            && self
                .method_def(stores, ctx, method)
                .is_some_and(MethodDef::is_concrete)
    }
}
