//! The mutable IR object model and its interning backbone.
//!
//! Everything a pass touches lives here: the process-unique [`context::DexContext`]
//! that canonicalizes identity, the ownership tree of stores, classes, members
//! and instructions, and the builders loaders and tests use to assemble it.
//!
//! # Ownership
//!
//! The ownership chain is strict: a [`store::DexStore`] owns its classes, a
//! [`class::DexClass`] owns its member definitions, a [`class::MethodDef`]
//! owns its instruction sequence. Cross-entity references - an instruction
//! naming a field, a method naming its defining class - are id handles into
//! the [`context::DexContext`] tables, never owning pointers, so deleting a
//! method can never leave a dangling reference behind. Anything holding a
//! handle re-resolves it through the context and the current
//! [`store::ProgramIndex`] instead of caching a lookup across a mutation
//! point.

pub mod access;
pub mod builder;
pub mod class;
pub mod context;
pub mod instruction;
pub mod store;
