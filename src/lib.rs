#![deny(missing_docs)]

//! # dexopt
//!
//! An in-memory intermediate representation and optimization pass pipeline for
//! Dalvik-style bytecode. `dexopt` sits between a loader and a writer: the
//! loader populates [`DexStore`]s with classes, methods, fields and
//! instructions; the [`PassManager`] runs an ordered list of mutating
//! optimization passes over that shared graph; the writer serializes whatever
//! the passes left behind.
//!
//! ## Features
//!
//! - **Interned identity** - every type descriptor, string, prototype and
//!   member reference is canonicalized once in a [`DexContext`], so handle
//!   equality substitutes for structural equality everywhere in the system
//! - **Tagged instruction model** - [`Instruction`] is an exhaustive enum; an
//!   instruction whose kind and payload disagree cannot be constructed
//! - **Uniform pass contract** - passes implement [`Pass`] and are driven
//!   strictly in list order by the [`PassManager`], each observing the
//!   cumulative mutations of its predecessors
//! - **Conservative by construction** - the shipped passes only rewrite what
//!   they can prove safe against the loaded program; everything else is a
//!   traced no-op
//!
//! ## Shipped passes
//!
//! - [`passes::ReBindRefsPass`] - normalizes member references to the most
//!   specific concretely-defining class in the hierarchy
//! - [`passes::SynthPass`] - eliminates compiler-synthesized accessor
//!   wrappers, rewriting call sites into direct member accesses
//! - [`passes::LocalDcePass`] - per-method backward-liveness dead code
//!   elimination, run to a fixpoint so removals cascade
//!
//! ## Quick Start
//!
//! ```rust
//! use dexopt::{
//!     Configuration, DexContext, DexStore, PassManager,
//!     passes::{LocalDcePass, ReBindRefsPass, SynthPass},
//! };
//!
//! let ctx = DexContext::new();
//! // A loader would populate this store; here it stays empty.
//! let mut stores = vec![DexStore::new("classes")];
//!
//! let mut manager = PassManager::new(vec![
//!     Box::new(ReBindRefsPass::new()),
//!     Box::new(SynthPass::new()),
//!     Box::new(LocalDcePass::new()),
//! ]);
//! manager.run_passes(&mut stores, &ctx, &Configuration::empty())?;
//! # Ok::<(), dexopt::Error>(())
//! ```
//!
//! Pass ordering is the caller's responsibility: `ReBindRefsPass` must run
//! before `SynthPass` so that concreteness checks see the true defining class,
//! and `LocalDcePass` runs last to sweep up the operands the rewrites
//! orphaned.

#[macro_use]
pub(crate) mod error;

pub mod config;
pub mod ir;
pub mod matcher;
pub mod passes;

pub use config::Configuration;
pub use error::Error;
pub use ir::access::AccessFlags;
pub use ir::builder::{ClassBuilder, MethodBuilder};
pub use ir::class::{DexClass, FieldDef, MethodCode, MethodDef};
pub use ir::context::{DexContext, FieldId, MethodId, ProtoId, StringId, TypeId};
pub use ir::instruction::{Instruction, InvokeKind};
pub use ir::store::{DexStore, ProgramIndex};
pub use passes::{Pass, PassManager};

/// Convenience alias for operations that can fail with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
