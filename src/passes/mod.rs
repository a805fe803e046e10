//! The pass contract and the manager that drives it.
//!
//! A pass is a named transformation unit over the whole program; the
//! [`PassManager`] runs an ordered list of them, strictly in list order, each
//! pass observing the cumulative mutations of its predecessors. The manager
//! performs no implicit dependency resolution - ordering correctness (for the
//! shipped passes: rebind before accessor elimination, dead-code sweep last)
//! is the caller's responsibility. A pass either completes or fails the whole
//! pipeline; there is no partial-success state.
//!
//! Passes never run concurrently with one another. *Within* a pass,
//! per-method work is embarrassingly parallel and the shipped passes fan it
//! out over rayon workers; the interning context is safe for that, and no two
//! workers ever mutate the same method's instruction sequence.

mod local_dce;
mod rebind;
mod synth;

pub use local_dce::LocalDcePass;
pub use rebind::ReBindRefsPass;
pub use synth::{SynthConfig, SynthPass};

use tracing::info;

use crate::config::Configuration;
use crate::ir::context::DexContext;
use crate::ir::store::DexStore;
use crate::Result;

/// Counters a pass reports back to the manager.
///
/// Purely informational: the manager logs them and hands them to callers, but
/// never branches on them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Member references rewritten to a more specific class.
    pub refs_rebound: usize,
    /// Accessor call sites replaced with direct member accesses.
    pub call_sites_rewritten: usize,
    /// Method definitions deleted.
    pub methods_removed: usize,
    /// Instructions deleted.
    pub instructions_removed: usize,
}

impl PassStats {
    /// Did the pass change anything at all?
    #[must_use]
    pub fn changed(&self) -> bool {
        *self != Self::default()
    }

    /// Accumulates another stats record into this one.
    pub fn merge(&mut self, other: &PassStats) {
        self.refs_rebound += other.refs_rebound;
        self.call_sites_rewritten += other.call_sites_rewritten;
        self.methods_removed += other.methods_removed;
        self.instructions_removed += other.instructions_removed;
    }
}

/// One transformation unit over the loaded program.
///
/// Implementations mutate `stores` in place. Returning an error aborts the
/// entire pipeline; conservative skips (an unprovable rewrite) are traced,
/// not errored.
pub trait Pass: Send + Sync {
    /// Unique name, also the key of this pass's section in the
    /// [`Configuration`] document.
    fn name(&self) -> &'static str;

    /// One-line description for logs.
    fn description(&self) -> &'static str {
        "No description available"
    }

    /// Runs the pass over the whole program.
    ///
    /// # Errors
    ///
    /// Returns an error on an internal invariant violation or unusable
    /// configuration; either aborts the pipeline.
    fn run(
        &self,
        stores: &mut [DexStore],
        ctx: &DexContext,
        config: &Configuration,
    ) -> Result<PassStats>;
}

/// Drives an ordered list of passes over the program.
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    stats: Vec<(&'static str, PassStats)>,
}

impl PassManager {
    /// Creates a manager with the given pass list. The list order is the
    /// execution order.
    #[must_use]
    pub fn new(passes: Vec<Box<dyn Pass>>) -> Self {
        Self {
            passes,
            stats: Vec::new(),
        }
    }

    /// Runs every pass once, strictly in list order.
    ///
    /// Each pass sees the graph exactly as the previous pass left it; the
    /// graph is structurally consistent (no dangling references to deleted
    /// members) when this returns successfully.
    ///
    /// # Errors
    ///
    /// Propagates the first pass failure and stops; later passes do not run.
    pub fn run_passes(
        &mut self,
        stores: &mut [DexStore],
        ctx: &DexContext,
        config: &Configuration,
    ) -> Result<()> {
        self.stats.clear();
        for pass in &self.passes {
            let span = tracing::info_span!("pass", name = pass.name());
            let _guard = span.enter();

            let stats = pass.run(stores, ctx, config)?;
            info!(
                refs_rebound = stats.refs_rebound,
                call_sites_rewritten = stats.call_sites_rewritten,
                methods_removed = stats.methods_removed,
                instructions_removed = stats.instructions_removed,
                "pass complete"
            );
            self.stats.push((pass.name(), stats));
        }
        Ok(())
    }

    /// Per-pass statistics of the most recent [`run_passes`](Self::run_passes).
    #[must_use]
    pub fn stats(&self) -> &[(&'static str, PassStats)] {
        &self.stats
    }
}
