mod composites;
mod exec;
mod registry;
mod stats;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::task::Task;

pub use composites::CompositeExpr;
pub use exec::Scheduler;
pub use registry::{ScanSchedule, SymbolCache};
pub use stats::{PeakCallback, SymbolStats};

// ---------------------------------------------------------------------------
// Identifiers and classification
// ---------------------------------------------------------------------------

pub type SymbolId = usize;

/// How a symbol participates in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    /// Scored rule with its own callback.
    Normal,
    /// Callback rule that inserts virtual children instead of itself.
    Callback,
    /// Scored name attached to a callback parent; never runs itself.
    Virtual,
    Prefilter,
    Postfilter,
    Composite,
    /// Registered for dependency purposes only; never runs, never scores.
    Ghost,
}

/// Optional behavior flags on a symbol definition.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolFlags {
    /// Keep running even after a prefilter set a pre-result.
    pub fine: bool,
    /// May run on tasks with an empty message.
    pub empty: bool,
    /// Never scheduled.
    pub skipped: bool,
    /// At most one counted shot per task.
    pub one_shot: bool,
    /// At most one option on the result.
    pub one_param: bool,
    /// Inserted score does not contribute to the metric.
    pub ignore_score: bool,
}

// ---------------------------------------------------------------------------
// SymbolDef
// ---------------------------------------------------------------------------

/// Frozen definition of one symbol after `post_load`. Shared immutably by
/// every task; only the weight cell is runtime-mutable.
pub struct SymbolDef {
    pub id: SymbolId,
    pub name: String,
    pub ty: SymbolType,
    pub priority: i32,
    /// Longest dependency chain ending here; the second half of the
    /// `(priority, rank)` order key.
    pub rank: u32,
    weight_bits: AtomicU64,
    pub parent: Option<SymbolId>,
    pub group: Option<String>,
    pub flags: SymbolFlags,
    /// `0` defers to the worker default.
    pub max_shots: u32,
    /// Resolved dependency ids.
    pub deps: Vec<SymbolId>,
    pub condition: Option<Arc<dyn Condition>>,
    pub handler: Option<Arc<dyn SymbolHandler>>,
}

impl SymbolDef {
    pub fn weight(&self) -> f64 {
        f64::from_bits(self.weight_bits.load(Ordering::Relaxed))
    }

    /// Replace the static weight at runtime (settings reload).
    pub fn set_weight(&self, weight: f64) {
        self.weight_bits.store(weight.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn new_weight_bits(weight: f64) -> AtomicU64 {
        AtomicU64::new(weight.to_bits())
    }
}

impl std::fmt::Debug for SymbolDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolDef")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("priority", &self.priority)
            .field("rank", &self.rank)
            .field("weight", &self.weight())
            .field("deps", &self.deps)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Condition / handler capabilities
// ---------------------------------------------------------------------------

/// Per-symbol enable gate, evaluated at run time against the task.
pub trait Condition: Send + Sync {
    fn enabled(&self, task: &Task) -> bool;
}

impl<F> Condition for F
where
    F: Fn(&Task) -> bool + Send + Sync,
{
    fn enabled(&self, task: &Task) -> bool {
        self(task)
    }
}

/// What a symbol callback produced.
#[derive(Debug, Clone)]
pub enum SymbolOutcome {
    /// Insert the symbol with this weight multiplier and options.
    Match { multiplier: f64, options: Vec<String> },
    /// Nothing fired.
    NoMatch,
    /// The callback inserted results itself (possibly for virtual
    /// children) or only had side effects.
    Done,
}

impl SymbolOutcome {
    pub fn matched(multiplier: f64) -> Self {
        Self::Match {
            multiplier,
            options: Vec::new(),
        }
    }

    pub fn matched_with(multiplier: f64, options: Vec<String>) -> Self {
        Self::Match {
            multiplier,
            options,
        }
    }
}

/// The opaque callback capability behind every runnable symbol. A handler
/// that starts async work simply awaits it; the scheduler runs independent
/// handlers concurrently and resumes this one's continuation when its
/// awaited work and watcher both finish.
#[async_trait]
pub trait SymbolHandler: Send + Sync {
    async fn run(&self, task: Arc<Task>) -> CoreResult<SymbolOutcome>;
}

/// Adapter for closure handlers, mostly used by tests and built-in rules.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> SymbolHandler for FnHandler<F>
where
    F: Fn(Arc<Task>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = CoreResult<SymbolOutcome>> + Send,
{
    async fn run(&self, task: Arc<Task>) -> CoreResult<SymbolOutcome> {
        (self.0)(task).await
    }
}
