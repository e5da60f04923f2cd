#[macro_use]
mod log_macros;

pub mod error;
pub mod lifecycle;
pub mod rules;
pub mod scan_worker;
pub mod stats;
pub mod tracing_init;
pub(crate) mod fuzzy_worker;
pub(crate) mod sync_task;

pub use error::{RuntimeError, RuntimeReason, RuntimeResult};
pub use lifecycle::{Daemon, wait_for_signal};
pub use stats::{ProcessStats, RollHistory, ScanSummary};
