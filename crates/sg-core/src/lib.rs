pub mod error;
pub mod message;
pub mod metric;
pub mod symbols;
pub mod task;

pub use error::{CoreError, CoreReason, CoreResult};
pub use message::{MessageView, TextPartView};
pub use metric::{Action, MetricResult, MetricSettings, SymbolResult};
pub use symbols::{
    CompositeExpr, Condition, FnHandler, ScanSchedule, Scheduler, SymbolCache, SymbolDef,
    SymbolFlags, SymbolHandler, SymbolId, SymbolOutcome, SymbolStats, SymbolType,
};
pub use task::{CacheResult, EventState, PreResult, Session, Task, TaskStage, Watcher};
