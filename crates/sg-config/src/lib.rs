pub mod confighelp;
pub mod daemon;
pub mod fuzzy;
pub mod logging;
pub mod scan;
pub mod settings;
pub mod stat;
pub mod types;
pub mod upstream;
pub mod validate;
pub mod worker;

pub use confighelp::{ConfigDocs, OptionDoc, default_docs};
pub use daemon::DaemonConfig;
pub use fuzzy::{FuzzyBackendConfig, FuzzyConfig};
pub use logging::{LogFormat, LoggingConfig};
pub use scan::{ActionsConfig, CompositeConfig, GroupConfig, MetricConfig, RuleConfig, ScanConfig, SymbolConfig};
pub use settings::{lookup_path, path_f64, path_str};
pub use stat::{ClassifierConfig, StatBackendKind, StatConfig, StatfileConfig};
pub use types::{ByteSize, HumanDuration};
pub use upstream::{RedisServerConfig, UpstreamLimits};
pub use worker::WorkerConfig;
