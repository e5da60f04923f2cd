use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Logging configuration. All fields default so the whole `[logging]`
/// section may be omitted.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global level filter (e.g. `"info"`, `"debug"`). Overridden by the
    /// `SPAMGATE_LOG_LEVEL` environment variable, which is in turn
    /// overridden by `RUST_LOG`.
    pub level: String,
    /// Per-module overrides, e.g. `{ "sg_runtime::scan_worker" = "debug" }`.
    pub modules: HashMap<String, String>,
    /// Optional log file; relative paths resolve against the config file's
    /// directory. Reopened on SIGHUP.
    pub file: Option<PathBuf>,
    /// `plain` or `json`.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            modules: HashMap::new(),
            file: None,
            format: LogFormat::Plain,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}
