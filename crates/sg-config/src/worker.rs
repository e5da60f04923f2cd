use serde::{Deserialize, Serialize};

use crate::types::{ByteSize, HumanDuration};

/// Scan worker settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Listen address for the scan protocol, e.g. `"tcp://127.0.0.1:11333"`.
    pub listen: String,
    /// Requests with a larger `Content-Length` are rejected with a
    /// 413-equivalent reply.
    pub max_message_size: ByteSize,
    /// Per-task deadline; pending async events are cancelled when it fires
    /// and the task replies with whatever it has.
    pub task_timeout: HumanDuration,
    /// After a shutdown signal, no new requests are accepted; in-flight
    /// tasks may drain until this deadline.
    pub soft_shutdown: HumanDuration,
    /// Hard deadline after which remaining tasks are aborted.
    pub hard_shutdown: HumanDuration,
    /// Default cap on repeated insertions of one symbol.
    pub max_shots: u32,
    /// Size of the roll history ring kept for `COUNTERS`.
    pub history_rows: usize,
    /// Refresh period for symbol frequency/peak accounting.
    pub stats_refresh: HumanDuration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listen: "tcp://127.0.0.1:11333".to_string(),
            max_message_size: ByteSize::from(50 * 1024 * 1024),
            task_timeout: HumanDuration::from(std::time::Duration::from_secs(8)),
            soft_shutdown: HumanDuration::from(std::time::Duration::from_secs(10)),
            hard_shutdown: HumanDuration::from(std::time::Duration::from_secs(30)),
            max_shots: 100,
            history_rows: 200,
            stats_refresh: HumanDuration::from(std::time::Duration::from_secs(60)),
        }
    }
}
