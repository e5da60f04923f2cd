use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

// ---------------------------------------------------------------------------
// UpstreamLimits — passive failure-accounting knobs
// ---------------------------------------------------------------------------

/// Failure-window accounting shared by every upstream pool.
///
/// An upstream accumulates errors inside a sliding window of `error_time`;
/// reaching `max_errors` marks it dead for `dead_time`, after which it is
/// considered alive again with a zeroed counter.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamLimits {
    pub max_errors: u32,
    pub error_time: HumanDuration,
    pub dead_time: HumanDuration,
}

impl Default for UpstreamLimits {
    fn default() -> Self {
        Self {
            max_errors: 3,
            error_time: HumanDuration::from(std::time::Duration::from_secs(60)),
            dead_time: HumanDuration::from(std::time::Duration::from_secs(300)),
        }
    }
}

// ---------------------------------------------------------------------------
// RedisServerConfig — where a Redis-backed service lives
// ---------------------------------------------------------------------------

/// Connection settings for a Redis-backed service (fuzzy storage or a
/// statistics backend). `servers` accepts `host[:port][:weight]` entries,
/// comma or whitespace separated.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisServerConfig {
    pub servers: String,
    #[serde(default)]
    pub db: i64,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_redis_timeout")]
    pub timeout: HumanDuration,
    #[serde(default)]
    pub limits: UpstreamLimits,
}

fn default_redis_timeout() -> HumanDuration {
    HumanDuration::from(std::time::Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn limits_defaults() {
        let limits = UpstreamLimits::default();
        assert_eq!(limits.max_errors, 3);
        assert_eq!(limits.error_time.as_duration(), Duration::from_secs(60));
        assert_eq!(limits.dead_time.as_duration(), Duration::from_secs(300));
    }

    #[test]
    fn redis_server_parse() {
        let cfg: RedisServerConfig = toml::from_str(
            r#"
servers = "127.0.0.1:6379,10.0.0.2:6380:2"
db = 4
password = "secret"
"#,
        )
        .unwrap();
        assert_eq!(cfg.db, 4);
        assert_eq!(cfg.password.as_deref(), Some("secret"));
        assert_eq!(cfg.timeout.as_duration(), Duration::from_secs(1));
    }
}
