use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;
use crate::upstream::RedisServerConfig;

// ---------------------------------------------------------------------------
// FuzzyBackendConfig
// ---------------------------------------------------------------------------

/// Storage backend for the fuzzy hash server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FuzzyBackendConfig {
    /// Process-local storage; contents are lost on restart. Suitable for
    /// tests and single-node deployments.
    Memory,
    /// Redis reference backend; `prefix` namespaces every key.
    Redis {
        #[serde(flatten)]
        server: RedisServerConfig,
        #[serde(default = "default_fuzzy_prefix")]
        prefix: String,
    },
}

fn default_fuzzy_prefix() -> String {
    "fuzzy".to_string()
}

impl Default for FuzzyBackendConfig {
    fn default() -> Self {
        Self::Memory
    }
}

// ---------------------------------------------------------------------------
// FuzzyConfig
// ---------------------------------------------------------------------------

/// Fuzzy hash UDP worker settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FuzzyConfig {
    /// UDP listen address, e.g. `"udp://127.0.0.1:11335"`.
    pub listen: String,
    /// Absolute lifetime of stored hashes; reads elide expired entries and
    /// the periodic sync compacts them.
    pub expire: HumanDuration,
    /// Base interval for the periodic backend sync; jittered per fire.
    pub sync_timeout: HumanDuration,
    /// Source networks allowed to issue write/delete commands, in CIDR
    /// form. An empty list rejects every privileged command.
    pub update_ips: Vec<String>,
    pub backend: FuzzyBackendConfig,
    /// Symbol inserted by the scan pipeline when a message's digest is
    /// found in fuzzy storage.
    pub denied_symbol: String,
}

impl Default for FuzzyConfig {
    fn default() -> Self {
        Self {
            listen: "udp://127.0.0.1:11335".to_string(),
            // Two days, the storage default since the first release.
            expire: HumanDuration::from(std::time::Duration::from_secs(172_800)),
            sync_timeout: HumanDuration::from(std::time::Duration::from_secs(60)),
            update_ips: Vec::new(),
            backend: FuzzyBackendConfig::default(),
            denied_symbol: "FUZZY_DENIED".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults() {
        let cfg: FuzzyConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.expire.as_duration(), Duration::from_secs(172_800));
        assert_eq!(cfg.sync_timeout.as_duration(), Duration::from_secs(60));
        assert!(matches!(cfg.backend, FuzzyBackendConfig::Memory));
        assert!(cfg.update_ips.is_empty());
    }

    #[test]
    fn redis_backend() {
        let cfg: FuzzyConfig = toml::from_str(
            r#"
update_ips = ["127.0.0.1/32", "10.0.0.0/8"]

[backend]
kind = "redis"
servers = "127.0.0.1:6379"
prefix = "fz"
"#,
        )
        .unwrap();
        assert_eq!(cfg.update_ips.len(), 2);
        match cfg.backend {
            FuzzyBackendConfig::Redis { prefix, server } => {
                assert_eq!(prefix, "fz");
                assert_eq!(server.servers, "127.0.0.1:6379");
            }
            FuzzyBackendConfig::Memory => panic!("expected redis backend"),
        }
    }
}
