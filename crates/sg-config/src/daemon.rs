use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::fuzzy::FuzzyConfig;
use crate::logging::LoggingConfig;
use crate::scan::ScanConfig;
use crate::stat::StatConfig;
use crate::validate;
use crate::worker::WorkerConfig;

// ---------------------------------------------------------------------------
// DaemonConfig (parsed, validated)
// ---------------------------------------------------------------------------

/// The full daemon configuration, parsed from `spamgate.toml` and
/// validated. Every section has defaults, so an empty file yields a
/// runnable single-metric daemon with memory backends.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub worker: WorkerConfig,
    pub scan: ScanConfig,
    pub fuzzy: FuzzyConfig,
    pub stat: StatConfig,
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Read and parse a config file. The `SPAMGATE_CONFDIR` environment
    /// variable supplies the directory when `path` is bare.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let resolved = if path.is_relative()
            && let Ok(confdir) = std::env::var("SPAMGATE_CONFDIR")
        {
            Path::new(&confdir).join(path)
        } else {
            path.to_path_buf()
        };
        let content = std::fs::read_to_string(&resolved)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", resolved.display()))?;
        content.parse()
    }
}

impl FromStr for DaemonConfig {
    type Err = anyhow::Error;

    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(toml_str)?;
        validate::validate(&config)?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_TOML: &str = r#"
[worker]
listen = "tcp://127.0.0.1:11333"
max_message_size = "20MB"
task_timeout = "8s"

[scan.metric]
name = "default"
grow_factor = 1.1

[scan.metric.actions]
reject = 15.0
add_header = 6.0
greylist = 4.0

[scan.symbols.TEST_SPAMMY]
score = 5.0
group = "content"

[scan.groups.content]
max_score = 10.0

[fuzzy]
listen = "udp://127.0.0.1:11335"
expire = "2d"
sync_timeout = "1m"
update_ips = ["127.0.0.1/32"]

[[stat.classifiers]]
name = "bayes"

[[stat.classifiers.statfiles]]
label = "bayes_spam"
spam = true

[[stat.classifiers.statfiles]]
label = "bayes_ham"
spam = false

[logging]
level = "info"
"#;

    #[test]
    fn load_full_toml() {
        let cfg: DaemonConfig = FULL_TOML.parse().unwrap();
        assert_eq!(cfg.worker.listen, "tcp://127.0.0.1:11333");
        assert_eq!(cfg.scan.metric.actions.reject, Some(15.0));
        assert_eq!(cfg.fuzzy.update_ips, vec!["127.0.0.1/32"]);
        assert_eq!(cfg.stat.classifiers[0].statfiles.len(), 2);
    }

    #[test]
    fn empty_config_is_valid() {
        let cfg: DaemonConfig = "".parse().unwrap();
        assert_eq!(cfg.scan.metric.name, "default");
    }

    #[test]
    fn reject_symbol_in_unknown_group() {
        let toml = FULL_TOML.replace("group = \"content\"", "group = \"nonexistent\"");
        assert!(toml.parse::<DaemonConfig>().is_err());
    }

    #[test]
    fn reject_bad_listen_scheme() {
        let toml = FULL_TOML.replace("tcp://127.0.0.1:11333", "http://127.0.0.1:11333");
        assert!(toml.parse::<DaemonConfig>().is_err());
    }

    #[test]
    fn reject_bad_update_ip() {
        let toml = FULL_TOML.replace("127.0.0.1/32", "not-a-network");
        assert!(toml.parse::<DaemonConfig>().is_err());
    }

    #[test]
    fn reject_classifier_without_statfiles() {
        let toml = r#"
[[stat.classifiers]]
name = "bayes"
statfiles = []
"#;
        assert!(toml.parse::<DaemonConfig>().is_err());
    }
}
