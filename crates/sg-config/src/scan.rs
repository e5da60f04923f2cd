use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ActionsConfig — thresholds per action level
// ---------------------------------------------------------------------------

/// Score thresholds for the five action levels. A missing threshold means
/// the action is never selected by score (it may still be forced by a
/// prefilter pre-result).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ActionsConfig {
    pub reject: Option<f64>,
    pub rewrite_subject: Option<f64>,
    pub add_header: Option<f64>,
    pub greylist: Option<f64>,
}

impl ActionsConfig {
    /// Thresholds indexed by severity, most severe first:
    /// reject, rewrite-subject, add-header, greylist.
    pub fn limits(&self) -> [Option<f64>; 4] {
        [
            self.reject,
            self.rewrite_subject,
            self.add_header,
            self.greylist,
        ]
    }
}

// ---------------------------------------------------------------------------
// MetricConfig
// ---------------------------------------------------------------------------

/// A named score accumulator with action thresholds. Most deployments run
/// the single `default` metric.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricConfig {
    #[serde(default = "default_metric_name")]
    pub name: String,
    #[serde(default)]
    pub actions: ActionsConfig,
    /// Multiplier applied to each successive positive insertion; `1.0`
    /// disables growth.
    #[serde(default = "default_grow_factor")]
    pub grow_factor: f64,
    /// Subject template used for the `rewrite-subject` action; `%s` is
    /// replaced with the original subject.
    #[serde(default = "default_subject")]
    pub subject: String,
}

fn default_metric_name() -> String {
    "default".to_string()
}

fn default_grow_factor() -> f64 {
    1.0
}

fn default_subject() -> String {
    "***SPAM*** %s".to_string()
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            name: default_metric_name(),
            actions: ActionsConfig::default(),
            grow_factor: default_grow_factor(),
            subject: default_subject(),
        }
    }
}

// ---------------------------------------------------------------------------
// SymbolConfig / GroupConfig
// ---------------------------------------------------------------------------

/// Static score and flags for one symbol, keyed by symbol name in the
/// `[scan.symbols]` table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SymbolConfig {
    pub score: f64,
    #[serde(default)]
    pub description: Option<String>,
    /// Group membership; the group must exist in `[scan.groups]`.
    #[serde(default)]
    pub group: Option<String>,
    /// Cap repeated insertions at one shot.
    #[serde(default)]
    pub one_shot: bool,
    /// Maximum insertions counted for this symbol; `0` means the worker
    /// default applies.
    #[serde(default)]
    pub max_shots: u32,
}

/// A symbols group with an optional positive-score cap.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupConfig {
    /// Positive contributions of member symbols are clipped so the group's
    /// accumulated score never exceeds this; `0.0` disables the cap.
    #[serde(default)]
    pub max_score: f64,
    #[serde(default)]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// CompositeConfig
// ---------------------------------------------------------------------------

/// A composite symbol: fires when `expression` over already-inserted
/// symbols evaluates true. Expressions support `&`, `|`, `!` and
/// parentheses over symbol names.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompositeConfig {
    pub expression: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub group: Option<String>,
}

// ---------------------------------------------------------------------------
// RuleConfig — declarative regexp rules
// ---------------------------------------------------------------------------

/// A declarative content rule: matches a regular expression against a
/// header value or the text body, inserting `symbol` on match.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleConfig {
    pub symbol: String,
    /// Header to inspect; mutually exclusive with `body`.
    #[serde(default)]
    pub header: Option<String>,
    /// Match against decoded text parts when true.
    #[serde(default)]
    pub body: bool,
    pub pattern: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// ScanConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ScanConfig {
    pub metric: MetricConfig,
    /// symbol name → static score/flags.
    pub symbols: HashMap<String, SymbolConfig>,
    /// group name → cap.
    pub groups: HashMap<String, GroupConfig>,
    /// composite symbol name → expression.
    pub composites: HashMap<String, CompositeConfig>,
    /// Declarative regexp rules.
    pub rules: Vec<RuleConfig>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scan_section() {
        let toml = r#"
[metric]
name = "default"
grow_factor = 1.1

[metric.actions]
reject = 15.0
add_header = 6.0

[symbols.TEST_A]
score = 5.0
group = "test"

[symbols.TEST_B]
score = 5.0
group = "test"
one_shot = true

[groups.test]
max_score = 8.0

[composites.TEST_BOTH]
expression = "TEST_A & TEST_B"
score = 1.0

[[rules]]
symbol = "SUBJ_ALL_CAPS"
header = "Subject"
pattern = "^[A-Z ]{8,}$"
score = 2.0
"#;
        let cfg: ScanConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.metric.actions.reject, Some(15.0));
        assert_eq!(cfg.metric.actions.greylist, None);
        assert_eq!(cfg.symbols["TEST_A"].score, 5.0);
        assert!(cfg.symbols["TEST_B"].one_shot);
        assert_eq!(cfg.groups["test"].max_score, 8.0);
        assert_eq!(cfg.composites["TEST_BOTH"].expression, "TEST_A & TEST_B");
        assert_eq!(cfg.rules.len(), 1);
        assert_eq!(cfg.rules[0].header.as_deref(), Some("Subject"));
    }

    #[test]
    fn action_limits_order_most_severe_first() {
        let actions = ActionsConfig {
            reject: Some(15.0),
            rewrite_subject: None,
            add_header: Some(6.0),
            greylist: Some(4.0),
        };
        assert_eq!(
            actions.limits(),
            [Some(15.0), None, Some(6.0), Some(4.0)],
        );
    }

    #[test]
    fn defaults() {
        let cfg: ScanConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.metric.name, "default");
        assert_eq!(cfg.metric.grow_factor, 1.0);
        assert!(cfg.symbols.is_empty());
    }
}
