use serde::{Deserialize, Serialize};

use crate::upstream::RedisServerConfig;

// ---------------------------------------------------------------------------
// StatBackendKind
// ---------------------------------------------------------------------------

/// Persistence for one statfile, chosen at config load.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StatBackendKind {
    Memory,
    Redis {
        #[serde(flatten)]
        server: RedisServerConfig,
        #[serde(default = "default_stat_prefix")]
        prefix: String,
    },
}

fn default_stat_prefix() -> String {
    "bayes".to_string()
}

impl Default for StatBackendKind {
    fn default() -> Self {
        Self::Memory
    }
}

// ---------------------------------------------------------------------------
// StatfileConfig
// ---------------------------------------------------------------------------

/// Persistent token counts for one class (spam or ham) under a classifier.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StatfileConfig {
    /// Unique label, used as the backend namespace.
    pub label: String,
    /// True for the spam class, false for ham.
    pub spam: bool,
    #[serde(default)]
    pub backend: StatBackendKind,
}

// ---------------------------------------------------------------------------
// ClassifierConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifierConfig {
    pub name: String,
    /// Tokenizer key; classifiers sharing a key share one tokenizer
    /// runtime per task.
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
    /// Below this token count the classifier refuses to run.
    #[serde(default = "default_min_tokens")]
    pub min_tokens: u32,
    /// Above this count tokens past the limit are ignored; `0` disables.
    #[serde(default)]
    pub max_tokens: u32,
    /// Symbol inserted on a spammy verdict.
    #[serde(default = "default_spam_symbol")]
    pub spam_symbol: String,
    /// Symbol inserted on a hammy verdict.
    #[serde(default = "default_ham_symbol")]
    pub ham_symbol: String,
    pub statfiles: Vec<StatfileConfig>,
}

fn default_tokenizer() -> String {
    "osb".to_string()
}

fn default_min_tokens() -> u32 {
    11
}

fn default_spam_symbol() -> String {
    "BAYES_SPAM".to_string()
}

fn default_ham_symbol() -> String {
    "BAYES_HAM".to_string()
}

// ---------------------------------------------------------------------------
// StatConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StatConfig {
    pub classifiers: Vec<ClassifierConfig>,
    /// Tokenize `normalized_words` instead of raw text when true.
    pub strict_tokens: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_classifier() {
        let cfg: StatConfig = toml::from_str(
            r#"
[[classifiers]]
name = "bayes"
min_tokens = 11

[[classifiers.statfiles]]
label = "bayes_spam"
spam = true

[[classifiers.statfiles]]
label = "bayes_ham"
spam = false
"#,
        )
        .unwrap();
        let cl = &cfg.classifiers[0];
        assert_eq!(cl.name, "bayes");
        assert_eq!(cl.tokenizer, "osb");
        assert_eq!(cl.statfiles.len(), 2);
        assert!(cl.statfiles[0].spam);
        assert!(matches!(cl.statfiles[1].backend, StatBackendKind::Memory));
    }

    #[test]
    fn empty_stat_section() {
        let cfg: StatConfig = toml::from_str("").unwrap();
        assert!(cfg.classifiers.is_empty());
        assert!(!cfg.strict_tokens);
    }
}
