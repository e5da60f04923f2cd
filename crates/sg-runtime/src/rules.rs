use std::sync::Arc;

use async_trait::async_trait;
use orion_error::StructError;
use regex::Regex;

use sg_config::RuleConfig;
use sg_core::{
    CacheResult, CoreReason, CoreResult, SymbolHandler, SymbolOutcome, Task,
};
use sg_fuzzy::FuzzyBackend;
use sg_stat::StatContext;

// ---------------------------------------------------------------------------
// RegexRuleHandler — declarative header/body rules
// ---------------------------------------------------------------------------

enum RuleTarget {
    Header(String),
    Body,
}

/// Compiled `[[scan.rules]]` entry: a regular expression matched against a
/// header value or the decoded text parts. Matches are memoized in the
/// task's cache slots so a pattern shared by several symbols scans once.
pub struct RegexRuleHandler {
    target: RuleTarget,
    pattern: Regex,
    cache_key: String,
}

impl RegexRuleHandler {
    pub fn compile(rule: &RuleConfig) -> CoreResult<Self> {
        let pattern = Regex::new(&rule.pattern).map_err(|e| {
            StructError::from(CoreReason::Registration)
                .with_detail(format!("rule {}: bad pattern: {e}", rule.symbol))
        })?;
        let target = match &rule.header {
            Some(header) => RuleTarget::Header(header.clone()),
            None => RuleTarget::Body,
        };
        let cache_key = match &target {
            RuleTarget::Header(h) => format!("re:h:{h}:{}", rule.pattern),
            RuleTarget::Body => format!("re:b:{}", rule.pattern),
        };
        Ok(Self {
            target,
            pattern,
            cache_key,
        })
    }

    fn matches(&self, task: &Task) -> bool {
        if let CacheResult::Value(v) = task.cache_check(&self.cache_key) {
            return v != 0;
        }
        let Some(message) = task.message() else {
            task.cache_set(&self.cache_key, None);
            return false;
        };
        let matched = match &self.target {
            RuleTarget::Header(name) => message
                .header_all(name)
                .iter()
                .any(|value| self.pattern.is_match(value)),
            RuleTarget::Body => message
                .text_parts
                .iter()
                .any(|part| self.pattern.is_match(&part.raw)),
        };
        task.cache_set(&self.cache_key, Some(matched as i64));
        matched
    }
}

#[async_trait]
impl SymbolHandler for RegexRuleHandler {
    async fn run(&self, task: Arc<Task>) -> CoreResult<SymbolOutcome> {
        if self.matches(&task) {
            Ok(SymbolOutcome::matched(1.0))
        } else {
            Ok(SymbolOutcome::NoMatch)
        }
    }
}

// ---------------------------------------------------------------------------
// FuzzyCheckHandler — near-duplicate lookup against fuzzy storage
// ---------------------------------------------------------------------------

/// Checks the message's fuzzy digest against the hash store and inserts
/// the denied symbol on a hit, weighted by the match probability.
pub struct FuzzyCheckHandler {
    backend: Arc<dyn FuzzyBackend>,
    expire: std::time::Duration,
}

impl FuzzyCheckHandler {
    pub fn new(backend: Arc<dyn FuzzyBackend>, expire: std::time::Duration) -> Self {
        Self { backend, expire }
    }
}

#[async_trait]
impl SymbolHandler for FuzzyCheckHandler {
    async fn run(&self, task: Arc<Task>) -> CoreResult<SymbolOutcome> {
        let Some(message) = task.message() else {
            return Ok(SymbolOutcome::NoMatch);
        };
        let mut cmd = sg_fuzzy::FuzzyCmd::new(
            sg_fuzzy::FuzzyCmdKind::Check,
            message.fuzzy_digest(),
        );
        // Shingles let the store answer for near-duplicates, not only
        // byte-identical content.
        cmd.shingles = sg_fuzzy::shingles::generate(message.all_words());
        let hit = self
            .backend
            .check(&cmd, self.expire)
            .await
            .map_err(|e| {
                StructError::from(CoreReason::Callback)
                    .with_detail(format!("fuzzy check: {e}"))
            })?;
        if hit.prob > 0.5 {
            Ok(SymbolOutcome::matched_with(
                hit.prob as f64,
                vec![format!("{}:{}", hit.flag, hit.value)],
            ))
        } else {
            Ok(SymbolOutcome::NoMatch)
        }
    }
}

// ---------------------------------------------------------------------------
// BayesHandler — statistical classification
// ---------------------------------------------------------------------------

/// Runs every configured classifier and inserts the verdict symbols,
/// weighted by confidence.
pub struct BayesHandler {
    stat: Arc<StatContext>,
}

impl BayesHandler {
    pub fn new(stat: Arc<StatContext>) -> Self {
        Self { stat }
    }
}

#[async_trait]
impl SymbolHandler for BayesHandler {
    async fn run(&self, task: Arc<Task>) -> CoreResult<SymbolOutcome> {
        let outcomes = self.stat.classify(&task).await.map_err(|e| {
            StructError::from(CoreReason::Callback).with_detail(format!("classify: {e}"))
        })?;
        for outcome in outcomes {
            sg_debug!(
                stat,
                classifier = %outcome.classifier,
                symbol = %outcome.symbol,
                prob = outcome.verdict.spam_prob,
                "classifier verdict"
            );
            task.insert_symbol(&outcome.symbol, outcome.weight, &[]);
        }
        Ok(SymbolOutcome::Done)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use sg_core::SymbolCache;

    fn task() -> Task {
        let scan: sg_config::ScanConfig = Default::default();
        let cache = SymbolCache::from_config(&scan, 100).unwrap();
        let task = Task::new(cache.post_load().unwrap());
        task.attach_message(
            b"Subject: FREE OFFER\r\nX-Mailer: bulk v2\r\n\r\nClick https://spam.example/now\r\n",
        )
        .unwrap();
        task
    }

    fn rule(header: Option<&str>, body: bool, pattern: &str) -> RuleConfig {
        RuleConfig {
            symbol: "R".to_string(),
            header: header.map(str::to_string),
            body,
            pattern: pattern.to_string(),
            score: None,
            group: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn header_rule_matches() {
        let task = Arc::new(task());
        let handler = RegexRuleHandler::compile(&rule(Some("Subject"), false, "^FREE")).unwrap();
        assert!(matches!(
            handler.run(Arc::clone(&task)).await.unwrap(),
            SymbolOutcome::Match { .. }
        ));

        let no_match = RegexRuleHandler::compile(&rule(Some("Subject"), false, "^PAID")).unwrap();
        assert!(matches!(
            no_match.run(task).await.unwrap(),
            SymbolOutcome::NoMatch
        ));
    }

    #[tokio::test]
    async fn body_rule_matches_and_memoizes() {
        let task = Arc::new(task());
        let handler = RegexRuleHandler::compile(&rule(None, true, "spam\\.example")).unwrap();
        assert!(matches!(
            handler.run(Arc::clone(&task)).await.unwrap(),
            SymbolOutcome::Match { .. }
        ));
        // Second run hits the cache slot.
        assert_eq!(
            task.cache_check(&handler.cache_key),
            CacheResult::Value(1)
        );
        assert!(matches!(
            handler.run(task).await.unwrap(),
            SymbolOutcome::Match { .. }
        ));
    }

    #[test]
    fn bad_pattern_is_a_registration_error() {
        assert!(RegexRuleHandler::compile(&rule(None, true, "(unclosed")).is_err());
    }

    #[tokio::test]
    async fn fuzzy_handler_hits_after_write() {
        use sg_fuzzy::{FuzzyCmd, FuzzyCmdKind, MemoryFuzzyBackend};
        let backend = Arc::new(MemoryFuzzyBackend::new());
        let expire = std::time::Duration::from_secs(3600);

        let task = Arc::new(task());
        let handler = FuzzyCheckHandler::new(backend.clone(), expire);
        assert!(matches!(
            handler.run(Arc::clone(&task)).await.unwrap(),
            SymbolOutcome::NoMatch
        ));

        let mut write = FuzzyCmd::new(
            FuzzyCmdKind::Write,
            task.message().unwrap().fuzzy_digest(),
        );
        write.flag = 1;
        write.value = 10;
        backend.add(&write, expire, "test").await.unwrap();

        match handler.run(task).await.unwrap() {
            SymbolOutcome::Match { multiplier, options } => {
                assert!((multiplier - 1.0).abs() < 1e-6);
                assert_eq!(options, vec!["1:10"]);
            }
            other => panic!("expected a match, got {other:?}"),
        }
    }
}
