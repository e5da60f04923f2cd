use std::sync::Arc;

use orion_error::StructError;

use sg_config::{DaemonConfig, FuzzyBackendConfig, validate::parse_cidr};
use sg_core::{ScanSchedule, SymbolCache, SymbolType};
use sg_fuzzy::{FuzzyBackend, FuzzyServer, MemoryFuzzyBackend, RedisFuzzyBackend};
use sg_net::{RedisPool, RedisPoolConfig};
use sg_stat::StatContext;

use crate::error::{RuntimeReason, RuntimeResult};
use crate::rules::{BayesHandler, FuzzyCheckHandler, RegexRuleHandler};
use crate::stats::{ProcessStats, RollHistory};

// Default scores for built-in symbols the operator did not configure.
const DEFAULT_FUZZY_SCORE: f64 = 5.0;
const DEFAULT_BAYES_SPAM_SCORE: f64 = 3.0;
const DEFAULT_BAYES_HAM_SCORE: f64 = -2.0;

/// Everything bootstrap produces, ready for task spawning.
pub(super) struct BootstrapData {
    pub schedule: Arc<ScanSchedule>,
    pub stat: Arc<StatContext>,
    pub fuzzy: Arc<FuzzyServer>,
    pub stats: Arc<ProcessStats>,
    pub history: Arc<RollHistory>,
}

fn bootstrap_err(detail: impl Into<String>) -> crate::error::RuntimeError {
    StructError::from(RuntimeReason::Bootstrap).with_detail(detail.into())
}

/// Phase 1: build the symbol schedule, statistics context and fuzzy
/// server from the validated config.
pub(super) async fn load_and_register(config: &DaemonConfig) -> RuntimeResult<BootstrapData> {
    let redis_pool = RedisPool::new(RedisPoolConfig::default());

    // Symbol registration: config symbols/groups/composites first, then
    // the built-in rules attach their callbacks.
    let mut cache = SymbolCache::from_config(&config.scan, config.worker.max_shots)
        .map_err(|e| bootstrap_err(format!("scan config: {e}")))?;

    for rule in &config.scan.rules {
        let handler = RegexRuleHandler::compile(rule)
            .map_err(|e| bootstrap_err(format!("rule {}: {e}", rule.symbol)))?;
        let id = cache.add_symbol_optional(
            &rule.symbol,
            0,
            SymbolType::Normal,
            Some(Arc::new(handler)),
        );
        if let Some(score) = rule.score {
            cache.set_score(id, score, rule.group.as_deref());
        }
    }

    // Fuzzy storage backend and server.
    let backend: Arc<dyn FuzzyBackend> = match &config.fuzzy.backend {
        FuzzyBackendConfig::Memory => Arc::new(MemoryFuzzyBackend::new()),
        FuzzyBackendConfig::Redis { server, prefix } => Arc::new(
            RedisFuzzyBackend::new(server, prefix, Arc::clone(&redis_pool))
                .map_err(|e| bootstrap_err(format!("fuzzy backend: {e}")))?,
        ),
    };
    let mut update_nets = Vec::with_capacity(config.fuzzy.update_ips.len());
    for net in &config.fuzzy.update_ips {
        update_nets
            .push(parse_cidr(net).map_err(|e| bootstrap_err(format!("update_ips: {e}")))?);
    }
    let fuzzy = Arc::new(FuzzyServer::new(
        Arc::clone(&backend),
        update_nets,
        config.fuzzy.expire.as_duration(),
    ));
    sg_info!(fuzzy, backend = %backend.id(), "fuzzy backend ready");

    // The fuzzy check rule scans every message against the hash store.
    let denied = &config.fuzzy.denied_symbol;
    let id = cache.add_symbol_optional(
        denied,
        0,
        SymbolType::Normal,
        Some(Arc::new(FuzzyCheckHandler::new(
            Arc::clone(&backend),
            config.fuzzy.expire.as_duration(),
        ))),
    );
    if !config.scan.symbols.contains_key(denied) {
        cache.set_score(id, DEFAULT_FUZZY_SCORE, None);
    }

    // Statistics: one callback symbol drives every classifier; verdict
    // symbols are virtual children unless the operator scored them.
    let stat = Arc::new(
        StatContext::from_config(&config.stat, Arc::clone(&redis_pool))
            .await
            .map_err(|e| bootstrap_err(format!("stat config: {e}")))?,
    );
    if stat.has_classifiers() {
        let parent = cache
            .add_symbol(
                "BAYES_CHECK",
                0,
                SymbolType::Callback,
                Some(Arc::new(BayesHandler::new(Arc::clone(&stat)))),
            )
            .map_err(|e| bootstrap_err(format!("bayes registration: {e}")))?;
        for cl in &config.stat.classifiers {
            for (symbol, default_score) in [
                (&cl.spam_symbol, DEFAULT_BAYES_SPAM_SCORE),
                (&cl.ham_symbol, DEFAULT_BAYES_HAM_SCORE),
            ] {
                if cache.lookup(symbol).is_none() {
                    let vid = cache
                        .add_virtual(symbol, parent)
                        .map_err(|e| bootstrap_err(format!("classifier symbols: {e}")))?;
                    cache.set_score(vid, default_score, None);
                }
            }
        }
    }

    let schedule = cache
        .post_load()
        .map_err(|e| bootstrap_err(format!("symbol schedule: {e}")))?;
    sg_info!(
        conf,
        symbols = schedule.symbol_count(),
        classifiers = stat.classifier_names().len(),
        "symbol schedule frozen"
    );

    Ok(BootstrapData {
        schedule,
        stat,
        fuzzy,
        stats: Arc::new(ProcessStats::new()),
        history: Arc::new(RollHistory::new(config.worker.history_rows)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_from_default_config() {
        let config: DaemonConfig = "".parse().unwrap();
        let data = load_and_register(&config).await.unwrap();
        // The fuzzy check rule registers even with an empty scan table.
        assert!(data.schedule.def_by_name("FUZZY_DENIED").is_some());
        assert!(!data.stat.has_classifiers());
    }

    #[tokio::test]
    async fn bootstrap_registers_bayes_virtuals() {
        let config: DaemonConfig = r#"
[[stat.classifiers]]
name = "bayes"

[[stat.classifiers.statfiles]]
label = "s"
spam = true

[[stat.classifiers.statfiles]]
label = "h"
spam = false
"#
        .parse()
        .unwrap();
        let data = load_and_register(&config).await.unwrap();
        let spam = data.schedule.def_by_name("BAYES_SPAM").unwrap();
        assert_eq!(spam.ty, SymbolType::Virtual);
        assert_eq!(spam.weight(), DEFAULT_BAYES_SPAM_SCORE);
        assert!(data.schedule.def_by_name("BAYES_CHECK").is_some());
    }

    #[tokio::test]
    async fn bootstrap_honors_configured_scores() {
        let config: DaemonConfig = r#"
[scan.symbols.FUZZY_DENIED]
score = 9.5
"#
        .parse()
        .unwrap();
        let data = load_and_register(&config).await.unwrap();
        assert_eq!(
            data.schedule.def_by_name("FUZZY_DENIED").unwrap().weight(),
            9.5,
        );
    }

    #[tokio::test]
    async fn bootstrap_rejects_bad_rule_pattern() {
        let config: DaemonConfig = r#"
[[scan.rules]]
symbol = "BAD"
body = true
pattern = "(unclosed"
"#
        .parse()
        .unwrap();
        assert!(load_and_register(&config).await.is_err());
    }
}
