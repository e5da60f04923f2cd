//! Shared fixtures for scheduler and metric tests.

use std::sync::{Arc, Mutex};

use crate::metric::MetricSettings;
use crate::task::Task;

use super::registry::{ScanSchedule, SymbolCache};
use super::{
    Condition, FnHandler, SymbolFlags, SymbolHandler, SymbolId, SymbolOutcome, SymbolType,
};

/// Build a frozen schedule from `(name, score, group)` triples plus group
/// caps, a grow factor and an optional reject threshold.
pub(crate) fn schedule_with(
    symbols: &[(&str, f64, Option<&str>)],
    groups: &[(&str, f64)],
    grow_factor: f64,
    reject: Option<f64>,
) -> Arc<ScanSchedule> {
    let metric = MetricSettings {
        name: "default".into(),
        grow_factor,
        action_limits: [reject, None, None, None],
        subject: "***SPAM*** %s".into(),
    };
    let mut cache = SymbolCache::new(metric, 100);
    for (name, max_score) in groups {
        cache.set_group(name, *max_score);
    }
    for (name, score, group) in symbols {
        let id = cache
            .add_symbol(name, 0, SymbolType::Normal, None)
            .expect("unique test symbol");
        cache.set_score(id, *score, *group);
    }
    cache.post_load().expect("test schedule")
}

/// Incremental builder used by scheduler tests.
pub(crate) struct CacheBuilder {
    cache: SymbolCache,
}

impl CacheBuilder {
    pub(crate) fn new() -> Self {
        let metric = MetricSettings {
            name: "default".into(),
            grow_factor: 1.0,
            action_limits: [Some(15.0), None, None, None],
            subject: "***SPAM*** %s".into(),
        };
        Self {
            cache: SymbolCache::new(metric, 100),
        }
    }

    pub(crate) fn group(&mut self, name: &str, max_score: f64) {
        self.cache.set_group(name, max_score);
    }

    /// Scored symbol whose handler always matches with multiplier 1.
    pub(crate) fn symbol(&mut self, name: &str, priority: i32, score: f64) -> SymbolId {
        let handler: Arc<dyn SymbolHandler> =
            Arc::new(FnHandler(|_t: Arc<Task>| async { Ok(SymbolOutcome::matched(1.0)) }));
        let id = self
            .cache
            .add_symbol(name, priority, SymbolType::Normal, Some(handler))
            .expect("unique test symbol");
        self.cache.set_score(id, score, None);
        id
    }

    pub(crate) fn symbol_grouped(
        &mut self,
        name: &str,
        priority: i32,
        score: f64,
        group: &str,
    ) -> SymbolId {
        let id = self.symbol(name, priority, score);
        self.cache.set_score(id, score, Some(group));
        id
    }

    pub(crate) fn symbol_with(
        &mut self,
        name: &str,
        priority: i32,
        score: f64,
        handler: Arc<dyn SymbolHandler>,
    ) -> SymbolId {
        let id = self
            .cache
            .add_symbol(name, priority, SymbolType::Normal, Some(handler))
            .expect("unique test symbol");
        self.cache.set_score(id, score, None);
        id
    }

    pub(crate) fn prefilter_with(
        &mut self,
        name: &str,
        priority: i32,
        handler: Arc<dyn SymbolHandler>,
    ) -> SymbolId {
        self.cache
            .add_symbol(name, priority, SymbolType::Prefilter, Some(handler))
            .expect("unique test symbol")
    }

    pub(crate) fn postfilter_with(
        &mut self,
        name: &str,
        priority: i32,
        handler: Arc<dyn SymbolHandler>,
    ) -> SymbolId {
        self.cache
            .add_symbol(name, priority, SymbolType::Postfilter, Some(handler))
            .expect("unique test symbol")
    }

    pub(crate) fn callback_with_virtual(
        &mut self,
        parent: &str,
        child: &str,
        priority: i32,
        handler: Arc<dyn SymbolHandler>,
    ) {
        let pid = self
            .cache
            .add_symbol(parent, priority, SymbolType::Callback, Some(handler))
            .expect("unique test symbol");
        let cid = self.cache.add_virtual(child, pid).expect("virtual child");
        self.cache.set_score(cid, 1.0, None);
    }

    pub(crate) fn composite(&mut self, name: &str, expression: &str, score: f64) {
        self.cache
            .register_composite(name, expression, score, None)
            .expect("composite");
    }

    pub(crate) fn dep(&mut self, src: &str, dep: &str) {
        self.cache.add_dependency(src, dep).expect("dependency");
    }

    pub(crate) fn condition<C: Condition + 'static>(&mut self, id: SymbolId, condition: C) {
        self.cache.add_condition(id, Arc::new(condition)).expect("condition");
    }

    pub(crate) fn fine(&mut self, id: SymbolId) {
        self.cache.set_flags(
            id,
            SymbolFlags {
                fine: true,
                ..SymbolFlags::default()
            },
        );
    }

    pub(crate) fn build(self) -> Arc<ScanSchedule> {
        self.cache.post_load().expect("test schedule")
    }
}

type OrderLog = Arc<Mutex<Vec<String>>>;

/// Returns a shared call-order log plus a factory producing handlers that
/// record their name and return a fixed outcome.
pub(crate) fn order_recorder() -> (
    OrderLog,
    impl Fn(&'static str, SymbolOutcome) -> Arc<dyn SymbolHandler>,
) {
    let log: OrderLog = Arc::new(Mutex::new(Vec::new()));
    let log2 = Arc::clone(&log);
    let factory = move |name: &'static str, outcome: SymbolOutcome| {
        let log = Arc::clone(&log2);
        let handler: Arc<dyn SymbolHandler> = Arc::new(FnHandler(move |_t: Arc<Task>| {
            let log = Arc::clone(&log);
            let outcome = outcome.clone();
            async move {
                log.lock().expect("order log").push(name.to_string());
                Ok(outcome)
            }
        }));
        handler
    };
    (log, factory)
}
