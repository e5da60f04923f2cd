mod cache;
mod session;

use std::net::IpAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use serde_json::Value;

use crate::error::CoreResult;
use crate::message::MessageView;
use crate::metric::{Action, MetricResult, SymbolResult};
use crate::symbols::ScanSchedule;

pub use cache::{CacheResult, CacheSlots};
pub use session::{EventState, Session, Watcher};

// ---------------------------------------------------------------------------
// TaskStage
// ---------------------------------------------------------------------------

/// Monotonically advancing pipeline position of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TaskStage {
    New = 0,
    Prefilters = 1,
    Filters = 2,
    Composites = 3,
    Postfilters = 4,
    Done = 5,
}

impl TaskStage {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::New,
            1 => Self::Prefilters,
            2 => Self::Filters,
            3 => Self::Composites,
            4 => Self::Postfilters,
            _ => Self::Done,
        }
    }
}

// ---------------------------------------------------------------------------
// PreResult
// ---------------------------------------------------------------------------

/// An action forced by a prefilter before scoring finishes.
#[derive(Debug, Clone)]
pub struct PreResult {
    pub action: Action,
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Per-message scan context. Created on request receipt, torn down after
/// the reply is written and every registered async event has fired or
/// been cancelled. All task-scoped state lives here and drops with it.
pub struct Task {
    schedule: Arc<ScanSchedule>,
    message: OnceLock<MessageView>,
    result: Mutex<MetricResult>,
    pre_result: Mutex<Option<PreResult>>,
    cache: Mutex<CacheSlots>,
    session: Session,
    watchers: Mutex<Vec<Arc<Watcher>>>,
    settings: OnceLock<Value>,
    stage: AtomicU8,
    client_ip: OnceLock<IpAddr>,
    queue_id: OnceLock<String>,
}

impl Task {
    pub fn new(schedule: Arc<ScanSchedule>) -> Self {
        let mut result = MetricResult::new(schedule.metric());
        // Runtime overrides (ADD_ACTION) replace the static thresholds.
        result.action_limits = schedule.action_limits();
        Self {
            schedule,
            message: OnceLock::new(),
            result: Mutex::new(result),
            pre_result: Mutex::new(None),
            cache: Mutex::new(CacheSlots::default()),
            session: Session::new(),
            watchers: Mutex::new(Vec::new()),
            settings: OnceLock::new(),
            stage: AtomicU8::new(TaskStage::New as u8),
            client_ip: OnceLock::new(),
            queue_id: OnceLock::new(),
        }
    }

    /// Parse and attach the message body. May be called once.
    pub fn attach_message(&self, raw: &[u8]) -> CoreResult<()> {
        let view = MessageView::parse(raw)?;
        let _ = self.message.set(view);
        Ok(())
    }

    pub fn message(&self) -> Option<&MessageView> {
        self.message.get()
    }

    pub fn schedule(&self) -> &Arc<ScanSchedule> {
        &self.schedule
    }

    // -- envelope ---------------------------------------------------------

    pub fn set_client_ip(&self, ip: IpAddr) {
        let _ = self.client_ip.set(ip);
    }

    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip.get().copied()
    }

    pub fn set_queue_id(&self, id: &str) {
        let _ = self.queue_id.set(id.to_string());
    }

    pub fn queue_id(&self) -> Option<&str> {
        self.queue_id.get().map(String::as_str)
    }

    pub fn set_settings(&self, settings: Value) {
        let _ = self.settings.set(settings);
    }

    pub fn settings(&self) -> Option<&Value> {
        self.settings.get()
    }

    // -- stage ------------------------------------------------------------

    pub fn stage(&self) -> TaskStage {
        TaskStage::from_u8(self.stage.load(Ordering::Acquire))
    }

    /// Advance the stage; it never moves backwards.
    pub fn advance_stage(&self, stage: TaskStage) {
        self.stage.fetch_max(stage as u8, Ordering::AcqRel);
    }

    // -- results ----------------------------------------------------------

    /// Insert a fired symbol with a weight multiplier and options; returns
    /// a snapshot of the symbol result.
    pub fn insert_symbol(&self, name: &str, multiplier: f64, options: &[&str]) -> SymbolResult {
        self.insert_symbol_inner(name, multiplier, options, false)
    }

    /// Single-shot variant: a repeated insertion replaces a less
    /// significant same-sign score instead of accumulating.
    pub fn insert_symbol_single(
        &self,
        name: &str,
        multiplier: f64,
        options: &[&str],
    ) -> SymbolResult {
        self.insert_symbol_inner(name, multiplier, options, true)
    }

    fn insert_symbol_inner(
        &self,
        name: &str,
        multiplier: f64,
        options: &[&str],
        single: bool,
    ) -> SymbolResult {
        let mut result = self.result.lock().expect("task result poisoned");
        let snapshot = result
            .insert(
                &self.schedule,
                name,
                multiplier,
                options,
                single,
                self.settings.get(),
            )
            .clone();
        if let Some(id) = self.schedule.lookup(name) {
            self.schedule.stats.record_fire(id);
        }
        snapshot
    }

    /// Append an option to an already-inserted symbol.
    pub fn add_result_option(&self, symbol: &str, option: &str) -> bool {
        let mut result = self.result.lock().expect("task result poisoned");
        result.add_option(&self.schedule, symbol, option)
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.result.lock().expect("task result poisoned").has_symbol(name)
    }

    /// Run a closure over the locked metric result.
    pub fn with_result<R>(&self, f: impl FnOnce(&MetricResult) -> R) -> R {
        f(&self.result.lock().expect("task result poisoned"))
    }

    pub(crate) fn with_result_mut<R>(&self, f: impl FnOnce(&mut MetricResult) -> R) -> R {
        f(&mut self.result.lock().expect("task result poisoned"))
    }

    /// Force an action from a prefilter. A more severe action wins over a
    /// previously set one.
    pub fn set_pre_result(&self, action: Action, message: Option<String>) {
        let mut pre = self.pre_result.lock().expect("pre-result poisoned");
        match &*pre {
            Some(existing) if existing.action <= action => {}
            _ => *pre = Some(PreResult { action, message }),
        }
    }

    pub fn pre_result(&self) -> Option<PreResult> {
        self.pre_result.lock().expect("pre-result poisoned").clone()
    }

    /// Final action selection over the accumulated score.
    pub fn check_action(&self) -> Action {
        let pre = self.pre_result().map(|p| p.action);
        self.with_result_mut(|r| r.check_action(pre))
    }

    // -- cache slots -------------------------------------------------------

    pub fn cache_check(&self, key: &str) -> CacheResult {
        self.cache.lock().expect("task cache poisoned").check(key)
    }

    pub fn cache_set(&self, key: &str, value: Option<i64>) {
        self.cache.lock().expect("task cache poisoned").set(key, value)
    }

    // -- async session and watchers ---------------------------------------

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Install a new current watcher; events registered while it is
    /// current count toward its aggregate callback. Watchers nest.
    pub fn watcher_push(&self, callback: Option<Box<dyn FnOnce() + Send>>) -> Arc<Watcher> {
        let watcher = Watcher::new(callback);
        self.watchers
            .lock()
            .expect("watchers poisoned")
            .push(Arc::clone(&watcher));
        watcher
    }

    pub fn watcher_pop(&self) {
        self.watchers.lock().expect("watchers poisoned").pop();
    }

    pub fn current_watcher(&self) -> Option<Arc<Watcher>> {
        self.watchers.lock().expect("watchers poisoned").last().cloned()
    }

    /// Register async work on the session under the current watcher.
    pub fn session_add_event(
        &self,
        key: u64,
        tag: impl Into<String>,
        fin: Option<Box<dyn FnOnce(EventState) + Send>>,
    ) -> bool {
        self.session.add_event(key, tag, fin, self.current_watcher())
    }

    pub fn session_remove_event(&self, key: u64, tag: &str) -> bool {
        self.session.remove_event(key, tag)
    }

    /// Deadline cancellation: pending events get the `Cancelled` sentinel.
    pub fn cancel_pending(&self) {
        self.session.cancel_all();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::test_support::schedule_with;

    fn task() -> Task {
        Task::new(schedule_with(
            &[("A", 2.0, None), ("B", 3.0, None)],
            &[],
            1.0,
            Some(15.0),
        ))
    }

    #[test]
    fn insert_and_options() {
        let t = task();
        t.insert_symbol("A", 1.0, &["one"]);
        t.add_result_option("A", "two");
        t.add_result_option("A", "two");
        t.with_result(|r| {
            let s = r.symbol("A").unwrap();
            assert_eq!(s.score, 2.0);
            assert_eq!(s.options, vec!["one", "two"]);
        });
    }

    #[test]
    fn stage_is_monotonic() {
        let t = task();
        t.advance_stage(TaskStage::Filters);
        t.advance_stage(TaskStage::Prefilters);
        assert_eq!(t.stage(), TaskStage::Filters);
    }

    #[test]
    fn pre_result_keeps_most_severe() {
        let t = task();
        t.set_pre_result(Action::AddHeader, None);
        t.set_pre_result(Action::Reject, Some("blocked".into()));
        t.set_pre_result(Action::Greylist, None);
        assert_eq!(t.pre_result().unwrap().action, Action::Reject);
    }

    #[test]
    fn settings_set_once() {
        let t = task();
        t.set_settings(serde_json::json!({"a": 1}));
        t.set_settings(serde_json::json!({"a": 2}));
        assert_eq!(t.settings().unwrap()["a"], 1);
    }

    #[test]
    fn watcher_stack_nests() {
        let t = task();
        let outer = t.watcher_push(None);
        let inner = t.watcher_push(None);
        assert!(Arc::ptr_eq(&t.current_watcher().unwrap(), &inner));
        t.watcher_pop();
        assert!(Arc::ptr_eq(&t.current_watcher().unwrap(), &outer));
        t.watcher_pop();
        assert!(t.current_watcher().is_none());
    }

    #[test]
    fn session_event_attaches_current_watcher() {
        let t = task();
        let watcher = t.watcher_push(None);
        t.session_add_event(1, "lookup", None);
        assert_eq!(watcher.pending(), 1);
        t.session_remove_event(1, "lookup");
        assert_eq!(watcher.pending(), 0);
        assert!(t.session().is_empty());
    }
}
