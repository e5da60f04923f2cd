use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Watcher — groups async events under one aggregate continuation
// ---------------------------------------------------------------------------

/// Groups several async events so one aggregate callback fires when the
/// last of them finishes. Watchers hold a counter, never their events.
pub struct Watcher {
    pending: AtomicUsize,
    drained: Notify,
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Watcher {
    pub(crate) fn new(callback: Option<Box<dyn FnOnce() + Send>>) -> Arc<Self> {
        Arc::new(Self {
            pending: AtomicUsize::new(0),
            drained: Notify::new(),
            callback: Mutex::new(callback),
        })
    }

    pub(crate) fn retain(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        let prev = self.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "watcher released below zero");
        if prev == 1 {
            if let Some(cb) = self.callback.lock().expect("watcher poisoned").take() {
                cb();
            }
            self.drained.notify_waiters();
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait until every event registered under this watcher has finished.
    /// Returns immediately when nothing is pending.
    pub async fn drained(&self) {
        loop {
            if self.pending() == 0 {
                return;
            }
            let notified = self.drained.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Session — the task's pending async event set
// ---------------------------------------------------------------------------

/// How a pending event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    /// The async work completed and removed its event.
    Completed,
    /// The task was finalized first; a late arrival must detect this and
    /// skip result insertion.
    Cancelled,
}

struct PendingEvent {
    key: u64,
    tag: String,
    fin: Option<Box<dyn FnOnce(EventState) + Send>>,
    watcher: Option<Arc<Watcher>>,
}

/// The per-task async session: a set of pending events, each identified
/// by `(key, tag)`. The task may move to reply only when the set is empty
/// and the pipeline has reached its terminal stage.
#[derive(Default)]
pub struct Session {
    events: Mutex<Vec<PendingEvent>>,
    empty: Notify,
    finalized: AtomicBool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register async work. Returns false when the session is already
    /// finalized (the work should not start).
    pub fn add_event(
        &self,
        key: u64,
        tag: impl Into<String>,
        fin: Option<Box<dyn FnOnce(EventState) + Send>>,
        watcher: Option<Arc<Watcher>>,
    ) -> bool {
        if self.finalized.load(Ordering::Acquire) {
            return false;
        }
        if let Some(w) = &watcher {
            w.retain();
        }
        let mut events = self.events.lock().expect("session poisoned");
        events.push(PendingEvent {
            key,
            tag: tag.into(),
            fin,
            watcher,
        });
        true
    }

    /// Complete and remove one event. Returns false when no such event is
    /// pending (e.g. it was already cancelled).
    pub fn remove_event(&self, key: u64, tag: &str) -> bool {
        let event = {
            let mut events = self.events.lock().expect("session poisoned");
            let idx = events.iter().position(|e| e.key == key && e.tag == tag);
            idx.map(|i| events.remove(i))
        };
        let Some(mut event) = event else {
            return false;
        };
        if let Some(fin) = event.fin.take() {
            fin(EventState::Completed);
        }
        if let Some(w) = event.watcher.take() {
            w.release();
        }
        self.notify_if_empty();
        true
    }

    /// Cancel everything still pending: each fin callback runs with the
    /// `Cancelled` sentinel, watchers are released, and no further events
    /// can be added.
    pub fn cancel_all(&self) {
        self.finalized.store(true, Ordering::Release);
        let drained: Vec<PendingEvent> = {
            let mut events = self.events.lock().expect("session poisoned");
            events.drain(..).collect()
        };
        for mut event in drained {
            tracing::debug!(tag = %event.tag, "cancelling pending event");
            if let Some(fin) = event.fin.take() {
                fin(EventState::Cancelled);
            }
            if let Some(w) = event.watcher.take() {
                w.release();
            }
        }
        self.empty.notify_waiters();
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().expect("session poisoned").is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.events.lock().expect("session poisoned").len()
    }

    /// Wait for the pending set to drain.
    pub async fn wait_empty(&self) {
        loop {
            if self.is_empty() {
                return;
            }
            let notified = self.empty.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn notify_if_empty(&self) {
        if self.is_empty() {
            self.empty.notify_waiters();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
