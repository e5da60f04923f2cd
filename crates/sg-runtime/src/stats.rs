use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde_json::json;

use sg_core::{Action, ScanSchedule};
use sg_fuzzy::FuzzyServerStats;

// ---------------------------------------------------------------------------
// ProcessStats
// ---------------------------------------------------------------------------

/// Process-wide counters. Lock-free single-writer updates from the worker
/// paths; rendered by the `STAT` / `COUNTERS` / `UPTIME` commands.
pub struct ProcessStats {
    start: Instant,
    pub connections: AtomicU64,
    pub scanned: AtomicU64,
    pub spam: AtomicU64,
    pub ham: AtomicU64,
    /// Indexed by [`Action`] severity (reject … no-action).
    pub actions: [AtomicU64; 5],
    pub learned: AtomicU64,
    pub protocol_errors: AtomicU64,
}

impl Default for ProcessStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessStats {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            connections: AtomicU64::new(0),
            scanned: AtomicU64::new(0),
            spam: AtomicU64::new(0),
            ham: AtomicU64::new(0),
            actions: Default::default(),
            learned: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
        }
    }

    pub fn note_scan(&self, action: Action, spam: bool) {
        self.scanned.fetch_add(1, Ordering::Relaxed);
        if spam {
            self.spam.fetch_add(1, Ordering::Relaxed);
        } else {
            self.ham.fetch_add(1, Ordering::Relaxed);
        }
        self.actions[action as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    pub fn reset(&self) {
        self.scanned.store(0, Ordering::Relaxed);
        self.spam.store(0, Ordering::Relaxed);
        self.ham.store(0, Ordering::Relaxed);
        self.learned.store(0, Ordering::Relaxed);
        self.protocol_errors.store(0, Ordering::Relaxed);
        for a in &self.actions {
            a.store(0, Ordering::Relaxed);
        }
    }

    /// `STAT` command body.
    pub fn render_stat(&self, fuzzy: &FuzzyServerStats) -> serde_json::Value {
        json!({
            "uptime": self.uptime_secs(),
            "connections": self.connections.load(Ordering::Relaxed),
            "scanned": self.scanned.load(Ordering::Relaxed),
            "spam": self.spam.load(Ordering::Relaxed),
            "ham": self.ham.load(Ordering::Relaxed),
            "learned": self.learned.load(Ordering::Relaxed),
            "protocol_errors": self.protocol_errors.load(Ordering::Relaxed),
            "actions": {
                "reject": self.actions[0].load(Ordering::Relaxed),
                "rewrite_subject": self.actions[1].load(Ordering::Relaxed),
                "add_header": self.actions[2].load(Ordering::Relaxed),
                "greylist": self.actions[3].load(Ordering::Relaxed),
                "no_action": self.actions[4].load(Ordering::Relaxed),
            },
            "fuzzy_hashes": {
                "checked": fuzzy.checked_total(),
                "found": fuzzy.found_total(),
                "expired": fuzzy.expired.load(Ordering::Relaxed),
                "stored": fuzzy.total_hashes.load(Ordering::Relaxed),
                "invalid": fuzzy.invalid.load(Ordering::Relaxed),
            },
        })
    }

    /// `COUNTERS` command body: per-symbol frequency and timing plus the
    /// roll history of recent scans.
    pub fn render_counters(
        &self,
        schedule: &ScanSchedule,
        history: &RollHistory,
    ) -> serde_json::Value {
        let mut symbols = Vec::new();
        for (id, name) in schedule.symbol_names().enumerate() {
            let hits = schedule.stats.hits(id);
            if hits == 0 && schedule.stats.fires(id) == 0 {
                continue;
            }
            symbols.push(json!({
                "symbol": name,
                "hits": hits,
                "fires": schedule.stats.fires(id),
                "time_mean": schedule.stats.mean_time(id),
                "time_stddev": schedule.stats.stddev_time(id),
            }));
        }
        json!({
            "symbols": symbols,
            "history": history.snapshot(),
        })
    }
}

// ---------------------------------------------------------------------------
// RollHistory
// ---------------------------------------------------------------------------

/// Summary of one finished scan kept for operator introspection.
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub queue_id: Option<String>,
    pub score: f64,
    pub action: &'static str,
    pub symbols: Vec<String>,
    pub scan_time_ms: u64,
    pub unix_time: i64,
}

/// Fixed-size ring of recent scan summaries.
pub struct RollHistory {
    rows: Mutex<VecDeque<ScanSummary>>,
    capacity: usize,
}

impl RollHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, summary: ScanSummary) {
        let mut rows = self.rows.lock().expect("history poisoned");
        if rows.len() == self.capacity && self.capacity > 0 {
            rows.pop_front();
        }
        if self.capacity > 0 {
            rows.push_back(summary);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.lock().expect("history poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().expect("history poisoned").is_empty()
    }

    pub fn snapshot(&self) -> Vec<serde_json::Value> {
        let rows = self.rows.lock().expect("history poisoned");
        rows.iter()
            .map(|s| {
                json!({
                    "queue_id": s.queue_id,
                    "score": s.score,
                    "action": s.action,
                    "symbols": s.symbols,
                    "scan_time_ms": s.scan_time_ms,
                    "unix_time": s.unix_time,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_counters_accumulate() {
        let stats = ProcessStats::new();
        stats.note_scan(Action::Reject, true);
        stats.note_scan(Action::NoAction, false);
        stats.note_scan(Action::NoAction, false);
        assert_eq!(stats.scanned.load(Ordering::Relaxed), 3);
        assert_eq!(stats.spam.load(Ordering::Relaxed), 1);
        assert_eq!(stats.ham.load(Ordering::Relaxed), 2);
        assert_eq!(stats.actions[Action::Reject as usize].load(Ordering::Relaxed), 1);

        stats.reset();
        assert_eq!(stats.scanned.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn stat_json_shape() {
        let stats = ProcessStats::new();
        stats.note_scan(Action::AddHeader, true);
        let fuzzy = FuzzyServerStats::default();
        let v = stats.render_stat(&fuzzy);
        assert_eq!(v["scanned"], 1);
        assert_eq!(v["actions"]["add_header"], 1);
        assert!(v["fuzzy_hashes"]["checked"].is_u64());
    }

    #[test]
    fn history_ring_caps() {
        let history = RollHistory::new(2);
        for i in 0..5 {
            history.push(ScanSummary {
                queue_id: Some(format!("q{i}")),
                score: i as f64,
                action: "no action",
                symbols: vec![],
                scan_time_ms: 1,
                unix_time: 0,
            });
        }
        assert_eq!(history.len(), 2);
        let snap = history.snapshot();
        assert_eq!(snap[0]["queue_id"], "q3");
        assert_eq!(snap[1]["queue_id"], "q4");
    }
}
