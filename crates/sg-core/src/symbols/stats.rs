use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// ---------------------------------------------------------------------------
// SymbolStats — per-symbol call accounting and frequency peaks
// ---------------------------------------------------------------------------

/// Invoked when a symbol's observed frequency moves more than two standard
/// deviations away from its moving mean: `(symbol_id, frequency, mean, stddev)`.
pub type PeakCallback = dyn Fn(usize, f64, f64, f64) + Send + Sync;

#[derive(Default, Debug)]
struct PerSymbol {
    hits: AtomicU64,
    /// Insertions (the symbol actually fired), as opposed to calls.
    fires: AtomicU64,
    time_ns_sum: AtomicU64,
    time_ns_sq_sum: AtomicU64,
}

#[derive(Default, Clone, Copy, Debug)]
struct PeakWindow {
    last_hits: u64,
    /// Welford running mean/variance over per-period frequencies.
    samples: u64,
    mean: f64,
    m2: f64,
}

/// Lock-free counters per symbol plus a small mutex-guarded window used
/// only by the periodic refresh tick.
#[derive(Debug)]
pub struct SymbolStats {
    per: Vec<PerSymbol>,
    windows: Mutex<Vec<PeakWindow>>,
}

impl SymbolStats {
    pub fn new(count: usize) -> Self {
        Self {
            per: (0..count).map(|_| PerSymbol::default()).collect(),
            windows: Mutex::new(vec![PeakWindow::default(); count]),
        }
    }

    /// Record one callback invocation and its elapsed time.
    pub fn record_call(&self, id: usize, elapsed: Duration) {
        let Some(p) = self.per.get(id) else { return };
        let ns = elapsed.as_nanos() as u64;
        p.hits.fetch_add(1, Ordering::Relaxed);
        p.time_ns_sum.fetch_add(ns, Ordering::Relaxed);
        p.time_ns_sq_sum
            .fetch_add(ns.saturating_mul(ns), Ordering::Relaxed);
    }

    /// Record that the symbol fired (was inserted into the result).
    pub fn record_fire(&self, id: usize) {
        if let Some(p) = self.per.get(id) {
            p.fires.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn hits(&self, id: usize) -> u64 {
        self.per.get(id).map_or(0, |p| p.hits.load(Ordering::Relaxed))
    }

    pub fn fires(&self, id: usize) -> u64 {
        self.per.get(id).map_or(0, |p| p.fires.load(Ordering::Relaxed))
    }

    /// Mean callback time in seconds.
    pub fn mean_time(&self, id: usize) -> f64 {
        let Some(p) = self.per.get(id) else { return 0.0 };
        let hits = p.hits.load(Ordering::Relaxed);
        if hits == 0 {
            return 0.0;
        }
        p.time_ns_sum.load(Ordering::Relaxed) as f64 / hits as f64 / 1e9
    }

    /// Callback time standard deviation in seconds.
    pub fn stddev_time(&self, id: usize) -> f64 {
        let Some(p) = self.per.get(id) else { return 0.0 };
        let hits = p.hits.load(Ordering::Relaxed) as f64;
        if hits < 2.0 {
            return 0.0;
        }
        let sum = p.time_ns_sum.load(Ordering::Relaxed) as f64;
        let sq = p.time_ns_sq_sum.load(Ordering::Relaxed) as f64;
        let var = (sq - sum * sum / hits) / hits;
        var.max(0.0).sqrt() / 1e9
    }

    /// Periodic refresh: compute each symbol's frequency over the elapsed
    /// period, fold it into the moving window, and report peaks more than
    /// 2σ from the mean.
    pub fn refresh(&self, period: Duration, peak: Option<&PeakCallback>) {
        let secs = period.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let mut windows = self.windows.lock().expect("stats windows poisoned");
        for (id, win) in windows.iter_mut().enumerate() {
            let hits = self.per[id].hits.load(Ordering::Relaxed);
            let freq = (hits - win.last_hits) as f64 / secs;
            win.last_hits = hits;

            // Peak check before folding the sample in, so a burst is
            // compared against history rather than itself.
            if win.samples >= 4 {
                let stddev = (win.m2 / win.samples as f64).sqrt();
                if stddev > 0.0
                    && (freq - win.mean).abs() > 2.0 * stddev
                    && let Some(cb) = peak
                {
                    cb(id, freq, win.mean, stddev);
                }
            }

            win.samples += 1;
            let delta = freq - win.mean;
            win.mean += delta / win.samples as f64;
            win.m2 += delta * (freq - win.mean);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn timing_mean_and_stddev() {
        let stats = SymbolStats::new(1);
        stats.record_call(0, Duration::from_millis(10));
        stats.record_call(0, Duration::from_millis(30));
        assert_eq!(stats.hits(0), 2);
        assert!((stats.mean_time(0) - 0.020).abs() < 1e-6);
        assert!((stats.stddev_time(0) - 0.010).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_id_is_ignored() {
        let stats = SymbolStats::new(1);
        stats.record_call(7, Duration::from_millis(1));
        stats.record_fire(7);
        assert_eq!(stats.hits(7), 0);
    }

    #[test]
    fn steady_frequency_never_peaks() {
        let stats = SymbolStats::new(1);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let cb = move |_id: usize, _f: f64, _m: f64, _s: f64| {
            fired2.fetch_add(1, Ordering::Relaxed);
        };
        for _ in 0..20 {
            for _ in 0..10 {
                stats.record_call(0, Duration::from_micros(5));
            }
            stats.refresh(Duration::from_secs(1), Some(&cb));
        }
        assert_eq!(fired.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn burst_triggers_peak_callback() {
        let stats = SymbolStats::new(1);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let cb = move |_id: usize, freq: f64, mean: f64, stddev: f64| {
            assert!((freq - mean).abs() > 2.0 * stddev);
            fired2.fetch_add(1, Ordering::Relaxed);
        };
        // Noisy-but-low baseline, then a large burst.
        for i in 0..10 {
            for _ in 0..(10 + i % 3) {
                stats.record_call(0, Duration::from_micros(5));
            }
            stats.refresh(Duration::from_secs(1), Some(&cb));
        }
        for _ in 0..500 {
            stats.record_call(0, Duration::from_micros(5));
        }
        stats.refresh(Duration::from_secs(1), Some(&cb));
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }
}
