use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use sg_core::ScanSchedule;
use sg_fuzzy::FuzzyServer;

/// `base` scaled by a uniform factor in `[0.5, 1.5]`, so fleet members do
/// not sync in lockstep.
fn jittered(base: Duration) -> Duration {
    base.mul_f64(0.5 + fastrand::f64())
}

/// Periodic fuzzy backend sync at a jittered interval until cancelled.
#[tracing::instrument(name = "fuzzy_sync", skip_all)]
pub(crate) async fn run_fuzzy_sync(
    server: Arc<FuzzyServer>,
    base_interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(jittered(base_interval)) => {
                match server.backend().sync(server.expire()).await {
                    Ok(report) => {
                        if report.expired > 0 {
                            sg_debug!(fuzzy, expired = report.expired, "sync expired hashes");
                        }
                        server.note_expired(report.expired);
                    }
                    Err(e) => {
                        sg_warn!(fuzzy, error = %e, "periodic sync failed");
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

/// Periodic symbol frequency refresh; peaks are surfaced in the log.
#[tracing::instrument(name = "symbol_stats", skip_all)]
pub(crate) async fn run_stats_refresh(
    schedule: Arc<ScanSchedule>,
    period: Duration,
    cancel: CancellationToken,
) {
    let peak_schedule = Arc::clone(&schedule);
    let peak = move |id: usize, freq: f64, mean: f64, stddev: f64| {
        let name = peak_schedule.def(id).name.clone();
        sg_warn!(
            scan,
            symbol = %name,
            freq,
            mean,
            stddev,
            "symbol frequency peak"
        );
    };
    let mut tick = tokio::time::interval(period);
    tick.tick().await; // the first tick fires immediately
    loop {
        tokio::select! {
            _ = tick.tick() => {
                schedule.stats.refresh(period, Some(&peak));
            }
            _ = cancel.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_bounds() {
        for _ in 0..64 {
            let d = jittered(Duration::from_secs(60));
            assert!(d >= Duration::from_secs(30));
            assert!(d <= Duration::from_secs(90));
        }
    }
}
