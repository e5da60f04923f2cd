use tokio_util::sync::CancellationToken;

/// Block until a termination signal arrives, then cancel the daemon.
/// SIGHUP does not terminate: it fires the log-reopen hook and keeps
/// waiting.
pub async fn wait_for_signal(cancel: CancellationToken, reopen_logs: impl Fn()) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to listen for SIGTERM");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to listen for SIGHUP");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    sg_info!(sys, signal = "SIGINT", "received signal, initiating graceful shutdown");
                    break;
                }
                _ = sigterm.recv() => {
                    sg_info!(sys, signal = "SIGTERM", "received signal, initiating graceful shutdown");
                    break;
                }
                _ = sighup.recv() => {
                    sg_info!(sys, signal = "SIGHUP", "reopening logs");
                    reopen_logs();
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = &reopen_logs;
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for Ctrl-C");
        sg_info!(sys, "received shutdown signal, initiating graceful shutdown");
    }
    cancel.cancel();
}
