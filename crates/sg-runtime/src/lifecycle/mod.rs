mod bootstrap;
mod signal;
mod spawn;
mod types;

use std::net::SocketAddr;
use std::time::Duration;

use orion_error::op_context;
use orion_error::prelude::*;
use tokio_util::sync::CancellationToken;

use sg_config::DaemonConfig;

use crate::error::RuntimeResult;

pub use signal::wait_for_signal;

use bootstrap::load_and_register;
use spawn::{spawn_fuzzy_worker, spawn_periodic_tasks, spawn_scan_worker};
use types::TaskGroup;

// ---------------------------------------------------------------------------
// Daemon — the top-level lifecycle handle
// ---------------------------------------------------------------------------

/// Manages the full daemon lifecycle: bootstrap, run, graceful shutdown.
///
/// Task groups are stored in start order and joined in reverse (LIFO)
/// during [`wait`](Self::wait): the scan listener stops first so no new
/// requests arrive while in-flight tasks drain, then the fuzzy listener,
/// then the periodic tasks.
pub struct Daemon {
    cancel: CancellationToken,
    groups: Vec<TaskGroup>,
    scan_addr: SocketAddr,
    fuzzy_addr: SocketAddr,
    drain_deadline: Duration,
}

impl Daemon {
    /// Bootstrap the daemon from a validated [`DaemonConfig`].
    #[tracing::instrument(name = "daemon.start", skip_all, fields(listen = %config.worker.listen))]
    pub async fn start(config: DaemonConfig) -> RuntimeResult<Self> {
        let mut op = op_context!("daemon-bootstrap").with_auto_log();
        op.record("scan_listen", config.worker.listen.as_str());
        op.record("fuzzy_listen", config.fuzzy.listen.as_str());

        let cancel = CancellationToken::new();

        // Phase 1: registration — symbols, backends, stats.
        let data = load_and_register(&config).await?;

        // Phase 2: spawn task groups (start order: periodic → fuzzy → scan).
        let mut groups: Vec<TaskGroup> = Vec::with_capacity(3);
        groups.push(spawn_periodic_tasks(&config, &data, cancel.child_token()));

        let (fuzzy_addr, fuzzy_group) =
            spawn_fuzzy_worker(&config, &data, cancel.child_token()).await?;
        groups.push(fuzzy_group);

        let (scan_addr, scan_group) =
            spawn_scan_worker(&config, &data, cancel.child_token()).await?;
        groups.push(scan_group);

        sg_info!(
            sys,
            scan = %scan_addr,
            fuzzy = %fuzzy_addr,
            symbols = data.schedule.symbol_count(),
            "daemon started"
        );
        op.mark_suc();
        Ok(Self {
            cancel,
            groups,
            scan_addr,
            fuzzy_addr,
            drain_deadline: config.worker.hard_shutdown.as_duration(),
        })
    }

    pub fn scan_addr(&self) -> SocketAddr {
        self.scan_addr
    }

    pub fn fuzzy_addr(&self) -> SocketAddr {
        self.fuzzy_addr
    }

    /// Request graceful shutdown of all workers.
    pub fn shutdown(&self) {
        sg_info!(sys, "initiating graceful shutdown");
        self.cancel.cancel();
    }

    /// Join all task groups after shutdown, LIFO: scan → fuzzy → periodic.
    /// Each group gets the hard drain deadline; leftovers are aborted.
    pub async fn wait(mut self) -> RuntimeResult<()> {
        while let Some(group) = self.groups.pop() {
            let name = group.name;
            sg_debug!(sys, task_group = name, "waiting for task group to finish");
            group.wait(self.drain_deadline).await?;
            sg_debug!(sys, task_group = name, "task group finished");
        }
        Ok(())
    }

    /// Clone of the root cancellation token (for signal integration).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
