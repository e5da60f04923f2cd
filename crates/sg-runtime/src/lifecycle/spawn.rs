use std::net::SocketAddr;
use std::sync::Arc;

use orion_error::StructError;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;

use sg_config::DaemonConfig;

use crate::error::{RuntimeReason, RuntimeResult};
use crate::fuzzy_worker;
use crate::scan_worker::{ScanWorkerCtx, run_scan_worker};
use crate::sync_task;

use super::bootstrap::BootstrapData;
use super::types::TaskGroup;

// ---------------------------------------------------------------------------
// Phase 2: task spawn helpers — each binds/creates and spawns its group
// ---------------------------------------------------------------------------

fn bind_err(what: &str, e: impl std::fmt::Display) -> crate::error::RuntimeError {
    StructError::from(RuntimeReason::Bootstrap).with_detail(format!("{what}: {e}"))
}

fn strip_scheme<'a>(listen: &'a str, scheme: &str) -> &'a str {
    listen.strip_prefix(scheme).unwrap_or(listen)
}

/// Bind the scan TCP listener and spawn its accept loop.
pub(super) async fn spawn_scan_worker(
    config: &DaemonConfig,
    data: &BootstrapData,
    cancel: CancellationToken,
) -> RuntimeResult<(SocketAddr, TaskGroup)> {
    let addr = strip_scheme(&config.worker.listen, "tcp://");
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| bind_err("scan listener", e))?;
    let local = listener.local_addr().map_err(|e| bind_err("scan listener", e))?;

    let ctx = Arc::new(ScanWorkerCtx {
        worker: config.worker.clone(),
        schedule: Arc::clone(&data.schedule),
        stat: Arc::clone(&data.stat),
        fuzzy: Arc::clone(&data.fuzzy),
        stats: Arc::clone(&data.stats),
        history: Arc::clone(&data.history),
        custom_commands: std::collections::HashMap::new(),
    });
    let mut group = TaskGroup::new("scan");
    group.push(tokio::spawn(run_scan_worker(listener, ctx, cancel)));
    Ok((local, group))
}

/// Bind the fuzzy UDP socket and spawn its receive loop.
pub(super) async fn spawn_fuzzy_worker(
    config: &DaemonConfig,
    data: &BootstrapData,
    cancel: CancellationToken,
) -> RuntimeResult<(SocketAddr, TaskGroup)> {
    let addr = strip_scheme(&config.fuzzy.listen, "udp://");
    let socket = UdpSocket::bind(addr)
        .await
        .map_err(|e| bind_err("fuzzy socket", e))?;
    let local = socket.local_addr().map_err(|e| bind_err("fuzzy socket", e))?;

    let server = Arc::clone(&data.fuzzy);
    let mut group = TaskGroup::new("fuzzy");
    group.push(tokio::spawn(fuzzy_worker::run_fuzzy_worker(
        socket, server, cancel,
    )));
    Ok((local, group))
}

/// Spawn the periodic tasks: fuzzy backend sync and symbol stats refresh.
pub(super) fn spawn_periodic_tasks(
    config: &DaemonConfig,
    data: &BootstrapData,
    cancel: CancellationToken,
) -> TaskGroup {
    let mut group = TaskGroup::new("periodic");

    let server = Arc::clone(&data.fuzzy);
    let sync_interval = config.fuzzy.sync_timeout.as_duration();
    let sync_cancel = cancel.child_token();
    group.push(tokio::spawn(async move {
        sync_task::run_fuzzy_sync(server, sync_interval, sync_cancel).await;
        Ok(())
    }));

    let schedule = Arc::clone(&data.schedule);
    let refresh = config.worker.stats_refresh.as_duration();
    group.push(tokio::spawn(async move {
        sync_task::run_stats_refresh(schedule, refresh, cancel).await;
        Ok(())
    }));

    group
}
