use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::sync::CancellationToken;

use sg_core::{Action, ScanSchedule, Scheduler, Task, TaskStage};
use sg_fuzzy::{FuzzyCmd, FuzzyCmdKind, FuzzyServer};
use sg_proto::{Command, Protocol, ReplyData, ScanRequest, SymbolLine};
use sg_stat::StatContext;

use sg_config::WorkerConfig;

use crate::stats::{ProcessStats, RollHistory, ScanSummary};

/// Cap on the request head (first line plus envelope headers).
const MAX_HEAD: usize = 32 * 1024;

/// Fallback protocol for error replies before the head parsed.
const DEFAULT_PROTO: Protocol = Protocol::Native { major: 1, minor: 3 };

// ---------------------------------------------------------------------------
// Worker context
// ---------------------------------------------------------------------------

/// Extension hook: a registered custom command renders its own reply from
/// the parsed request and body.
pub type CustomCommand = dyn Fn(&ScanRequest, &[u8]) -> String + Send + Sync;

/// Shared, immutable state of the scan worker.
pub struct ScanWorkerCtx {
    pub worker: WorkerConfig,
    pub schedule: Arc<ScanSchedule>,
    pub stat: Arc<StatContext>,
    pub fuzzy: Arc<FuzzyServer>,
    pub stats: Arc<ProcessStats>,
    pub history: Arc<RollHistory>,
    /// command name (uppercase) → handler.
    pub custom_commands: std::collections::HashMap<String, Arc<CustomCommand>>,
}

// ---------------------------------------------------------------------------
// Accept loop
// ---------------------------------------------------------------------------

/// TCP accept loop for the scan protocol. One request is in flight per
/// connection: the next request is not read until the reply is fully
/// written.
#[tracing::instrument(name = "scan_worker", skip_all)]
pub async fn run_scan_worker(
    listener: TcpListener,
    ctx: Arc<ScanWorkerCtx>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer) = result?;
                sg_debug!(conn, peer = %peer, "accepted connection");
                ctx.stats.connections.fetch_add(1, Ordering::Relaxed);
                let ctx = Arc::clone(&ctx);
                let cancel = cancel.child_token();
                tokio::spawn(handle_connection(stream, ctx, cancel, peer));
            }
            _ = cancel.cancelled() => break,
        }
    }
    Ok(())
}

#[tracing::instrument(skip_all, fields(peer = %peer))]
async fn handle_connection(
    stream: TcpStream,
    ctx: Arc<ScanWorkerCtx>,
    cancel: CancellationToken,
    peer: SocketAddr,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    loop {
        let head = tokio::select! {
            head = read_head(&mut reader) => head,
            _ = cancel.cancelled() => break,
        };
        let head = match head {
            Ok(Some(head)) => head,
            Ok(None) => break,
            Err(e) => {
                sg_warn!(conn, peer = %peer, error = %e, "request read error");
                break;
            }
        };

        let (reply, keep_alive) = handle_request(&ctx, &head, &mut reader, peer).await;
        if let Err(e) = write_half.write_all(reply.as_bytes()).await {
            sg_warn!(conn, peer = %peer, error = %e, "reply write error");
            break;
        }
        if !keep_alive {
            break;
        }
    }
    sg_debug!(conn, peer = %peer, "connection closed");
}

/// Read the request head: lines until the empty line. `Ok(None)` on clean
/// EOF before any byte.
async fn read_head(reader: &mut BufReader<OwnedReadHalf>) -> io::Result<Option<String>> {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return if head.is_empty() {
                Ok(None)
            } else {
                Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated head"))
            };
        }
        if line == "\r\n" || line == "\n" {
            return Ok(Some(head));
        }
        head.push_str(&line);
        if head.len() > MAX_HEAD {
            return Err(io::Error::other("request head too large"));
        }
    }
}

// ---------------------------------------------------------------------------
// Request dispatch
// ---------------------------------------------------------------------------

async fn handle_request(
    ctx: &ScanWorkerCtx,
    head: &str,
    reader: &mut BufReader<OwnedReadHalf>,
    peer: SocketAddr,
) -> (String, bool) {
    let request = match ScanRequest::parse_head(head) {
        Ok(request) => request,
        Err(e) => {
            ctx.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
            sg_debug!(conn, peer = %peer, error = %e, "bad request head");
            return (
                sg_proto::render_error(DEFAULT_PROTO, 400, "protocol", &e.to_string()),
                false,
            );
        }
    };
    let proto = request.protocol;

    // Body-less controller commands first.
    match &request.cmd {
        Command::Ping => return (sg_proto::render_ping(proto), true),
        Command::Stat => {
            let body = ctx.stats.render_stat(&ctx.fuzzy.stats);
            return (sg_proto::render_json(proto, &body), true);
        }
        Command::StatReset => {
            let body = ctx.stats.render_stat(&ctx.fuzzy.stats);
            ctx.stats.reset();
            return (sg_proto::render_json(proto, &body), true);
        }
        Command::Counters => {
            let body = ctx.stats.render_counters(&ctx.schedule, &ctx.history);
            return (sg_proto::render_json(proto, &body), true);
        }
        Command::Uptime => {
            let body = serde_json::json!({ "uptime": ctx.stats.uptime_secs() });
            return (sg_proto::render_json(proto, &body), true);
        }
        Command::AddSymbol => return (handle_add_symbol(ctx, &request), true),
        Command::AddAction => return (handle_add_action(ctx, &request), true),
        _ => {}
    }

    // Everything else carries a body bounded by Content-Length.
    let body = match read_body(ctx, &request, reader).await {
        Ok(body) => body,
        Err(reply) => return (reply, false),
    };

    match &request.cmd {
        Command::Learn => (handle_learn(ctx, &request, &body).await, true),
        Command::FuzzyAdd | Command::FuzzyDel => {
            (handle_fuzzy_update(ctx, &request, &body, peer).await, true)
        }
        Command::Other(name) => match ctx.custom_commands.get(name) {
            Some(handler) => (handler(&request, &body), true),
            None => {
                ctx.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
                (
                    sg_proto::render_error(
                        proto,
                        404,
                        "protocol",
                        &format!("unknown command {name}"),
                    ),
                    true,
                )
            }
        },
        _ => (handle_scan(ctx, &request, &body, peer).await, true),
    }
}

/// Read the `Content-Length`-bound body; renders the protocol error reply
/// on failure (the connection then closes).
async fn read_body(
    ctx: &ScanWorkerCtx,
    request: &ScanRequest,
    reader: &mut BufReader<OwnedReadHalf>,
) -> Result<Vec<u8>, String> {
    let proto = request.protocol;
    let Some(len) = request.content_length else {
        ctx.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
        return Err(sg_proto::render_error(
            proto,
            400,
            "protocol",
            "missing Content-Length",
        ));
    };
    if len > ctx.worker.max_message_size.as_bytes() {
        ctx.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
        return Err(sg_proto::render_error(
            proto,
            413,
            "protocol",
            "message too large",
        ));
    }
    let mut body = vec![0u8; len];
    if let Err(e) = reader.read_exact(&mut body).await {
        return Err(sg_proto::render_error(
            proto,
            400,
            "network",
            &format!("body read: {e}"),
        ));
    }
    Ok(body)
}

// ---------------------------------------------------------------------------
// Scan path
// ---------------------------------------------------------------------------

async fn handle_scan(
    ctx: &ScanWorkerCtx,
    request: &ScanRequest,
    body: &[u8],
    peer: SocketAddr,
) -> String {
    let proto = request.protocol;
    let started = Instant::now();

    let task = Arc::new(Task::new(Arc::clone(&ctx.schedule)));
    if let Err(e) = task.attach_message(body) {
        ctx.stats.protocol_errors.fetch_add(1, Ordering::Relaxed);
        return sg_proto::render_error(proto, 400, "protocol", &e.to_string());
    }
    apply_envelope(&task, request, peer);

    // SKIP replies without driving the pipeline.
    if request.cmd != Command::Skip {
        let scheduler = Scheduler::new(Arc::clone(&ctx.schedule));
        let deadline = ctx.worker.task_timeout.as_duration();
        match tokio::time::timeout(deadline, scheduler.process(Arc::clone(&task))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                sg_warn!(scan, error = %e, "pipeline error, replying with partial results");
            }
            Err(_) => {
                // Deadline: cancel pending lookups, reply with what we have.
                task.cancel_pending();
                sg_warn!(scan, timeout = ?deadline, "task deadline reached");
            }
        }
    } else {
        task.advance_stage(TaskStage::Done);
    }

    let action = task.check_action();
    let required = required_score(&ctx.schedule);
    let (score, symbols) = task.with_result(|r| {
        let mut symbols: Vec<SymbolLine> = r
            .symbols()
            .map(|s| SymbolLine {
                name: s.name.clone(),
                weight: s.score,
                options: s.options.clone(),
            })
            .collect();
        symbols.sort_by(|a, b| a.name.cmp(&b.name));
        (r.score, symbols)
    });
    let spam = action != Action::NoAction && action != Action::Greylist;

    let mut messages = Vec::new();
    if let Some(pre) = task.pre_result()
        && let Some(message) = pre.message
    {
        messages.push(message);
    }
    let mut add_headers = Vec::new();
    if action == Action::AddHeader {
        add_headers.push(("X-Spam".to_string(), "yes".to_string()));
    }
    if action == Action::RewriteSubject {
        let original = task
            .message()
            .and_then(|m| m.subject.clone())
            .unwrap_or_default();
        let rewritten = ctx.schedule.metric().subject.replace("%s", &original);
        add_headers.push(("Subject".to_string(), rewritten));
    }

    let elapsed = started.elapsed();
    ctx.stats.note_scan(action, spam);
    ctx.history.push(ScanSummary {
        queue_id: task.queue_id().map(str::to_string),
        score,
        action: action.as_str(),
        symbols: symbols.iter().map(|s| s.name.clone()).collect(),
        scan_time_ms: elapsed.as_millis() as u64,
        unix_time: chrono::Utc::now().timestamp(),
    });
    sg_info!(
        scan,
        queue_id = task.queue_id().unwrap_or("-"),
        score,
        action = action.as_str(),
        time_ms = elapsed.as_millis() as u64,
        "scan complete"
    );

    let with_symbols = match request.cmd {
        Command::ReportIfspam => spam,
        ref cmd => cmd.wants_symbols(),
    };
    sg_proto::render_reply(
        &ReplyData {
            protocol: proto,
            metric: ctx.schedule.metric().name.clone(),
            spam,
            score,
            required_score: required,
            action: action.as_str().to_string(),
            symbols,
            add_headers,
            messages,
        },
        with_symbols,
    )
}

fn apply_envelope(task: &Task, request: &ScanRequest, peer: SocketAddr) {
    let envelope = &request.envelope;
    let ip = envelope
        .ip
        .as_deref()
        .and_then(|ip| ip.parse().ok())
        .unwrap_or_else(|| peer.ip());
    task.set_client_ip(ip);
    if let Some(queue_id) = &envelope.queue_id {
        task.set_queue_id(queue_id);
    }
    if let Some(settings) = &envelope.settings {
        task.set_settings(settings.clone());
    }
}

/// The reported "required" score: the least severe configured threshold,
/// i.e. the score where the message starts being treated as spam.
fn required_score(schedule: &ScanSchedule) -> f64 {
    let min = schedule
        .action_limits()
        .iter()
        .flatten()
        .copied()
        .fold(f64::INFINITY, f64::min);
    if min.is_finite() { min } else { 0.0 }
}

// ---------------------------------------------------------------------------
// Controller mutations
// ---------------------------------------------------------------------------

/// `ADD_SYMBOL`: replace a registered symbol's weight at runtime.
fn handle_add_symbol(ctx: &ScanWorkerCtx, request: &ScanRequest) -> String {
    let proto = request.protocol;
    let (Some(symbol), Some(score)) = (&request.envelope.symbol, request.envelope.score) else {
        return sg_proto::render_error(proto, 400, "protocol", "Symbol and Score are required");
    };
    match ctx.schedule.def_by_name(symbol) {
        Some(def) => {
            def.set_weight(score);
            sg_info!(conf, symbol = %symbol, score, "symbol weight updated");
            sg_proto::render_message(proto, "symbol updated")
        }
        None => sg_proto::render_error(
            proto,
            404,
            "config",
            &format!("symbol {symbol:?} is not registered"),
        ),
    }
}

/// `ADD_ACTION`: override an action threshold at runtime.
fn handle_add_action(ctx: &ScanWorkerCtx, request: &ScanRequest) -> String {
    let proto = request.protocol;
    let (Some(action), Some(score)) = (&request.envelope.action, request.envelope.score) else {
        return sg_proto::render_error(proto, 400, "protocol", "Action and Score are required");
    };
    let severity = match action.parse::<Action>() {
        Ok(Action::NoAction) | Err(_) => {
            return sg_proto::render_error(
                proto,
                400,
                "config",
                &format!("unknown action {action:?}"),
            );
        }
        Ok(action) => action as usize,
    };
    ctx.schedule.set_action_limit(severity, score);
    sg_info!(conf, action = %action, score, "action threshold updated");
    sg_proto::render_message(proto, "action updated")
}

// ---------------------------------------------------------------------------
// Learn and fuzzy-update paths
// ---------------------------------------------------------------------------

async fn handle_learn(ctx: &ScanWorkerCtx, request: &ScanRequest, body: &[u8]) -> String {
    let proto = request.protocol;
    let task = Task::new(Arc::clone(&ctx.schedule));
    if let Err(e) = task.attach_message(body) {
        return sg_proto::render_error(proto, 400, "protocol", &e.to_string());
    }
    // Value: 1 learns spam (the default), 0 learns ham.
    let is_spam = request.envelope.value.unwrap_or(1) != 0;
    let classifier = request.envelope.classifier.as_deref();

    match ctx.stat.learn(&task, classifier, is_spam).await {
        Ok(()) => {
            ctx.stats.learned.fetch_add(1, Ordering::Relaxed);
            sg_proto::render_message(proto, "learn ok")
        }
        Err(e) => {
            let text = e.to_string();
            let (code, kind) = if text.contains("no matching classifier") {
                (404, "config")
            } else if text.contains("already learned") {
                (208, "stat")
            } else if text.contains("too few tokens") {
                (400, "stat")
            } else {
                (500, "backend")
            };
            sg_proto::render_error(proto, code, kind, &text)
        }
    }
}

async fn handle_fuzzy_update(
    ctx: &ScanWorkerCtx,
    request: &ScanRequest,
    body: &[u8],
    peer: SocketAddr,
) -> String {
    let proto = request.protocol;
    let message = match sg_core::MessageView::parse(body) {
        Ok(message) => message,
        Err(e) => return sg_proto::render_error(proto, 400, "protocol", &e.to_string()),
    };
    let kind = if request.cmd == Command::FuzzyAdd {
        FuzzyCmdKind::Write
    } else {
        FuzzyCmdKind::Delete
    };
    let mut cmd = FuzzyCmd::new(kind, message.fuzzy_digest());
    cmd.flag = request.envelope.flag.unwrap_or(0);
    cmd.value = request.envelope.value.unwrap_or(1);
    cmd.shingles = sg_fuzzy::shingles::generate(message.all_words());

    let result = match kind {
        FuzzyCmdKind::Write => {
            ctx.fuzzy
                .backend()
                .add(&cmd, ctx.fuzzy.expire(), &peer.ip().to_string())
                .await
        }
        _ => ctx.fuzzy.backend().del(&cmd).await,
    };
    match result {
        Ok(()) => sg_proto::render_message(proto, "fuzzy update ok"),
        Err(e) => sg_proto::render_error(proto, 500, "backend", &e.to_string()),
    }
}
