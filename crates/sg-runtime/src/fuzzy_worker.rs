use std::io;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use sg_fuzzy::FuzzyServer;

/// Largest datagram we accept; anything bigger than a shingled command is
/// garbage anyway.
const RECV_BUF: usize = 2048;

/// UDP receive loop of the fuzzy storage worker. Malformed datagrams are
/// dropped silently; `sendto` retries on EINTR and otherwise logs and
/// drops.
#[tracing::instrument(name = "fuzzy_worker", skip_all)]
pub(crate) async fn run_fuzzy_worker(
    socket: UdpSocket,
    server: Arc<FuzzyServer>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut buf = [0u8; RECV_BUF];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let (len, peer) = result?;
                let Some(reply) = server.handle_datagram(&buf[..len], peer.ip()).await else {
                    continue;
                };
                loop {
                    match socket.send_to(&reply, peer).await {
                        Ok(_) => break,
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            sg_warn!(fuzzy, peer = %peer, error = %e, "reply send failed");
                            break;
                        }
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
