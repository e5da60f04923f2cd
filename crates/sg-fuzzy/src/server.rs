use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::backend::FuzzyBackend;
use crate::wire::{EPOCH_COUNT, FuzzyCmd, FuzzyCmdKind, FuzzyEpoch, FuzzyReply};

// ---------------------------------------------------------------------------
// FuzzyServerStats
// ---------------------------------------------------------------------------

/// Epoch-bucketed counters, updated lock-free from the datagram path.
#[derive(Default)]
pub struct FuzzyServerStats {
    pub checked: [AtomicU64; EPOCH_COUNT],
    pub found: [AtomicU64; EPOCH_COUNT],
    pub expired: AtomicU64,
    pub total_hashes: AtomicU64,
    pub invalid: AtomicU64,
}

impl FuzzyServerStats {
    pub fn checked_total(&self) -> u64 {
        self.checked.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub fn found_total(&self) -> u64 {
        self.found.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

// ---------------------------------------------------------------------------
// FuzzyServer
// ---------------------------------------------------------------------------

/// Per-datagram dispatch for the fuzzy storage worker: classify, gate
/// privileged commands on the update networks, call the backend, render
/// the reply in the wire form the request used.
pub struct FuzzyServer {
    backend: Arc<dyn FuzzyBackend>,
    /// `(addr, prefix_len)` networks allowed to write/delete.
    update_nets: Vec<(IpAddr, u8)>,
    expire: Duration,
    pub stats: Arc<FuzzyServerStats>,
}

impl FuzzyServer {
    pub fn new(
        backend: Arc<dyn FuzzyBackend>,
        update_nets: Vec<(IpAddr, u8)>,
        expire: Duration,
    ) -> Self {
        Self {
            backend,
            update_nets,
            expire,
            stats: Arc::new(FuzzyServerStats::default()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn FuzzyBackend> {
        &self.backend
    }

    /// Handle one datagram. `None` means drop silently (malformed input —
    /// the caller owes no reply, per the backpressure contract).
    pub async fn handle_datagram(&self, buf: &[u8], peer: IpAddr) -> Option<Vec<u8>> {
        let (cmd, epoch, legacy) = match FuzzyCmd::decode(buf) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.stats.invalid.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(backend = %self.backend.id(), size = buf.len(), error = %e, "dropping malformed fuzzy datagram");
                return None;
            }
        };

        let reply = self.process_command(&cmd, epoch, peer).await;
        if legacy {
            Some(reply.encode_legacy(cmd.cmd))
        } else {
            Some(reply.encode().to_vec())
        }
    }

    /// Dispatch a decoded command; mirrors the reply codes of the original
    /// server: 403 for unauthorized updates, 404 for failed ones.
    pub async fn process_command(
        &self,
        cmd: &FuzzyCmd,
        epoch: FuzzyEpoch,
        peer: IpAddr,
    ) -> FuzzyReply {
        let mut reply = match cmd.cmd {
            FuzzyCmdKind::Check => {
                self.stats.checked[epoch as usize].fetch_add(1, Ordering::Relaxed);
                match self.backend.check(cmd, self.expire).await {
                    Ok(hit) => {
                        if hit.prob > 0.5 {
                            self.stats.found[epoch as usize].fetch_add(1, Ordering::Relaxed);
                        }
                        FuzzyReply {
                            value: hit.value,
                            flag: hit.flag,
                            prob: hit.prob,
                            tag: 0,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(backend = %self.backend.id(), error = %e, "fuzzy check failed");
                        FuzzyReply::miss(0)
                    }
                }
            }
            FuzzyCmdKind::Write | FuzzyCmdKind::Delete => {
                if !self.client_allowed(peer) {
                    tracing::info!(
                        backend = %self.backend.id(),
                        %peer,
                        "rejecting privileged fuzzy command from unauthorized address"
                    );
                    FuzzyReply::error(403, 0)
                } else {
                    let result = match cmd.cmd {
                        FuzzyCmdKind::Write => {
                            self.backend.add(cmd, self.expire, &peer.to_string()).await
                        }
                        _ => self.backend.del(cmd).await,
                    };
                    let reply = match result {
                        Ok(()) => FuzzyReply {
                            value: 0,
                            flag: cmd.flag,
                            prob: 1.0,
                            tag: 0,
                        },
                        Err(e) => {
                            tracing::warn!(backend = %self.backend.id(), error = %e, "fuzzy update failed");
                            FuzzyReply::error(404, 0)
                        }
                    };
                    if let Ok(count) = self.backend.count().await {
                        self.stats.total_hashes.store(count, Ordering::Relaxed);
                    }
                    reply
                }
            }
        };
        reply.tag = cmd.tag;
        reply
    }

    /// Record the outcome of a periodic sync.
    pub fn note_expired(&self, expired: u64) {
        self.stats.expired.fetch_add(expired, Ordering::Relaxed);
    }

    pub fn expire(&self) -> Duration {
        self.expire
    }

    fn client_allowed(&self, peer: IpAddr) -> bool {
        self.update_nets
            .iter()
            .any(|(net, len)| cidr_contains(*net, *len, peer))
    }
}

/// Prefix match of `addr` against `net/len`.
fn cidr_contains(net: IpAddr, len: u8, addr: IpAddr) -> bool {
    match (net, addr) {
        (IpAddr::V4(net), IpAddr::V4(addr)) => {
            if len == 0 {
                return true;
            }
            let mask = u32::MAX << (32 - len.min(32));
            (u32::from(net) & mask) == (u32::from(addr) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(addr)) => {
            if len == 0 {
                return true;
            }
            let mask = u128::MAX << (128 - (len as u32).min(128));
            (u128::from(net) & mask) == (u128::from(addr) & mask)
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryFuzzyBackend;
    use crate::wire::DIGEST_LEN;

    fn server(update_nets: Vec<(IpAddr, u8)>) -> FuzzyServer {
        FuzzyServer::new(
            Arc::new(MemoryFuzzyBackend::new()),
            update_nets,
            Duration::from_secs(3600),
        )
    }

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    fn local_net() -> Vec<(IpAddr, u8)> {
        vec![(localhost(), 32)]
    }

    fn write_cmd(digest_byte: u8, flag: i32, value: i32) -> FuzzyCmd {
        let mut cmd = FuzzyCmd::new(FuzzyCmdKind::Write, [digest_byte; DIGEST_LEN]);
        cmd.flag = flag;
        cmd.value = value;
        cmd.tag = 99;
        cmd
    }

    // Scenario: write then check over the datagram interface.
    #[tokio::test]
    async fn write_then_check() {
        let server = server(local_net());

        let write = write_cmd(0x01, 7, 3);
        let reply_bytes = server
            .handle_datagram(&write.encode(), localhost())
            .await
            .unwrap();
        let reply = FuzzyReply::decode(&reply_bytes).unwrap();
        assert_eq!(reply.value, 0);
        assert_eq!(reply.prob, 1.0);
        assert_eq!(reply.tag, 99);

        let mut check = FuzzyCmd::new(FuzzyCmdKind::Check, [0x01; DIGEST_LEN]);
        check.tag = 100;
        let reply_bytes = server
            .handle_datagram(&check.encode(), localhost())
            .await
            .unwrap();
        let reply = FuzzyReply::decode(&reply_bytes).unwrap();
        assert_eq!(reply.value, 3);
        assert_eq!(reply.flag, 7);
        assert_eq!(reply.prob, 1.0);
        assert_eq!(reply.tag, 100);
    }

    // Scenario: unauthorized write gets 403 and stores nothing.
    #[tokio::test]
    async fn unauthorized_write_rejected() {
        let server = server(local_net());
        let outsider: IpAddr = "10.9.9.9".parse().unwrap();

        let write = write_cmd(0x02, 7, 3);
        let reply_bytes = server
            .handle_datagram(&write.encode(), outsider)
            .await
            .unwrap();
        let reply = FuzzyReply::decode(&reply_bytes).unwrap();
        assert_eq!(reply.value, 403);
        assert_eq!(reply.prob, 0.0);

        let check = FuzzyCmd::new(FuzzyCmdKind::Check, [0x02; DIGEST_LEN]);
        let reply_bytes = server
            .handle_datagram(&check.encode(), outsider)
            .await
            .unwrap();
        let reply = FuzzyReply::decode(&reply_bytes).unwrap();
        assert_eq!(reply.value, 0);
        assert_eq!(reply.prob, 0.0);
    }

    #[tokio::test]
    async fn write_delete_check_roundtrip() {
        let server = server(local_net());
        let write = write_cmd(0x03, 1, 2);
        server.handle_datagram(&write.encode(), localhost()).await;

        let mut del = FuzzyCmd::new(FuzzyCmdKind::Delete, [0x03; DIGEST_LEN]);
        del.tag = 5;
        let reply_bytes = server
            .handle_datagram(&del.encode(), localhost())
            .await
            .unwrap();
        assert_eq!(FuzzyReply::decode(&reply_bytes).unwrap().prob, 1.0);

        let check = FuzzyCmd::new(FuzzyCmdKind::Check, [0x03; DIGEST_LEN]);
        let reply_bytes = server
            .handle_datagram(&check.encode(), localhost())
            .await
            .unwrap();
        assert_eq!(FuzzyReply::decode(&reply_bytes).unwrap().prob, 0.0);
    }

    #[tokio::test]
    async fn malformed_datagram_dropped_silently() {
        let server = server(local_net());
        assert!(server.handle_datagram(&[1, 2, 3], localhost()).await.is_none());
        assert_eq!(server.stats.invalid.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn legacy_request_gets_text_reply() {
        let server = server(local_net());
        server
            .handle_datagram(&write_cmd(0x04, 2, 9).encode(), localhost())
            .await;

        let mut legacy = vec![0u8; crate::wire::LEGACY_CMD_SIZE];
        legacy[0] = 0; // check
        legacy[6..].copy_from_slice(&[0x04; DIGEST_LEN]);
        let reply = server.handle_datagram(&legacy, localhost()).await.unwrap();
        assert_eq!(reply, b"OK 9 2\r\n");

        // Missing digest in legacy form renders ERR.
        let mut legacy_miss = vec![0u8; crate::wire::LEGACY_CMD_SIZE];
        legacy_miss[0] = 0;
        legacy_miss[6..].copy_from_slice(&[0x05; DIGEST_LEN]);
        let reply = server.handle_datagram(&legacy_miss, localhost()).await.unwrap();
        assert_eq!(reply, b"ERR\r\n");
    }

    #[tokio::test]
    async fn stats_buckets_by_epoch() {
        let server = server(local_net());
        let mut check = FuzzyCmd::new(FuzzyCmdKind::Check, [0x06; DIGEST_LEN]);
        check.version = crate::wire::FUZZY_VERSION_COMPAT;
        server.handle_datagram(&check.encode(), localhost()).await;
        let check9 = FuzzyCmd::new(FuzzyCmdKind::Check, [0x06; DIGEST_LEN]);
        server.handle_datagram(&check9.encode(), localhost()).await;

        assert_eq!(
            server.stats.checked[FuzzyEpoch::Eight as usize].load(Ordering::Relaxed),
            1,
        );
        assert_eq!(
            server.stats.checked[FuzzyEpoch::Nine as usize].load(Ordering::Relaxed),
            1,
        );
    }

    #[test]
    fn cidr_matching() {
        let v4net: IpAddr = "10.0.0.0".parse().unwrap();
        assert!(cidr_contains(v4net, 8, "10.200.1.1".parse().unwrap()));
        assert!(!cidr_contains(v4net, 8, "11.0.0.1".parse().unwrap()));
        assert!(cidr_contains(v4net, 0, "192.168.1.1".parse().unwrap()));

        let v6net: IpAddr = "fd00::".parse().unwrap();
        assert!(cidr_contains(v6net, 8, "fd00::1".parse().unwrap()));
        assert!(!cidr_contains(v6net, 8, "fe80::1".parse().unwrap()));
        // family mismatch never matches
        assert!(!cidr_contains(v4net, 8, "fd00::1".parse().unwrap()));
    }
}
