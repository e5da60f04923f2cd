use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use xxhash_rust::xxh3::xxh3_64_with_seed;

use sg_config::UpstreamLimits;

use orion_error::StructError;

use crate::error::{NetReason, NetResult};

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Selection strategy for [`UpstreamPool::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Random,
    RoundRobin,
    /// Highest-weight alive member; ties broken by insertion order.
    MasterSlave,
    /// Stable hash of the caller's key; the same key keeps mapping to the
    /// same member until that member dies. Falls back to round-robin when
    /// no key is given.
    HashConsistent,
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct FailWindow {
    errors: u32,
    first_error: Option<Instant>,
    dead_until: Option<Instant>,
}

/// One remote endpoint, tracked for liveness independently of its pool.
#[derive(Debug)]
pub struct Upstream {
    name: String,
    host: String,
    port: u16,
    weight: u32,
    window: Mutex<FailWindow>,
}

impl Upstream {
    fn new(host: &str, port: u16, weight: u32) -> Self {
        Self {
            name: format!("{host}:{port}"),
            host: host.to_string(),
            port,
            weight,
            window: Mutex::new(FailWindow::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive_at(Instant::now())
    }

    pub(crate) fn is_alive_at(&self, now: Instant) -> bool {
        let mut w = self.window.lock().expect("upstream window poisoned");
        match w.dead_until {
            Some(until) if until > now => false,
            Some(_) => {
                // Dead period elapsed: revive with a clean window.
                *w = FailWindow::default();
                true
            }
            None => true,
        }
    }

    pub(crate) fn error_count(&self) -> u32 {
        self.window.lock().expect("upstream window poisoned").errors
    }

    fn record_ok(&self) {
        let mut w = self.window.lock().expect("upstream window poisoned");
        w.errors = 0;
        w.first_error = None;
    }

    fn record_fail(&self, limits: &UpstreamLimits, now: Instant) {
        let mut w = self.window.lock().expect("upstream window poisoned");
        match w.first_error {
            Some(first) if now.duration_since(first) <= limits.error_time.as_duration() => {
                w.errors += 1;
            }
            _ => {
                w.first_error = Some(now);
                w.errors = 1;
            }
        }
        if w.errors >= limits.max_errors {
            w.dead_until = Some(now + limits.dead_time.as_duration());
            w.errors = 0;
            w.first_error = None;
            tracing::info!(
                upstream = %self.name,
                dead_time = ?limits.dead_time.as_duration(),
                "upstream marked dead"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// UpstreamPool
// ---------------------------------------------------------------------------

/// Weighted server list with passive failure accounting. Selection only
/// considers alive members; when every member is dead the pool reports
/// [`NetReason::UpstreamAllDead`] rather than guessing.
pub struct UpstreamPool {
    members: Vec<Arc<Upstream>>,
    cursor: AtomicUsize,
    limits: UpstreamLimits,
}

impl UpstreamPool {
    pub fn new(limits: UpstreamLimits) -> Self {
        Self {
            members: Vec::new(),
            cursor: AtomicUsize::new(0),
            limits,
        }
    }

    pub fn add(&mut self, host: &str, port: u16, weight: u32) {
        self.members.push(Arc::new(Upstream::new(host, port, weight)));
    }

    /// Parse `host[:port][:weight]` entries, comma or whitespace separated.
    pub fn from_list(list: &str, default_port: u16, limits: UpstreamLimits) -> NetResult<Self> {
        let mut pool = Self::new(limits);
        for entry in list.split([',', ' ']).filter(|s| !s.is_empty()) {
            let mut parts = entry.split(':');
            let host = parts
                .next()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| {
                    StructError::from(NetReason::UpstreamEmpty)
                        .with_detail("upstream pool is empty")
                })?;
            let port = match parts.next() {
                Some(p) => p.parse::<u16>().map_err(|_| {
                    StructError::from(NetReason::Connect)
                        .with_detail(format!("bad port in upstream entry {entry:?}"))
                })?,
                None => default_port,
            };
            let weight = match parts.next() {
                Some(w) => w.parse::<u32>().map_err(|_| {
                    StructError::from(NetReason::Connect)
                        .with_detail(format!("bad weight in upstream entry {entry:?}"))
                })?,
                None => 1,
            };
            pool.add(host, port, weight);
        }
        if pool.members.is_empty() {
            return Err(
                StructError::from(NetReason::UpstreamEmpty).with_detail("upstream pool is empty"),
            );
        }
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn limits(&self) -> &UpstreamLimits {
        &self.limits
    }

    /// Report a successful exchange with `upstream`.
    pub fn ok(&self, upstream: &Upstream) {
        upstream.record_ok();
    }

    /// Report a failed exchange with `upstream`.
    pub fn fail(&self, upstream: &Upstream, reason: &str) {
        tracing::debug!(upstream = %upstream.name(), reason, "upstream failure");
        upstream.record_fail(&self.limits, Instant::now());
    }

    pub(crate) fn fail_at(&self, upstream: &Upstream, now: Instant) {
        upstream.record_fail(&self.limits, now);
    }

    /// Pick a member per `strategy`, considering only alive members.
    pub fn get(&self, strategy: Strategy, key: Option<&[u8]>) -> NetResult<Arc<Upstream>> {
        self.get_at(strategy, key, Instant::now())
    }

    pub(crate) fn get_at(
        &self,
        strategy: Strategy,
        key: Option<&[u8]>,
        now: Instant,
    ) -> NetResult<Arc<Upstream>> {
        if self.members.is_empty() {
            return Err(
                StructError::from(NetReason::UpstreamEmpty).with_detail("upstream pool is empty"),
            );
        }
        let alive: Vec<usize> = (0..self.members.len())
            .filter(|&i| self.members[i].is_alive_at(now))
            .collect();
        if alive.is_empty() {
            return Err(
                StructError::from(NetReason::UpstreamAllDead).with_detail("all upstreams are dead"),
            );
        }

        let idx = match strategy {
            Strategy::Random => alive[fastrand::usize(..alive.len())],
            Strategy::RoundRobin => self.next_round_robin(&alive),
            Strategy::MasterSlave => {
                // Highest weight wins; max_by_key keeps the last of equal
                // keys, so scan manually to keep insertion order on ties.
                let mut best = alive[0];
                for &i in &alive[1..] {
                    if self.members[i].weight > self.members[best].weight {
                        best = i;
                    }
                }
                best
            }
            Strategy::HashConsistent => match key {
                Some(key) if !key.is_empty() => {
                    // Rehash with an incrementing seed until an alive member
                    // comes up: the mapping for a key only moves when its
                    // member is dead.
                    let mut choice = None;
                    for seed in 0..(self.members.len() as u64 * 2) {
                        let i = (xxh3_64_with_seed(key, seed) % self.members.len() as u64) as usize;
                        if self.members[i].is_alive_at(now) {
                            choice = Some(i);
                            break;
                        }
                    }
                    choice.unwrap_or_else(|| alive[0])
                }
                _ => self.next_round_robin(&alive),
            },
        };
        Ok(Arc::clone(&self.members[idx]))
    }

    fn next_round_robin(&self, alive: &[usize]) -> usize {
        let n = self.cursor.fetch_add(1, Ordering::Relaxed);
        alive[n % alive.len()]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limits(max_errors: u32, error_time: u64, dead_time: u64) -> UpstreamLimits {
        UpstreamLimits {
            max_errors,
            error_time: Duration::from_secs(error_time).into(),
            dead_time: Duration::from_secs(dead_time).into(),
        }
    }

    fn two_member_pool(l: UpstreamLimits) -> UpstreamPool {
        let mut pool = UpstreamPool::new(l);
        pool.add("10.0.0.1", 11335, 1);
        pool.add("10.0.0.2", 11335, 1);
        pool
    }

    #[test]
    fn empty_pool_errors() {
        let pool = UpstreamPool::new(limits(3, 60, 300));
        let err = pool.get(Strategy::Random, None).unwrap_err();
        assert!(err.to_string().contains("upstream pool is empty"), "{err}");
    }

    #[test]
    fn from_list_parses_ports_and_weights() {
        let pool =
            UpstreamPool::from_list("a:6379, b, c:6380:4", 11335, limits(3, 60, 300)).unwrap();
        assert_eq!(pool.len(), 3);
        let master = pool.get(Strategy::MasterSlave, None).unwrap();
        assert_eq!(master.name(), "c:6380");
        assert_eq!(master.weight(), 4);
    }

    #[test]
    fn from_list_rejects_bad_entries() {
        assert!(UpstreamPool::from_list("a:not-a-port", 1, limits(3, 60, 300)).is_err());
        assert!(UpstreamPool::from_list("", 1, limits(3, 60, 300)).is_err());
    }

    #[test]
    fn round_robin_cycles_alive_members() {
        let pool = two_member_pool(limits(3, 60, 300));
        let a = pool.get(Strategy::RoundRobin, None).unwrap();
        let b = pool.get(Strategy::RoundRobin, None).unwrap();
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn master_slave_ties_break_by_insertion_order() {
        let pool = two_member_pool(limits(3, 60, 300));
        for _ in 0..4 {
            assert_eq!(
                pool.get(Strategy::MasterSlave, None).unwrap().name(),
                "10.0.0.1:11335",
            );
        }
    }

    #[test]
    fn hash_consistent_is_deterministic() {
        let pool = two_member_pool(limits(3, 60, 300));
        let first = pool
            .get(Strategy::HashConsistent, Some(b"session-key"))
            .unwrap();
        for _ in 0..8 {
            let again = pool
                .get(Strategy::HashConsistent, Some(b"session-key"))
                .unwrap();
            assert_eq!(first.name(), again.name());
        }
    }

    #[test]
    fn hash_consistent_empty_key_falls_back() {
        let pool = two_member_pool(limits(3, 60, 300));
        // No panic, both members get picked eventually.
        let mut seen = std::collections::HashSet::new();
        for _ in 0..8 {
            seen.insert(pool.get(Strategy::HashConsistent, None).unwrap().name().to_string());
        }
        assert_eq!(seen.len(), 2);
    }

    // Failure window: fail max_errors times inside error_time → dead for
    // dead_time, then alive again with a zero counter.
    #[test]
    fn failover_and_revival() {
        let pool = two_member_pool(limits(3, 60, 300));
        let t0 = Instant::now();
        let a = pool.get_at(Strategy::RoundRobin, None, t0).unwrap();

        for i in 0..3 {
            pool.fail_at(&a, t0 + Duration::from_secs(i));
        }
        assert!(!a.is_alive_at(t0 + Duration::from_secs(10)));

        // Every selection now lands on the survivor.
        for _ in 0..4 {
            let picked = pool
                .get_at(Strategy::RoundRobin, None, t0 + Duration::from_secs(10))
                .unwrap();
            assert_ne!(picked.name(), a.name());
        }

        // After dead_time the member revives with a clean window.
        let later = t0 + Duration::from_secs(304);
        assert!(a.is_alive_at(later));
        assert_eq!(a.error_count(), 0);
    }

    #[test]
    fn error_window_resets_after_error_time() {
        let pool = two_member_pool(limits(3, 60, 300));
        let t0 = Instant::now();
        let a = pool.get_at(Strategy::MasterSlave, None, t0).unwrap();

        // Two errors, then a long quiet period: the window restarts, so two
        // more errors still do not kill the upstream.
        pool.fail_at(&a, t0);
        pool.fail_at(&a, t0 + Duration::from_secs(1));
        pool.fail_at(&a, t0 + Duration::from_secs(120));
        pool.fail_at(&a, t0 + Duration::from_secs(121));
        assert!(a.is_alive_at(t0 + Duration::from_secs(122)));
    }

    #[test]
    fn ok_zeroes_the_counter() {
        let pool = two_member_pool(limits(3, 60, 300));
        let t0 = Instant::now();
        let a = pool.get_at(Strategy::MasterSlave, None, t0).unwrap();
        pool.fail_at(&a, t0);
        pool.fail_at(&a, t0 + Duration::from_secs(1));
        pool.ok(&a);
        assert_eq!(a.error_count(), 0);
        pool.fail_at(&a, t0 + Duration::from_secs(2));
        assert!(a.is_alive_at(t0 + Duration::from_secs(3)));
    }

    #[test]
    fn all_dead_reported() {
        let pool = two_member_pool(limits(1, 60, 300));
        let t0 = Instant::now();
        for name in ["10.0.0.1:11335", "10.0.0.2:11335"] {
            let u = pool
                .members
                .iter()
                .find(|u| u.name() == name)
                .unwrap()
                .clone();
            pool.fail_at(&u, t0);
        }
        let err = pool
            .get_at(Strategy::Random, None, t0 + Duration::from_secs(1))
            .unwrap_err();
        assert!(err.to_string().contains("all upstreams are dead"), "{err}");
    }
}
