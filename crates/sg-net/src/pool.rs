use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use orion_error::StructError;
use redis::aio::MultiplexedConnection;
use redis::IntoConnectionInfo;
use tokio_util::sync::CancellationToken;

use crate::error::{NetReason, NetResult};

// ---------------------------------------------------------------------------
// RedisPoolConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RedisPoolConfig {
    /// Base idle lifetime before a pooled connection is closed.
    pub timeout: Duration,
    /// Above this many idle connections per key the cleanup runs at half
    /// the base timeout.
    pub max_conns: usize,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_conns: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Key — (host, port, db, password) identity of a logical connection
// ---------------------------------------------------------------------------

fn conn_key(host: &str, port: u16, db: i64, password: Option<&str>) -> u64 {
    use xxhash_rust::xxh3::Xxh3;
    let mut h = Xxh3::new();
    h.update(host.as_bytes());
    h.update(&port.to_le_bytes());
    h.update(&db.to_le_bytes());
    if let Some(p) = password {
        h.update(p.as_bytes());
    }
    h.digest()
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct IdleConn {
    conn: MultiplexedConnection,
    generation: u64,
}

#[derive(Default)]
struct PoolSlot {
    inactive: VecDeque<IdleConn>,
    active: usize,
    next_generation: u64,
}

// ---------------------------------------------------------------------------
// PooledConn — a checked-out connection
// ---------------------------------------------------------------------------

/// A connection checked out of the pool. Must be handed back through
/// [`RedisPool::release`]; dropping it without release closes it.
#[derive(Debug)]
pub struct PooledConn {
    pub conn: MultiplexedConnection,
    key: u64,
    pool: std::sync::Weak<RedisPool>,
    released: bool,
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Not released: account it out of the active set and let the
        // connection close with this value.
        if let Some(pool) = self.pool.upgrade() {
            let mut slots = pool.slots.lock().expect("redis pool poisoned");
            if let Some(slot) = slots.get_mut(&self.key) {
                slot.active = slot.active.saturating_sub(1);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RedisPool
// ---------------------------------------------------------------------------

/// Long-lived pooled Redis client connections keyed by
/// `(host, port, db, password)`.
///
/// Checkout prefers a healthy idle connection; otherwise a new one is
/// opened (authentication and database selection happen during setup from
/// the connection info). Release either parks the connection on the idle
/// queue with a jittered cleanup timer, or closes it when the caller saw a
/// fatal error.
pub struct RedisPool {
    config: RedisPoolConfig,
    slots: Mutex<HashMap<u64, PoolSlot>>,
    cancel: CancellationToken,
}

impl RedisPool {
    pub fn new(config: RedisPoolConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            slots: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Stop all pending cleanup timers (daemon shutdown).
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Number of idle connections for a key, for introspection and tests.
    pub fn idle_count(&self, host: &str, port: u16, db: i64, password: Option<&str>) -> usize {
        let key = conn_key(host, port, db, password);
        let slots = self.slots.lock().expect("redis pool poisoned");
        slots.get(&key).map_or(0, |s| s.inactive.len())
    }

    /// Check out a connection for `(host, port, db, password)`.
    pub async fn connect(
        self: &Arc<Self>,
        host: &str,
        port: u16,
        db: i64,
        password: Option<&str>,
    ) -> NetResult<PooledConn> {
        let key = conn_key(host, port, db, password);

        // Reuse an idle connection if one answers a ping.
        loop {
            let idle = {
                let mut slots = self.slots.lock().expect("redis pool poisoned");
                let slot = slots.entry(key).or_default();
                slot.inactive.pop_back()
            };
            let Some(mut idle) = idle else { break };
            let pong: Result<String, _> =
                redis::cmd("PING").query_async(&mut idle.conn).await;
            if pong.is_ok() {
                let mut slots = self.slots.lock().expect("redis pool poisoned");
                slots.entry(key).or_default().active += 1;
                tracing::debug!(host, port, "reusing pooled redis connection");
                return Ok(PooledConn {
                    conn: idle.conn,
                    key,
                    pool: Arc::downgrade(self),
                    released: false,
                });
            }
            tracing::debug!(host, port, "discarding stale pooled redis connection");
        }

        // Open a fresh connection; db selection and auth are part of the
        // connection info.
        let mut redis_info = redis::RedisConnectionInfo::default().set_db(db);
        if let Some(password) = password {
            redis_info = redis_info.set_password(password);
        }
        let info = redis::ConnectionAddr::Tcp(host.to_string(), port)
            .into_connection_info()
            .map_err(|e| {
                StructError::from(NetReason::Connect).with_detail(format!("redis client: {e}"))
            })?
            .set_redis_settings(redis_info);
        let client = redis::Client::open(info).map_err(|e| {
            StructError::from(NetReason::Connect).with_detail(format!("redis client: {e}"))
        })?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                StructError::from(NetReason::Connect)
                    .with_detail(format!("redis connect {host}:{port}: {e}"))
            })?;

        let mut slots = self.slots.lock().expect("redis pool poisoned");
        slots.entry(key).or_default().active += 1;
        tracing::debug!(host, port, db, "opened redis connection");
        Ok(PooledConn {
            conn,
            key,
            pool: Arc::downgrade(self),
            released: false,
        })
    }

    /// Return a connection. A fatal release closes it immediately;
    /// otherwise it joins the idle queue and a cleanup timer is scheduled.
    pub fn release(self: &Arc<Self>, mut conn: PooledConn, is_fatal: bool) {
        conn.released = true;
        let key = conn.key;
        let mut slots = self.slots.lock().expect("redis pool poisoned");
        let slot = slots.entry(key).or_default();
        slot.active = slot.active.saturating_sub(1);

        if is_fatal {
            tracing::debug!("closing redis connection on fatal release");
            return;
        }

        let generation = slot.next_generation;
        slot.next_generation += 1;
        slot.inactive.push_back(IdleConn {
            conn: conn.conn.clone(),
            generation,
        });
        let idle_len = slot.inactive.len();
        drop(slots);

        // Busy keys get a faster sweep with tighter jitter.
        let timeout = if idle_len > self.config.max_conns {
            jitter(self.config.timeout / 2, 0.25)
        } else {
            jitter(self.config.timeout, 0.5)
        };
        let pool = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {}
                _ = cancel.cancelled() => return,
            }
            if let Some(pool) = pool.upgrade() {
                let mut slots = pool.slots.lock().expect("redis pool poisoned");
                if let Some(slot) = slots.get_mut(&key) {
                    let before = slot.inactive.len();
                    slot.inactive.retain(|c| c.generation != generation);
                    if slot.inactive.len() != before {
                        tracing::debug!("pooled redis connection expired");
                    }
                }
            }
        });
    }
}

/// `base` scaled by a uniform factor in `[1 - frac, 1 + frac]`.
fn jitter(base: Duration, frac: f64) -> Duration {
    let scale = 1.0 + (fastrand::f64() * 2.0 - 1.0) * frac;
    base.mul_f64(scale.max(0.0))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_sensitive_to_every_part() {
        let base = conn_key("h", 6379, 0, None);
        assert_ne!(base, conn_key("h2", 6379, 0, None));
        assert_ne!(base, conn_key("h", 6380, 0, None));
        assert_ne!(base, conn_key("h", 6379, 1, None));
        assert_ne!(base, conn_key("h", 6379, 0, Some("pw")));
        assert_eq!(base, conn_key("h", 6379, 0, None));
    }

    #[test]
    fn jitter_bounds() {
        for _ in 0..64 {
            let t = jitter(Duration::from_secs(10), 0.5);
            assert!(t >= Duration::from_secs(5));
            assert!(t <= Duration::from_secs(15));
        }
        for _ in 0..64 {
            let t = jitter(Duration::from_secs(5), 0.25);
            assert!(t >= Duration::from_millis(3750));
            assert!(t <= Duration::from_millis(6250));
        }
    }

    #[tokio::test]
    async fn connect_to_nowhere_is_a_connect_error() {
        let pool = RedisPool::new(RedisPoolConfig::default());
        // Port 1 on localhost is virtually never a redis server.
        let err = pool.connect("127.0.0.1", 1, 0, None).await.unwrap_err();
        assert!(err.to_string().contains("redis connect"), "{err}");
    }
}
