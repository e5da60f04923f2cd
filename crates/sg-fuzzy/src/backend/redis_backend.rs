use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orion_error::StructError;

use sg_config::RedisServerConfig;
use sg_net::{RedisPool, Strategy, Upstream, UpstreamPool};

use crate::error::{FuzzyReason, FuzzyResult};
use crate::wire::{DIGEST_LEN, FuzzyCmd, SHINGLE_COUNT};

use super::{FuzzyBackend, FuzzyHit, SyncReport, backend_id, shingle_vote, vote_prob};

// ---------------------------------------------------------------------------
// RedisFuzzyBackend
// ---------------------------------------------------------------------------
//
// Key layout:
//   <prefix><digest>              hash {V, F}, TTL = expire
//   <prefix>_<i>_<shingle>        string → digest, TTL = expire
//   <prefix>_count                counter
//   <prefix><src>                 per-source learn counter

/// Redis reference backend. Upstream selection goes through the pool with
/// passive failure accounting; every update batch runs in `MULTI`/`EXEC`.
pub struct RedisFuzzyBackend {
    id: String,
    prefix: String,
    db: i64,
    password: Option<String>,
    timeout: Duration,
    upstreams: UpstreamPool,
    pool: Arc<RedisPool>,
}

impl RedisFuzzyBackend {
    pub fn new(config: &RedisServerConfig, prefix: &str, pool: Arc<RedisPool>) -> FuzzyResult<Self> {
        let upstreams = UpstreamPool::from_list(&config.servers, 6379, config.limits)
            .map_err(|e| {
                StructError::from(FuzzyReason::Backend).with_detail(format!("server list: {e}"))
            })?;
        Ok(Self {
            id: backend_id(prefix, config.db, config.password.as_deref()),
            prefix: prefix.to_string(),
            db: config.db,
            password: config.password.clone(),
            timeout: config.timeout.as_duration(),
            upstreams,
            pool,
        })
    }

    fn digest_key(&self, digest: &[u8; DIGEST_LEN]) -> Vec<u8> {
        let mut key = self.prefix.as_bytes().to_vec();
        key.extend_from_slice(digest);
        key
    }

    fn shingle_key(&self, slot: usize, shingle: u64) -> String {
        format!("{}_{}_{}", self.prefix, slot, shingle)
    }

    fn count_key(&self) -> String {
        format!("{}_count", self.prefix)
    }

    fn source_key(&self, source: &str) -> String {
        format!("{}{}", self.prefix, source)
    }

    async fn checkout(&self) -> FuzzyResult<(sg_net::PooledConn, Arc<Upstream>)> {
        let upstream = self
            .upstreams
            .get(Strategy::RoundRobin, None)
            .map_err(|e| {
                StructError::from(FuzzyReason::Backend).with_detail(format!("no upstream: {e}"))
            })?;
        match self
            .pool
            .connect(
                upstream.host(),
                upstream.port(),
                self.db,
                self.password.as_deref(),
            )
            .await
        {
            Ok(conn) => Ok((conn, upstream)),
            Err(e) => {
                self.upstreams.fail(&upstream, "connect");
                Err(StructError::from(FuzzyReason::Backend)
                    .with_detail(format!("fuzzy {}: {e}", self.id)))
            }
        }
    }

    /// Run a redis exchange with the backend timeout; failure releases the
    /// connection as fatal and marks the upstream.
    async fn exchange<T, F>(&self, op: &str, run: F) -> FuzzyResult<T>
    where
        T: Send,
        F: AsyncFnOnce(&mut redis::aio::MultiplexedConnection) -> Result<T, redis::RedisError>,
    {
        let (mut conn, upstream) = self.checkout().await?;
        let result = tokio::time::timeout(self.timeout, run(&mut conn.conn)).await;
        match result {
            Ok(Ok(value)) => {
                self.upstreams.ok(&upstream);
                self.pool.release(conn, false);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.upstreams.fail(&upstream, "command");
                self.pool.release(conn, true);
                Err(StructError::from(FuzzyReason::Backend)
                    .with_detail(format!("fuzzy {}: {op}: {e}", self.id)))
            }
            Err(_) => {
                self.upstreams.fail(&upstream, "timeout");
                self.pool.release(conn, true);
                Err(StructError::from(FuzzyReason::Net(sg_net::NetReason::Timeout))
                    .with_detail(format!("fuzzy {}: {op} timed out", self.id)))
            }
        }
    }
}

#[async_trait]
impl FuzzyBackend for RedisFuzzyBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&self, cmd: &FuzzyCmd, _expire: Duration) -> FuzzyResult<FuzzyHit> {
        let key = self.digest_key(&cmd.digest);
        let direct: Vec<Option<i64>> = self
            .exchange("check", async |conn| {
                redis::cmd("HMGET")
                    .arg(&key)
                    .arg("V")
                    .arg("F")
                    .query_async(conn)
                    .await
            })
            .await?;

        if let [Some(value), Some(flag)] = direct[..] {
            return Ok(FuzzyHit {
                value: value as i32,
                flag: flag as i32,
                prob: 1.0,
            });
        }

        let Some(shingles) = &cmd.shingles else {
            return Ok(FuzzyHit::default());
        };

        // Batched shingle→digest lookup, then the plurality vote.
        let keys: Vec<String> = shingles
            .iter()
            .enumerate()
            .map(|(i, h)| self.shingle_key(i, *h))
            .collect();
        let rows: Vec<Option<Vec<u8>>> = self
            .exchange("check-shingles", async |conn| {
                let mut mget = redis::cmd("MGET");
                for k in &keys {
                    mget.arg(k);
                }
                mget.query_async(conn).await
            })
            .await?;

        let resolved: Vec<Option<[u8; DIGEST_LEN]>> = rows
            .into_iter()
            .map(|row| row.and_then(|bytes| bytes.try_into().ok()))
            .collect();
        let Some((winner, votes)) = shingle_vote(&resolved) else {
            return Ok(FuzzyHit::default());
        };

        let winner_key = self.digest_key(&winner);
        let hit: Vec<Option<i64>> = self
            .exchange("check-winner", async |conn| {
                redis::cmd("HMGET")
                    .arg(&winner_key)
                    .arg("V")
                    .arg("F")
                    .query_async(conn)
                    .await
            })
            .await?;

        match hit[..] {
            [Some(value), Some(flag)] => Ok(FuzzyHit {
                value: value as i32,
                flag: flag as i32,
                prob: vote_prob(votes),
            }),
            _ => Ok(FuzzyHit::default()),
        }
    }

    async fn add(&self, cmd: &FuzzyCmd, expire: Duration, source: &str) -> FuzzyResult<()> {
        let key = self.digest_key(&cmd.digest);
        let expire_secs = expire.as_secs() as i64;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSET").arg(&key).arg("F").arg(cmd.flag).ignore()
            .cmd("HINCRBY").arg(&key).arg("V").arg(cmd.value).ignore()
            .cmd("EXPIRE").arg(&key).arg(expire_secs).ignore()
            .cmd("INCR").arg(self.count_key()).ignore();
        if let Some(shingles) = &cmd.shingles {
            for (i, h) in shingles.iter().enumerate() {
                pipe.cmd("SETEX")
                    .arg(self.shingle_key(i, *h))
                    .arg(expire_secs)
                    .arg(&cmd.digest[..])
                    .ignore();
            }
        }
        pipe.cmd("INCR").arg(self.source_key(source)).ignore();

        self.exchange("add", async |conn| {
            pipe.query_async::<()>(conn).await
        })
        .await
    }

    async fn del(&self, cmd: &FuzzyCmd) -> FuzzyResult<()> {
        let key = self.digest_key(&cmd.digest);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("DEL").arg(&key).ignore()
            .cmd("DECR").arg(self.count_key()).ignore();
        if let Some(shingles) = &cmd.shingles {
            for (i, h) in shingles.iter().enumerate() {
                pipe.cmd("DEL").arg(self.shingle_key(i, *h)).ignore();
            }
        }
        self.exchange("del", async |conn| {
            pipe.query_async::<()>(conn).await
        })
        .await
    }

    async fn count(&self) -> FuzzyResult<u64> {
        let key = self.count_key();
        let count: Option<i64> = self
            .exchange("count", async |conn| {
                redis::cmd("GET").arg(&key).query_async(conn).await
            })
            .await?;
        Ok(count.unwrap_or(0).max(0) as u64)
    }

    async fn sync(&self, _expire: Duration) -> FuzzyResult<SyncReport> {
        // Redis expires keys natively; nothing is buffered locally, so the
        // periodic sync only has to verify the backend is reachable.
        let _: String = self
            .exchange("sync-ping", async |conn| {
                redis::cmd("PING").query_async(conn).await
            })
            .await?;
        Ok(SyncReport::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RedisServerConfig {
        toml::from_str(
            r#"
servers = "127.0.0.1:6379"
db = 2
password = "pw"
"#,
        )
        .unwrap()
    }

    #[test]
    fn key_layout() {
        let pool = RedisPool::new(Default::default());
        let backend = RedisFuzzyBackend::new(&config(), "fz", pool).unwrap();
        let digest = [0xabu8; DIGEST_LEN];
        let key = backend.digest_key(&digest);
        assert!(key.starts_with(b"fz"));
        assert_eq!(key.len(), 2 + DIGEST_LEN);
        assert_eq!(backend.shingle_key(3, 77), "fz_3_77");
        assert_eq!(backend.count_key(), "fz_count");
        assert_eq!(backend.source_key("10.1.2.3"), "fz10.1.2.3");
    }

    #[test]
    fn id_depends_on_location() {
        let pool = RedisPool::new(Default::default());
        let a = RedisFuzzyBackend::new(&config(), "fz", Arc::clone(&pool)).unwrap();
        let b = RedisFuzzyBackend::new(&config(), "other", pool).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn shingle_pipe_covers_all_slots() {
        let mut cmd = FuzzyCmd::new(crate::wire::FuzzyCmdKind::Write, [1u8; DIGEST_LEN]);
        cmd.shingles = Some([7u64; SHINGLE_COUNT]);
        assert_eq!(cmd.shingles_count() as usize, SHINGLE_COUNT);
    }
}
