use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use orion_error::StructError;
use serde_json::json;

use sg_config::RedisServerConfig;
use sg_net::{RedisPool, Strategy, UpstreamPool};

use crate::error::{StatReason, StatResult};
use crate::tokenize::Token;

// ---------------------------------------------------------------------------
// StatBackend — the per-statfile capability set
// ---------------------------------------------------------------------------

/// Persistence for statfile token counts. One backend instance may serve
/// several statfiles; every method namespaces by statfile label.
#[async_trait]
pub trait StatBackend: Send + Sync {
    /// Open the statfile handle; called once per statfile at bootstrap.
    async fn open(&self, statfile: &str) -> StatResult<()>;

    /// Fill `tokens[i].counts[slot]` with this statfile's count for each
    /// token. The slot has been sized by the caller.
    async fn process_tokens(
        &self,
        statfile: &str,
        tokens: &mut [Token],
        slot: usize,
    ) -> StatResult<()>;

    /// Commit one learn: every token's count is incremented.
    async fn learn_tokens(&self, statfile: &str, tokens: &[Token]) -> StatResult<()>;

    async fn total_learns(&self, statfile: &str) -> StatResult<u64>;

    async fn inc_learns(&self, statfile: &str) -> StatResult<()>;

    /// Unlearn bookkeeping for the opposite class.
    async fn dec_learns(&self, statfile: &str) -> StatResult<()>;

    /// Flush buffered state after a learn batch.
    async fn finalize_learn(&self, statfile: &str) -> StatResult<()>;

    async fn get_stat(&self, statfile: &str) -> StatResult<serde_json::Value>;

    async fn close(&self, statfile: &str) -> StatResult<()>;
}

// ---------------------------------------------------------------------------
// MemoryStatBackend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryStatfile {
    tokens: HashMap<u64, u64>,
    learns: u64,
}

/// Process-local statfiles, for tests and volatile deployments.
#[derive(Default)]
pub struct MemoryStatBackend {
    files: Mutex<HashMap<String, MemoryStatfile>>,
}

impl MemoryStatBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatBackend for MemoryStatBackend {
    async fn open(&self, statfile: &str) -> StatResult<()> {
        self.files
            .lock()
            .expect("stat files poisoned")
            .entry(statfile.to_string())
            .or_default();
        Ok(())
    }

    async fn process_tokens(
        &self,
        statfile: &str,
        tokens: &mut [Token],
        slot: usize,
    ) -> StatResult<()> {
        let files = self.files.lock().expect("stat files poisoned");
        let Some(file) = files.get(statfile) else {
            return Ok(());
        };
        for token in tokens.iter_mut() {
            token.counts[slot] = file.tokens.get(&token.hash).copied().unwrap_or(0);
        }
        Ok(())
    }

    async fn learn_tokens(&self, statfile: &str, tokens: &[Token]) -> StatResult<()> {
        let mut files = self.files.lock().expect("stat files poisoned");
        let file = files.entry(statfile.to_string()).or_default();
        for token in tokens {
            *file.tokens.entry(token.hash).or_insert(0) += 1;
        }
        Ok(())
    }

    async fn total_learns(&self, statfile: &str) -> StatResult<u64> {
        let files = self.files.lock().expect("stat files poisoned");
        Ok(files.get(statfile).map_or(0, |f| f.learns))
    }

    async fn inc_learns(&self, statfile: &str) -> StatResult<()> {
        let mut files = self.files.lock().expect("stat files poisoned");
        files.entry(statfile.to_string()).or_default().learns += 1;
        Ok(())
    }

    async fn dec_learns(&self, statfile: &str) -> StatResult<()> {
        let mut files = self.files.lock().expect("stat files poisoned");
        let file = files.entry(statfile.to_string()).or_default();
        file.learns = file.learns.saturating_sub(1);
        Ok(())
    }

    async fn finalize_learn(&self, _statfile: &str) -> StatResult<()> {
        Ok(())
    }

    async fn get_stat(&self, statfile: &str) -> StatResult<serde_json::Value> {
        let files = self.files.lock().expect("stat files poisoned");
        let (learns, tokens) = files
            .get(statfile)
            .map_or((0, 0), |f| (f.learns, f.tokens.len()));
        Ok(json!({ "statfile": statfile, "learns": learns, "tokens": tokens }))
    }

    async fn close(&self, _statfile: &str) -> StatResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RedisStatBackend
// ---------------------------------------------------------------------------
//
// Key layout:
//   <prefix>_<statfile>           hash token → count
//   <prefix>_<statfile>_learns    counter

pub struct RedisStatBackend {
    prefix: String,
    db: i64,
    password: Option<String>,
    timeout: Duration,
    upstreams: UpstreamPool,
    pool: Arc<RedisPool>,
}

impl RedisStatBackend {
    pub fn new(config: &RedisServerConfig, prefix: &str, pool: Arc<RedisPool>) -> StatResult<Self> {
        let upstreams =
            UpstreamPool::from_list(&config.servers, 6379, config.limits).map_err(|e| {
                StructError::from(StatReason::Backend).with_detail(format!("server list: {e}"))
            })?;
        Ok(Self {
            prefix: prefix.to_string(),
            db: config.db,
            password: config.password.clone(),
            timeout: config.timeout.as_duration(),
            upstreams,
            pool,
        })
    }

    fn file_key(&self, statfile: &str) -> String {
        format!("{}_{}", self.prefix, statfile)
    }

    fn learns_key(&self, statfile: &str) -> String {
        format!("{}_{}_learns", self.prefix, statfile)
    }

    async fn exchange<T, F>(&self, op: &str, run: F) -> StatResult<T>
    where
        T: Send,
        F: AsyncFnOnce(&mut redis::aio::MultiplexedConnection) -> Result<T, redis::RedisError>,
    {
        let upstream = self.upstreams.get(Strategy::RoundRobin, None).map_err(|e| {
            StructError::from(StatReason::Backend).with_detail(format!("no upstream: {e}"))
        })?;
        let mut conn = match self
            .pool
            .connect(
                upstream.host(),
                upstream.port(),
                self.db,
                self.password.as_deref(),
            )
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                self.upstreams.fail(&upstream, "connect");
                return Err(StructError::from(StatReason::Backend)
                    .with_detail(format!("stat connect: {e}")));
            }
        };

        match tokio::time::timeout(self.timeout, run(&mut conn.conn)).await {
            Ok(Ok(value)) => {
                self.upstreams.ok(&upstream);
                self.pool.release(conn, false);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.upstreams.fail(&upstream, "command");
                self.pool.release(conn, true);
                Err(StructError::from(StatReason::Backend).with_detail(format!("{op}: {e}")))
            }
            Err(_) => {
                self.upstreams.fail(&upstream, "timeout");
                self.pool.release(conn, true);
                Err(StructError::from(StatReason::Backend).with_detail(format!("{op}: timeout")))
            }
        }
    }
}

#[async_trait]
impl StatBackend for RedisStatBackend {
    async fn open(&self, _statfile: &str) -> StatResult<()> {
        Ok(())
    }

    async fn process_tokens(
        &self,
        statfile: &str,
        tokens: &mut [Token],
        slot: usize,
    ) -> StatResult<()> {
        if tokens.is_empty() {
            return Ok(());
        }
        let key = self.file_key(statfile);
        let hashes: Vec<u64> = tokens.iter().map(|t| t.hash).collect();
        let counts: Vec<Option<u64>> = self
            .exchange("process_tokens", async |conn| {
                let mut cmd = redis::cmd("HMGET");
                cmd.arg(&key);
                for h in &hashes {
                    cmd.arg(h.to_string());
                }
                cmd.query_async(conn).await
            })
            .await?;
        for (token, count) in tokens.iter_mut().zip(counts) {
            token.counts[slot] = count.unwrap_or(0);
        }
        Ok(())
    }

    async fn learn_tokens(&self, statfile: &str, tokens: &[Token]) -> StatResult<()> {
        let key = self.file_key(statfile);
        let mut pipe = redis::pipe();
        pipe.atomic();
        for token in tokens {
            pipe.cmd("HINCRBY")
                .arg(&key)
                .arg(token.hash.to_string())
                .arg(1)
                .ignore();
        }
        self.exchange("learn_tokens", async |conn| {
            pipe.query_async::<()>(conn).await
        })
        .await
    }

    async fn total_learns(&self, statfile: &str) -> StatResult<u64> {
        let key = self.learns_key(statfile);
        let learns: Option<i64> = self
            .exchange("total_learns", async |conn| {
                redis::cmd("GET").arg(&key).query_async(conn).await
            })
            .await?;
        Ok(learns.unwrap_or(0).max(0) as u64)
    }

    async fn inc_learns(&self, statfile: &str) -> StatResult<()> {
        let key = self.learns_key(statfile);
        self.exchange("inc_learns", async |conn| {
            redis::cmd("INCR").arg(&key).query_async::<i64>(conn).await
        })
        .await?;
        Ok(())
    }

    async fn dec_learns(&self, statfile: &str) -> StatResult<()> {
        let key = self.learns_key(statfile);
        self.exchange("dec_learns", async |conn| {
            redis::cmd("DECR").arg(&key).query_async::<i64>(conn).await
        })
        .await?;
        Ok(())
    }

    async fn finalize_learn(&self, _statfile: &str) -> StatResult<()> {
        // Redis writes are not buffered locally.
        Ok(())
    }

    async fn get_stat(&self, statfile: &str) -> StatResult<serde_json::Value> {
        let file_key = self.file_key(statfile);
        let learns = self.total_learns(statfile).await?;
        let tokens: u64 = self
            .exchange("get_stat", async |conn| {
                redis::cmd("HLEN").arg(&file_key).query_async(conn).await
            })
            .await?;
        Ok(json!({ "statfile": statfile, "learns": learns, "tokens": tokens }))
    }

    async fn close(&self, _statfile: &str) -> StatResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(hashes: &[u64], slots: usize) -> Vec<Token> {
        hashes
            .iter()
            .map(|&h| Token {
                hash: h,
                counts: vec![0; slots],
            })
            .collect()
    }

    #[tokio::test]
    async fn memory_learn_then_process() {
        let backend = MemoryStatBackend::new();
        backend.open("spam").await.unwrap();

        let learned = tokens(&[1, 2, 2, 3], 1);
        backend.learn_tokens("spam", &learned).await.unwrap();
        backend.inc_learns("spam").await.unwrap();
        backend.finalize_learn("spam").await.unwrap();

        let mut probe = tokens(&[1, 2, 4], 1);
        backend.process_tokens("spam", &mut probe, 0).await.unwrap();
        assert_eq!(probe[0].counts[0], 1);
        assert_eq!(probe[1].counts[0], 2);
        assert_eq!(probe[2].counts[0], 0);
        assert_eq!(backend.total_learns("spam").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn memory_dec_learns_saturates() {
        let backend = MemoryStatBackend::new();
        backend.dec_learns("ham").await.unwrap();
        assert_eq!(backend.total_learns("ham").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn memory_statfiles_are_isolated() {
        let backend = MemoryStatBackend::new();
        backend.learn_tokens("spam", &tokens(&[7], 1)).await.unwrap();
        let mut probe = tokens(&[7], 1);
        backend.process_tokens("ham", &mut probe, 0).await.unwrap();
        assert_eq!(probe[0].counts[0], 0);
    }

    #[tokio::test]
    async fn memory_get_stat_shape() {
        let backend = MemoryStatBackend::new();
        backend.learn_tokens("spam", &tokens(&[1, 2], 1)).await.unwrap();
        backend.inc_learns("spam").await.unwrap();
        let stat = backend.get_stat("spam").await.unwrap();
        assert_eq!(stat["learns"], 1);
        assert_eq!(stat["tokens"], 2);
    }

    #[test]
    fn redis_key_layout() {
        let config: RedisServerConfig =
            toml::from_str("servers = \"127.0.0.1:6379\"").unwrap();
        let backend =
            RedisStatBackend::new(&config, "bayes", RedisPool::new(Default::default())).unwrap();
        assert_eq!(backend.file_key("spam"), "bayes_spam");
        assert_eq!(backend.learns_key("spam"), "bayes_spam_learns");
    }
}
