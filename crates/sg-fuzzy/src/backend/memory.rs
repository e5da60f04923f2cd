use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::FuzzyResult;
use crate::wire::{DIGEST_LEN, FuzzyCmd};

use super::{FuzzyBackend, FuzzyHit, SyncReport, backend_id, shingle_vote, vote_prob};

// ---------------------------------------------------------------------------
// MemoryFuzzyBackend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Record {
    value: i32,
    flag: i32,
    expire_at: Instant,
}

#[derive(Default)]
struct State {
    digests: HashMap<[u8; DIGEST_LEN], Record>,
    /// `(slot, shingle_hash)` → digest.
    shingles: HashMap<(u8, u64), [u8; DIGEST_LEN]>,
    count: i64,
    sources: HashMap<String, u64>,
}

/// Process-local storage honouring the backend contract: expired records
/// are elided on read and compacted by [`FuzzyBackend::sync`]. Used by
/// tests and single-node deployments.
pub struct MemoryFuzzyBackend {
    id: String,
    state: Mutex<State>,
}

impl Default for MemoryFuzzyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFuzzyBackend {
    pub fn new() -> Self {
        Self {
            id: backend_id("memory", 0, None),
            state: Mutex::new(State::default()),
        }
    }

    /// Per-source write counters, for the controller stats output.
    pub fn source_counts(&self) -> Vec<(String, u64)> {
        let state = self.state.lock().expect("fuzzy state poisoned");
        let mut out: Vec<(String, u64)> = state
            .sources
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        out.sort();
        out
    }

    fn live_record(state: &State, digest: &[u8; DIGEST_LEN], now: Instant) -> Option<Record> {
        state
            .digests
            .get(digest)
            .copied()
            .filter(|r| r.expire_at > now)
    }
}

#[async_trait]
impl FuzzyBackend for MemoryFuzzyBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&self, cmd: &FuzzyCmd, _expire: Duration) -> FuzzyResult<FuzzyHit> {
        let now = Instant::now();
        let state = self.state.lock().expect("fuzzy state poisoned");

        if let Some(record) = Self::live_record(&state, &cmd.digest, now) {
            return Ok(FuzzyHit {
                value: record.value,
                flag: record.flag,
                prob: 1.0,
            });
        }

        // Direct miss: try the shingle index when the command carries one.
        if let Some(shingles) = &cmd.shingles {
            let resolved: Vec<Option<[u8; DIGEST_LEN]>> = shingles
                .iter()
                .enumerate()
                .map(|(i, h)| {
                    state
                        .shingles
                        .get(&(i as u8, *h))
                        .copied()
                        .filter(|d| Self::live_record(&state, d, now).is_some())
                })
                .collect();
            if let Some((winner, votes)) = shingle_vote(&resolved)
                && let Some(record) = Self::live_record(&state, &winner, now)
            {
                return Ok(FuzzyHit {
                    value: record.value,
                    flag: record.flag,
                    prob: vote_prob(votes),
                });
            }
        }

        Ok(FuzzyHit::default())
    }

    async fn add(&self, cmd: &FuzzyCmd, expire: Duration, source: &str) -> FuzzyResult<()> {
        let now = Instant::now();
        let mut state = self.state.lock().expect("fuzzy state poisoned");

        let expire_at = now + expire;
        let entry = state.digests.entry(cmd.digest);
        match entry {
            std::collections::hash_map::Entry::Occupied(mut o) => {
                let record = o.get_mut();
                if record.expire_at > now {
                    // Increment semantics: values accumulate, the flag is
                    // replaced by the newest write.
                    record.value += cmd.value;
                } else {
                    record.value = cmd.value;
                }
                record.flag = cmd.flag;
                record.expire_at = expire_at;
            }
            std::collections::hash_map::Entry::Vacant(v) => {
                v.insert(Record {
                    value: cmd.value,
                    flag: cmd.flag,
                    expire_at,
                });
            }
        }
        state.count += 1;

        if let Some(shingles) = &cmd.shingles {
            for (i, h) in shingles.iter().enumerate() {
                state.shingles.insert((i as u8, *h), cmd.digest);
            }
        }
        *state.sources.entry(source.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn del(&self, cmd: &FuzzyCmd) -> FuzzyResult<()> {
        let mut state = self.state.lock().expect("fuzzy state poisoned");
        state.digests.remove(&cmd.digest);
        state.count -= 1;
        if let Some(shingles) = &cmd.shingles {
            for (i, h) in shingles.iter().enumerate() {
                state.shingles.remove(&(i as u8, *h));
            }
        } else {
            // Without the shingle block, drop any index entry pointing at
            // the removed digest.
            state.shingles.retain(|_, d| d != &cmd.digest);
        }
        Ok(())
    }

    async fn count(&self) -> FuzzyResult<u64> {
        let state = self.state.lock().expect("fuzzy state poisoned");
        Ok(state.count.max(0) as u64)
    }

    async fn sync(&self, _expire: Duration) -> FuzzyResult<SyncReport> {
        let now = Instant::now();
        let mut state = self.state.lock().expect("fuzzy state poisoned");
        let before = state.digests.len();
        state.digests.retain(|_, r| r.expire_at > now);
        let expired = (before - state.digests.len()) as u64;
        let live: std::collections::HashSet<[u8; DIGEST_LEN]> =
            state.digests.keys().copied().collect();
        state.shingles.retain(|_, d| live.contains(d));
        Ok(SyncReport { expired })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
