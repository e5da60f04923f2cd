mod memory;
mod redis_backend;

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::FuzzyResult;
use crate::wire::{DIGEST_LEN, FuzzyCmd, SHINGLE_COUNT, SHINGLE_MATCH_THRESHOLD};

pub use memory::MemoryFuzzyBackend;
pub use redis_backend::RedisFuzzyBackend;

// ---------------------------------------------------------------------------
// Backend contract
// ---------------------------------------------------------------------------

/// Result of a backend check: the stored value/flag and the match
/// probability (1.0 for a direct digest hit, the vote ratio for a shingle
/// match, 0.0 for a miss).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FuzzyHit {
    pub value: i32,
    pub flag: i32,
    pub prob: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncReport {
    pub expired: u64,
}

/// Storage behind the fuzzy server. Reads elide expired entries; the
/// periodic [`FuzzyBackend::sync`] compacts them where the store does not
/// expire natively.
#[async_trait]
pub trait FuzzyBackend: Send + Sync {
    /// Stable public identity used in log tags, derived from the backend
    /// location so concurrent instances are distinguishable.
    fn id(&self) -> &str;

    async fn check(&self, cmd: &FuzzyCmd, expire: Duration) -> FuzzyResult<FuzzyHit>;

    /// `source` names the submitting peer for the per-source learn counter.
    async fn add(&self, cmd: &FuzzyCmd, expire: Duration, source: &str) -> FuzzyResult<()>;

    async fn del(&self, cmd: &FuzzyCmd) -> FuzzyResult<()>;

    async fn count(&self) -> FuzzyResult<u64>;

    async fn sync(&self, expire: Duration) -> FuzzyResult<SyncReport>;
}

// ---------------------------------------------------------------------------
// Shingle voting, shared by the backends
// ---------------------------------------------------------------------------

/// Majority vote over resolved shingle→digest entries. A candidate wins
/// when enough shingles resolved at all *and* one digest collected
/// strictly more than half the votes. Returns the digest and its count.
pub(crate) fn shingle_vote(
    resolved: &[Option<[u8; DIGEST_LEN]>],
) -> Option<([u8; DIGEST_LEN], usize)> {
    let found = resolved.iter().flatten().count();
    if found <= SHINGLE_MATCH_THRESHOLD {
        return None;
    }
    let mut digests: Vec<&[u8; DIGEST_LEN]> = resolved.iter().flatten().collect();
    digests.sort_unstable();

    let mut best: Option<(&[u8; DIGEST_LEN], usize)> = None;
    let mut cur: Option<(&[u8; DIGEST_LEN], usize)> = None;
    for d in digests {
        cur = match cur {
            Some((prev, n)) if prev == d => Some((prev, n + 1)),
            _ => Some((d, 1)),
        };
        if let Some((d, n)) = cur
            && best.is_none_or(|(_, bn)| n > bn)
        {
            best = Some((d, n));
        }
    }
    match best {
        Some((digest, count)) if count > SHINGLE_MATCH_THRESHOLD => Some((*digest, count)),
        _ => None,
    }
}

/// `prob` for a shingle vote win.
pub(crate) fn vote_prob(count: usize) -> f32 {
    count as f32 / SHINGLE_COUNT as f32
}

// ---------------------------------------------------------------------------
// Backend identity
// ---------------------------------------------------------------------------

/// `base32(sha256(prefix ‖ db ‖ password))`, truncated for log tags.
pub(crate) fn backend_id(prefix: &str, db: i64, password: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(db.to_le_bytes());
    if let Some(p) = password {
        hasher.update(p.as_bytes());
    }
    let digest = hasher.finalize();
    let mut id = base32(&digest);
    id.truncate(10);
    id
}

/// RFC 4648 base32, lowercase, unpadded. Small enough to keep local
/// rather than pulling an encoding crate for one call site.
fn base32(data: &[u8]) -> String {
    const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    for chunk in data.chunks(5) {
        let mut buf = [0u8; 5];
        buf[..chunk.len()].copy_from_slice(chunk);
        let v = u64::from_be_bytes([0, 0, 0, buf[0], buf[1], buf[2], buf[3], buf[4]]);
        let bits = chunk.len() * 8;
        let chars = bits.div_ceil(5);
        for i in 0..chars {
            let shift = 40 - 5 * (i + 1);
            out.push(ALPHABET[((v >> shift) & 0x1f) as usize] as char);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
