pub mod backend;
pub mod error;
pub mod server;
pub mod shingles;
pub mod wire;

pub use backend::{FuzzyBackend, FuzzyHit, MemoryFuzzyBackend, RedisFuzzyBackend, SyncReport};
pub use error::{FuzzyError, FuzzyReason, FuzzyResult};
pub use server::{FuzzyServer, FuzzyServerStats};
pub use wire::{
    DIGEST_LEN, FuzzyCmd, FuzzyCmdKind, FuzzyEpoch, FuzzyReply, SHINGLE_COUNT,
    SHINGLE_MATCH_THRESHOLD,
};
