pub mod backend;
pub mod classifier;
pub mod error;
pub mod learn_cache;
pub mod process;
pub mod tokenize;

pub use backend::{MemoryStatBackend, RedisStatBackend, StatBackend};
pub use classifier::{BayesClassifier, Verdict};
pub use error::{StatError, StatReason, StatResult};
pub use learn_cache::{CacheVerdict, LearnCache, MemoryLearnCache};
pub use process::{ClassifyOutcome, PreCallback, StatContext};
pub use tokenize::{OsbTokenizer, Token, TokenizerRuntime, TokenizerSet};
