use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum StatReason {
    #[error("statistics backend error")]
    Backend,
    #[error("no matching classifier")]
    NoClassifier,
    #[error("too few tokens to classify")]
    TooFewTokens,
    #[error("message already learned as this class")]
    AlreadyLearned,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for StatReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Backend => 5001,
            Self::NoClassifier => 5002,
            Self::TooFewTokens => 5003,
            Self::AlreadyLearned => 5004,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type StatError = StructError<StatReason>;
pub type StatResult<T> = Result<T, StatError>;
