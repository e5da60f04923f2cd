use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};
use sg_net::NetReason;

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum FuzzyReason {
    #[error("malformed fuzzy command")]
    BadCommand,
    #[error("fuzzy backend error")]
    Backend,
    #[error("fuzzy sync error")]
    Sync,
    #[error("{0}")]
    Net(NetReason),
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for FuzzyReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::BadCommand => 4001,
            Self::Backend => 4002,
            Self::Sync => 4003,
            Self::Net(n) => n.error_code(),
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type FuzzyError = StructError<FuzzyReason>;
pub type FuzzyResult<T> = Result<T, FuzzyError>;
