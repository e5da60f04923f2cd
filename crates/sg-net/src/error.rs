use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum NetReason {
    #[error("upstream pool is empty")]
    UpstreamEmpty,
    #[error("all upstreams are dead")]
    UpstreamAllDead,
    #[error("connection error")]
    Connect,
    #[error("backend command error")]
    Command,
    #[error("operation timed out")]
    Timeout,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for NetReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::UpstreamEmpty => 3001,
            Self::UpstreamAllDead => 3002,
            Self::Connect => 3003,
            Self::Command => 3004,
            Self::Timeout => 3005,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type NetError = StructError<NetReason>;
pub type NetResult<T> = Result<T, NetError>;
