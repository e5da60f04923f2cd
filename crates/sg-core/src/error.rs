use derive_more::From;
use orion_error::{ErrorCode, StructError, UvsReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error, From)]
pub enum CoreReason {
    #[error("message parse error")]
    Message,
    #[error("symbol registration error")]
    Registration,
    #[error("cyclic symbol dependency")]
    DependencyCycle,
    #[error("symbol callback error")]
    Callback,
    #[error("composite expression error")]
    Composite,
    #[error("{0}")]
    Uvs(UvsReason),
}

impl ErrorCode for CoreReason {
    fn error_code(&self) -> i32 {
        match self {
            Self::Message => 1001,
            Self::Registration => 1002,
            Self::DependencyCycle => 1003,
            Self::Callback => 1004,
            Self::Composite => 1005,
            Self::Uvs(u) => u.error_code(),
        }
    }
}

pub type CoreError = StructError<CoreReason>;
pub type CoreResult<T> = Result<T, CoreError>;
