use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid run state: {0}")]
    InvalidState(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("probe failed: {0}")]
    ProbeFailure(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("server responded with status {0}")]
    ServerError(u16),
    #[error("range request answered with status {0} instead of 206")]
    RangeNotHonored(u16),
    #[error("partition {index} has {actual} bytes, expected {expected}")]
    PartLengthMismatch {
        index: usize,
        expected: u64,
        actual: u64,
    },
    #[error("merged file has {actual} bytes, expected {expected}")]
    IncompleteFile { expected: u64, actual: u64 },
    #[error("filesystem error: {0}")]
    Filesystem(String),
    #[error("canceled")]
    Canceled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl CoreError {
    /// True for errors raised because a sibling failed, not for root causes.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, CoreError::Canceled)
    }

    /// Errors caused by bad input, detected before any I/O.
    pub fn is_usage(&self) -> bool {
        matches!(self, CoreError::InvalidUrl(_) | CoreError::InvalidConfig(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
