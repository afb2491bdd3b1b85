use cabinet_frame::BufferError;
use thiserror::Error;

/// Failure of an intercepted device operation, as seen by the calling application.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    /// No handler in the chain claimed the request. This is also what an unknown path or a
    /// stale handle looks like to the caller.
    #[error("function not supported")]
    NotSupported,

    #[error("sharing violation: {0} is already open")]
    SharingViolation(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("unsupported ioctl {0:#010x}")]
    UnsupportedIoctl(u32),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("async worker unavailable: {0}")]
    WorkerUnavailable(String),
}
