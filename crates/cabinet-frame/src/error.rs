use thiserror::Error;

/// Cursor arithmetic failures shared by every buffer user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// A write would have moved the cursor past the buffer's capacity.
    #[error("buffer overflow: need {needed} bytes, {available} available")]
    Overflow { needed: usize, available: usize },

    /// A read asked for more bytes than remain in the source.
    #[error("insufficient data: need {needed} bytes, {available} available")]
    InsufficientCapacity { needed: usize, available: usize },
}

/// Wire-level framing violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("frame does not start with sync byte {expected:#04x} (got {got:#04x})")]
    BadSync { expected: u8, got: u8 },

    #[error("unescaped sync byte at offset {offset}")]
    UnescapedSync { offset: usize },

    /// The input ended immediately after an escape byte.
    #[error("escape byte at end of input")]
    TrailingEscape,

    #[error("checksum mismatch: expected {expected:#04x}, got {got:#04x}")]
    ChecksumMismatch { expected: u8, got: u8 },

    #[error("frame truncated after {decoded} bytes")]
    Truncated { decoded: usize },

    #[error("frame length byte {declared} does not match body of {actual} bytes")]
    BadLength { declared: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

pub type Result<T> = std::result::Result<T, FrameError>;
