use cabinet_frame::BufferError;
use thiserror::Error;

use crate::packet::status;

/// Failure of one command segment. Aborts the rest of the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("unsupported command {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("invalid argument to command {command:#04x}: {reason}")]
    InvalidArgument { command: u8, reason: &'static str },

    /// The request asks for more than the node reports (players, slots, channels, GPIO bytes).
    #[error("command {0:#04x} exceeds node limits")]
    Overflow(u8),

    /// A segment cut short, or a response accumulator that filled up.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

impl DispatchError {
    /// Status byte reported in place of the aborted packet's reports.
    pub fn status(&self) -> u8 {
        match self {
            Self::Overflow(_) | Self::Buffer(_) => status::OVERFLOW,
            Self::UnsupportedCommand(_) | Self::InvalidArgument { .. } => status::UNSUPPORTED,
        }
    }
}
