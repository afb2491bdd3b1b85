#![forbid(unsafe_code)]

//! Byte-stuffed frame codecs and the cursor buffers they read from and write into.
//!
//! Three wire formats share one encoder/decoder, parameterized by [`FrameFormat`]:
//!
//! | Format | Sync | Escape | Checksum | Length |
//! |---|---|---|---|---|
//! | [`NODE_BUS`] | `E0` | `D0` | sum of body | whole input |
//! | [`COMMAND_BUS`] | `E0` | `D0` | sum of body | `body[0]` |
//! | [`TOUCH_PANEL`] | `FF` | `FD` | negated sum incl. sync | `body[1]` + 2 |

mod codec;
mod error;
pub mod iobuf;

pub use codec::{
    Checksum, Decoded, FrameFormat, LengthField, COMMAND_BUS, NODE_BUS, TOUCH_PANEL,
};
pub use error::{BufferError, FrameError, ProtocolError, Result};
pub use iobuf::{ConstIoBuf, HexBytes, IoBuf};
