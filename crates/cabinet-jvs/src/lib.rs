#![forbid(unsafe_code)]

//! JVS (JAMMA Video Standard) bus emulation.
//!
//! A [`JvsBus`] owns a daisy chain of [`JvsNode`]s. Request frames from the host are broadcast
//! to every node; each node cracks the packet with [`crack_request`], dispatches the commands
//! addressed to it, and appends its own response frame. [`Io3`] is the stock I/O board.

mod bus;
mod error;
pub mod io3;
pub mod packet;

pub use bus::{JvsBus, JvsNode};
pub use error::DispatchError;
pub use io3::{IdleBackend, Io3, Io3Backend, Switches};
pub use packet::{
    accepts, crack_request, decode_response, encode_request, split_frames, Dispatch,
    PacketScratch, Response, BROADCAST, MASTER, UNASSIGNED,
};
