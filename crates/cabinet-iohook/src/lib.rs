#![forbid(unsafe_code)]

//! Interception of an application's device operations.
//!
//! Every `open`/`close`/`read`/`write`/`ioctl` the application issues becomes an [`IoRequest`]
//! that travels down an [`IoChain`] of [`IoHandler`]s until one claims it. Handlers that do not
//! recognize a request forward it through [`Next`]; a request nobody claims fails with
//! [`IoError::NotSupported`].

mod chain;
mod completion;
mod error;
mod request;

pub use chain::{handler_fn, opens_path, IoChain, IoHandler, IoResult, Next};
pub use completion::{Completion, Transfer};
pub use error::IoError;
pub use request::{Handle, IoOp, IoRequest, IoStatus};
