use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cabinet_frame::{ConstIoBuf, IoBuf};

use crate::completion::Completion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoOp {
    Open,
    Close,
    Read,
    Write,
    Ioctl,
}

/// Opaque device handle handed out by whichever handler claims an `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    pub const INVALID: Handle = Handle(0);

    /// Allocates a fresh handle. Values are never reused within a process.
    pub fn alloc() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Handle(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Whether a claimed request finished before the handler returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    Complete,
    /// The request's completion token will be signalled later.
    Pending,
}

/// One intercepted device operation.
///
/// `read` receives data (and ioctl output); `write` supplies data (and ioctl input). A request
/// carrying a `completion` token may be finished asynchronously.
#[derive(Debug, Clone)]
pub struct IoRequest {
    pub op: IoOp,
    pub handle: Handle,
    pub path: Option<String>,
    pub read: IoBuf,
    pub write: ConstIoBuf,
    pub ioctl: u32,
    pub completion: Option<Arc<Completion>>,
}

impl IoRequest {
    fn new(op: IoOp, handle: Handle) -> Self {
        Self {
            op,
            handle,
            path: None,
            read: IoBuf::with_capacity(0),
            write: ConstIoBuf::default(),
            ioctl: 0,
            completion: None,
        }
    }

    pub fn open(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new(IoOp::Open, Handle::INVALID)
        }
    }

    pub fn close(handle: Handle) -> Self {
        Self::new(IoOp::Close, handle)
    }

    pub fn read(handle: Handle, len: usize) -> Self {
        Self {
            read: IoBuf::with_capacity(len),
            ..Self::new(IoOp::Read, handle)
        }
    }

    pub fn write(handle: Handle, bytes: &[u8]) -> Self {
        Self {
            write: ConstIoBuf::from(bytes),
            ..Self::new(IoOp::Write, handle)
        }
    }

    pub fn ioctl(handle: Handle, code: u32, input: &[u8], out_len: usize) -> Self {
        Self {
            ioctl: code,
            write: ConstIoBuf::from(input),
            read: IoBuf::with_capacity(out_len),
            ..Self::new(IoOp::Ioctl, handle)
        }
    }

    pub fn with_completion(mut self, completion: Arc<Completion>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// The path of an `Open`, or `""` for every other op.
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or("")
    }
}
