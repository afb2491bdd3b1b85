use std::sync::{Arc, PoisonError, RwLock};

use crate::completion::{Completion, Transfer};
use crate::error::IoError;
use crate::request::{Handle, IoOp, IoRequest, IoStatus};

pub type IoResult = Result<IoStatus, IoError>;

/// A device emulation that may claim intercepted operations.
///
/// A handler that does not recognize a request (foreign path, foreign handle) forwards it by
/// calling `next.invoke(req)` and returning that result unchanged.
pub trait IoHandler: Send + Sync {
    fn handle(&self, req: &mut IoRequest, next: Next<'_>) -> IoResult;
}

impl<F> IoHandler for F
where
    F: Fn(&mut IoRequest, Next<'_>) -> IoResult + Send + Sync,
{
    fn handle(&self, req: &mut IoRequest, next: Next<'_>) -> IoResult {
        self(req, next)
    }
}

/// Wraps a closure as a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn IoHandler>
where
    F: Fn(&mut IoRequest, Next<'_>) -> IoResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The remainder of the chain below the handler currently running.
pub struct Next<'a> {
    handlers: &'a [Arc<dyn IoHandler>],
}

impl Next<'_> {
    /// Passes `req` to the next handler. Past the last handler nothing claims it.
    pub fn invoke(self, req: &mut IoRequest) -> IoResult {
        match self.handlers.split_last() {
            Some((handler, rest)) => handler.handle(req, Next { handlers: rest }),
            None => {
                tracing::trace!(op = ?req.op, handle = req.handle.raw(), path = req.path(), "unclaimed I/O request");
                Err(IoError::NotSupported)
            }
        }
    }
}

/// Ordered set of [`IoHandler`]s. The most recently registered handler sees each request first.
pub struct IoChain {
    handlers: RwLock<Arc<[Arc<dyn IoHandler>]>>,
}

impl Default for IoChain {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(Arc::from(Vec::new())),
        }
    }
}

impl IoChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn IoHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = handlers.to_vec();
        next.push(handler);
        *handlers = next.into();
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Dispatch runs on a snapshot so handlers may register others without deadlocking.
    fn snapshot(&self) -> Arc<[Arc<dyn IoHandler>]> {
        Arc::clone(&self.handlers.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn invoke(&self, req: &mut IoRequest) -> IoResult {
        let handlers = self.snapshot();
        Next {
            handlers: &handlers,
        }
        .invoke(req)
    }

    pub fn open(&self, path: &str) -> Result<Handle, IoError> {
        let mut req = IoRequest::open(path);
        self.invoke(&mut req)?;
        if !req.handle.is_valid() {
            return Err(IoError::InvalidParameter("open claimed without a handle"));
        }
        Ok(req.handle)
    }

    pub fn close(&self, handle: Handle) -> Result<(), IoError> {
        self.invoke(&mut IoRequest::close(handle)).map(|_| ())
    }

    /// Reads up to `len` bytes synchronously.
    pub fn read(&self, handle: Handle, len: usize) -> Result<Vec<u8>, IoError> {
        let mut req = IoRequest::read(handle, len);
        self.invoke(&mut req)?;
        Ok(req.read.filled().to_vec())
    }

    /// Writes `bytes`, returning how many the device consumed.
    pub fn write(&self, handle: Handle, bytes: &[u8]) -> Result<usize, IoError> {
        let mut req = IoRequest::write(handle, bytes);
        self.invoke(&mut req)?;
        Ok(req.write.pos())
    }

    /// Issues a device control, returning up to `out_len` bytes of output.
    pub fn ioctl(
        &self,
        handle: Handle,
        code: u32,
        input: &[u8],
        out_len: usize,
    ) -> Result<Vec<u8>, IoError> {
        let mut req = IoRequest::ioctl(handle, code, input, out_len);
        self.invoke(&mut req)?;
        Ok(req.read.filled().to_vec())
    }

    /// Submits `req` with `completion` attached. A `Pending` result means the token will be
    /// signalled later; a `Complete` one has already been published to it.
    pub fn submit_overlapped(
        &self,
        mut req: IoRequest,
        completion: &Arc<Completion>,
    ) -> Result<IoStatus, IoError> {
        completion.mark_pending();
        req.completion = Some(Arc::clone(completion));
        match self.invoke(&mut req) {
            Ok(IoStatus::Complete) => {
                completion.complete(Ok(Transfer::from_request(&req)));
                Ok(IoStatus::Complete)
            }
            Ok(IoStatus::Pending) => Ok(IoStatus::Pending),
            Err(err) => {
                completion.complete(Err(err.clone()));
                Err(err)
            }
        }
    }

    /// Overlapped read that blocks on the completion token, whichever way the handler chose.
    pub fn read_overlapped(&self, handle: Handle, len: usize) -> Result<Vec<u8>, IoError> {
        let completion = Arc::new(Completion::new());
        self.submit_overlapped(IoRequest::read(handle, len), &completion)?;
        Ok(completion.wait()?.data)
    }

    /// Overlapped write counterpart of [`Self::read_overlapped`].
    pub fn write_overlapped(&self, handle: Handle, bytes: &[u8]) -> Result<usize, IoError> {
        let completion = Arc::new(Completion::new());
        self.submit_overlapped(IoRequest::write(handle, bytes), &completion)?;
        Ok(completion.wait()?.bytes_written)
    }
}

impl std::fmt::Debug for IoChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoChain")
            .field("handlers", &self.len())
            .finish()
    }
}

/// True if `req` is an `Open` for one of `names`, compared case-insensitively with an
/// optional `\\.\` device-namespace prefix.
pub fn opens_path(req: &IoRequest, names: &[&str]) -> bool {
    if req.op != IoOp::Open {
        return false;
    }
    let path = req.path();
    let path = path.strip_prefix(r"\\.\").unwrap_or(path);
    names.iter().any(|name| path.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recording(
        name: &'static str,
        claims: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn IoHandler> {
        handler_fn(move |req, next| {
            log.lock().unwrap().push(name);
            if opens_path(req, &[claims]) {
                req.handle = Handle::alloc();
                Ok(IoStatus::Complete)
            } else {
                next.invoke(req)
            }
        })
    }

    #[test]
    fn last_registered_runs_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = IoChain::new();
        chain.register(recording("first", "A", Arc::clone(&log)));
        chain.register(recording("second", "B", Arc::clone(&log)));

        chain.open("A").unwrap();
        assert_eq!(*log.lock().unwrap(), ["second", "first"]);

        log.lock().unwrap().clear();
        chain.open("B").unwrap();
        assert_eq!(*log.lock().unwrap(), ["second"]);
    }

    #[test]
    fn unclaimed_request_is_not_supported() {
        let chain = IoChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.open("COM1"), Err(IoError::NotSupported));

        let log = Arc::new(Mutex::new(Vec::new()));
        chain.register(recording("only", "COM2", log));
        assert_eq!(chain.open("COM1"), Err(IoError::NotSupported));
        assert_eq!(chain.read(Handle::alloc(), 4), Err(IoError::NotSupported));
    }

    #[test]
    fn open_without_handle_is_rejected() {
        let chain = IoChain::new();
        chain.register(handler_fn(|_, _| Ok(IoStatus::Complete)));
        assert!(matches!(chain.open("X"), Err(IoError::InvalidParameter(_))));
    }

    #[test]
    fn synchronous_completion_is_published_to_token() {
        let chain = IoChain::new();
        chain.register(handler_fn(|req, _| {
            req.read.write(b"ok")?;
            Ok(IoStatus::Complete)
        }));

        let token = Arc::new(Completion::new());
        let status = chain
            .submit_overlapped(IoRequest::read(Handle::alloc(), 8), &token)
            .unwrap();
        assert_eq!(status, IoStatus::Complete);
        assert_eq!(token.wait().unwrap().data, b"ok");
    }

    #[test]
    fn path_matching_accepts_device_namespace() {
        assert!(opens_path(&IoRequest::open(r"\\.\com4"), &["COM4"]));
        assert!(opens_path(&IoRequest::open("COM4"), &["COM3", "COM4"]));
        assert!(!opens_path(&IoRequest::open("COM40"), &["COM4"]));
        assert!(!opens_path(&IoRequest::close(Handle::alloc()), &["COM4"]));
    }
}
