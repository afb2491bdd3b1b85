use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;

use cabinet_iohook::*;

/// Claims every `Open` of `name`, handing out a fresh handle each time, and echoes writes back
/// on read.
struct Loopback {
    name: &'static str,
    handles: Mutex<HashSet<Handle>>,
    data: Mutex<Vec<u8>>,
}

impl IoHandler for Loopback {
    fn handle(&self, req: &mut IoRequest, next: Next<'_>) -> IoResult {
        if opens_path(req, &[self.name]) {
            req.handle = Handle::alloc();
            self.handles.lock().unwrap().insert(req.handle);
            return Ok(IoStatus::Complete);
        }
        if !self.handles.lock().unwrap().contains(&req.handle) {
            return next.invoke(req);
        }
        match req.op {
            IoOp::Close => {
                self.handles.lock().unwrap().remove(&req.handle);
            }
            IoOp::Write => {
                let bytes = req.write.unread().to_vec();
                req.write.skip(bytes.len())?;
                self.data.lock().unwrap().extend_from_slice(&bytes);
            }
            IoOp::Read => {
                let mut data = self.data.lock().unwrap();
                let n = data.len().min(req.read.remaining());
                req.read.write(&data[..n])?;
                data.drain(..n);
            }
            IoOp::Open | IoOp::Ioctl => return Err(IoError::InvalidParameter("loopback")),
        }
        Ok(IoStatus::Complete)
    }
}

fn loopback(name: &'static str) -> Arc<Loopback> {
    Arc::new(Loopback {
        name,
        handles: Mutex::new(HashSet::new()),
        data: Mutex::new(Vec::new()),
    })
}

#[test]
fn handlers_only_see_their_own_handles() {
    let chain = IoChain::new();
    let a = loopback("A");
    let b = loopback("B");
    chain.register(a.clone());
    chain.register(b.clone());

    let ha = chain.open("A").unwrap();
    let hb = chain.open("B").unwrap();
    assert_ne!(ha, hb);

    assert_eq!(chain.write(ha, b"to-a").unwrap(), 4);
    assert_eq!(chain.write(hb, b"b").unwrap(), 1);
    assert_eq!(chain.read(ha, 16).unwrap(), b"to-a");
    assert_eq!(chain.read(hb, 16).unwrap(), b"b");

    // Unknown ioctl on a claimed handle is the handler's error, not NotSupported.
    assert_eq!(
        chain.ioctl(ha, 1, &[], 0),
        Err(IoError::InvalidParameter("loopback"))
    );

    chain.close(ha).unwrap();
    assert_eq!(chain.read(ha, 1), Err(IoError::NotSupported));
    assert_eq!(chain.read(hb, 1).unwrap(), b"");
}

#[test]
fn concurrent_opens_get_distinct_handles() {
    let chain = Arc::new(IoChain::new());
    let dev = loopback("DEV");
    chain.register(dev.clone());

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let chain = Arc::clone(&chain);
            thread::spawn(move || (0..100).map(|_| chain.open("DEV").unwrap()).collect::<Vec<_>>())
        })
        .collect();

    let mut seen = HashSet::new();
    for t in threads {
        for h in t.join().unwrap() {
            assert!(seen.insert(h), "handle {h:?} issued twice");
        }
    }
    assert_eq!(seen.len(), 800);
    assert_eq!(dev.handles.lock().unwrap().len(), 800);
}

#[test]
fn registration_during_dispatch_does_not_deadlock() {
    let chain = Arc::new(IoChain::new());
    let inner = Arc::clone(&chain);
    chain.register(handler_fn(move |req, next| {
        if opens_path(req, &["INSTALL"]) {
            inner.register(loopback("LATE"));
            req.handle = Handle::alloc();
            return Ok(IoStatus::Complete);
        }
        next.invoke(req)
    }));

    assert_eq!(chain.open("LATE"), Err(IoError::NotSupported));
    chain.open("INSTALL").unwrap();
    assert!(chain.open("LATE").is_ok());
    assert_eq!(chain.len(), 2);
}
