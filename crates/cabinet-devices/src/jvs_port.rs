use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cabinet_async::AsyncEngine;
use cabinet_iohook::{IoError, IoHandler, IoOp, IoRequest, IoResult, IoStatus, Next};
use cabinet_jvs::JvsBus;

use crate::uart::Uart;

struct PortState {
    uart: Uart,
    bus: JvsBus,
}

impl PortState {
    fn service(&mut self, req: &mut IoRequest) -> IoResult {
        self.uart.service(req)?;
        if req.op == IoOp::Write && !self.uart.written().is_empty() {
            let bus = &mut self.bus;
            self.uart
                .drain_written(|written, readable| bus.transact(written, readable));
        }
        Ok(IoStatus::Complete)
    }
}

fn lock(state: &Mutex<PortState>) -> MutexGuard<'_, PortState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A virtual serial port with a JVS bus on the far end.
///
/// Each write is transacted on the bus as soon as it lands and the node responses become
/// readable. Overlapped reads go through the port's [`AsyncEngine`] when it has one.
pub struct JvsPort {
    state: Arc<Mutex<PortState>>,
    engine: Option<AsyncEngine>,
}

impl JvsPort {
    pub fn new(port: u8, bus: JvsBus, engine: Option<AsyncEngine>) -> Self {
        Self {
            state: Arc::new(Mutex::new(PortState {
                uart: Uart::new(port),
                bus,
            })),
            engine,
        }
    }

    pub fn name(&self) -> String {
        lock(&self.state).uart.name().to_string()
    }

    pub fn with_bus<R>(&self, f: impl FnOnce(&mut JvsBus) -> R) -> R {
        f(&mut lock(&self.state).bus)
    }

    pub fn with_uart<R>(&self, f: impl FnOnce(&mut Uart) -> R) -> R {
        f(&mut lock(&self.state).uart)
    }

    /// Stops the async worker, if any. Later overlapped reads fail.
    pub fn shutdown(&self) {
        if let Some(engine) = &self.engine {
            engine.shutdown();
        }
    }
}

impl IoHandler for JvsPort {
    fn handle(&self, req: &mut IoRequest, next: Next<'_>) -> IoResult {
        let mut state = lock(&self.state);
        if !state.uart.claims(req) {
            drop(state);
            return next.invoke(req);
        }

        match &self.engine {
            Some(engine) if req.op == IoOp::Read && req.completion.is_some() => {
                drop(state);
                let shared = Arc::clone(&self.state);
                engine.submit(req, move |req| {
                    let mut state = lock(&shared);
                    // The port may have been closed, and even reopened, while this read waited.
                    if !state.uart.claims(req) {
                        return Err(IoError::NotSupported);
                    }
                    state.service(req)
                })
            }
            _ => state.service(req),
        }
    }
}

impl std::fmt::Debug for JvsPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("JvsPort")
            .field("uart", &state.uart)
            .field("bus", &state.bus)
            .field("async", &self.engine.is_some())
            .finish()
    }
}
