use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::IoError;
use crate::request::IoRequest;

/// Result fields of a finished request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transfer {
    pub bytes_read: usize,
    pub bytes_written: usize,
    /// The filled part of the request's read buffer.
    pub data: Vec<u8>,
}

impl Transfer {
    pub fn from_request(req: &IoRequest) -> Self {
        Self {
            bytes_read: req.read.pos(),
            bytes_written: req.write.pos(),
            data: req.read.filled().to_vec(),
        }
    }
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Pending,
    Done(Result<Transfer, IoError>),
}

/// Completion token attached to an overlapped request.
///
/// The finishing side publishes every result field and the final status in one critical
/// section, so a waiter that observes completion also observes the data it describes.
#[derive(Debug, Default)]
pub struct Completion {
    state: Mutex<State>,
    done: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark_pending(&self) {
        *self.lock() = State::Pending;
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.lock(), State::Pending)
    }

    pub fn is_complete(&self) -> bool {
        matches!(*self.lock(), State::Done(_))
    }

    /// Publishes the outcome and wakes every waiter.
    pub fn complete(&self, result: Result<Transfer, IoError>) {
        *self.lock() = State::Done(result);
        self.done.notify_all();
    }

    /// Takes the outcome if the request has finished, resetting the token for reuse.
    pub fn try_take(&self) -> Option<Result<Transfer, IoError>> {
        let mut state = self.lock();
        match std::mem::take(&mut *state) {
            State::Done(result) => Some(result),
            other => {
                *state = other;
                None
            }
        }
    }

    /// Blocks until the request finishes, then takes its outcome.
    pub fn wait(&self) -> Result<Transfer, IoError> {
        let mut state = self.lock();
        loop {
            if let State::Done(result) = std::mem::take(&mut *state) {
                return result;
            }
            // Put back whatever we took (Idle or Pending) before sleeping.
            *state = State::Pending;
            state = self
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`Self::wait`], but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Transfer, IoError>> {
        let state = self.lock();
        let (mut state, _) = self
            .done
            .wait_timeout_while(state, timeout, |s| !matches!(s, State::Done(_)))
            .unwrap_or_else(PoisonError::into_inner);
        match std::mem::take(&mut *state) {
            State::Done(result) => Some(result),
            other => {
                *state = other;
                None
            }
        }
    }
}
