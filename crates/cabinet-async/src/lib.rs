#![forbid(unsafe_code)]

//! Single-worker completion engine.
//!
//! Lets a device whose backend can only answer synchronously honor an overlapped request:
//! [`AsyncEngine::submit`] hands the work to a dedicated thread, marks the request's
//! completion token pending, and returns [`IoStatus::Pending`]. At most one task is outstanding
//! per engine, counting the one currently running.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cabinet_iohook::{Completion, IoError, IoRequest, IoResult, IoStatus, Transfer};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsyncConfig {
    /// Worker thread name.
    pub name: Option<String>,
    /// Sleep before each task runs, emulating the cadence of a polled backend.
    pub poll_delay: Duration,
}

type Task = Box<dyn FnOnce(&mut IoRequest) -> IoResult + Send>;

struct Job {
    task: Task,
    req: IoRequest,
    completion: Arc<Completion>,
}

#[derive(Default)]
struct Slot {
    job: Option<Job>,
    /// Set from submission until the job's completion is published.
    busy: bool,
    stop: bool,
}

struct Shared {
    slot: Mutex<Slot>,
    task_ready: Condvar,
    slot_free: Condvar,
    poll_delay: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct AsyncEngine {
    shared: Arc<Shared>,
    name: String,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncEngine {
    pub fn new(config: AsyncConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::default()),
                task_ready: Condvar::new(),
                slot_free: Condvar::new(),
                poll_delay: config.poll_delay,
            }),
            name: config.name.unwrap_or_else(|| "cabinet-async".to_string()),
            worker: Mutex::new(None),
        }
    }

    /// Runs `task` against `req`.
    ///
    /// Without a completion token the task runs inline on the calling thread. Otherwise this
    /// blocks until any earlier task has completed, queues the task with a snapshot of `req`,
    /// and returns `Pending`; the token receives the outcome.
    pub fn submit<F>(&self, req: &mut IoRequest, task: F) -> IoResult
    where
        F: FnOnce(&mut IoRequest) -> IoResult + Send + 'static,
    {
        let Some(completion) = req.completion.clone() else {
            return task(req);
        };

        self.ensure_worker()?;

        let slot = self.shared.lock();
        let mut slot = self
            .shared
            .slot_free
            .wait_while(slot, |s| s.busy && !s.stop)
            .unwrap_or_else(PoisonError::into_inner);
        if slot.stop {
            return Err(IoError::WorkerUnavailable(format!("{} is shut down", self.name)));
        }

        slot.busy = true;
        completion.mark_pending();
        slot.job = Some(Job {
            task: Box::new(task),
            req: req.clone(),
            completion,
        });
        drop(slot);
        self.shared.task_ready.notify_one();
        Ok(IoStatus::Pending)
    }

    fn ensure_worker(&self) -> Result<(), IoError> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return Ok(());
        }
        if self.shared.lock().stop {
            return Err(IoError::WorkerUnavailable(format!("{} is shut down", self.name)));
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run_worker(&shared))
            .map_err(|err| IoError::WorkerUnavailable(err.to_string()))?;
        tracing::debug!(name = %self.name, "started async worker");
        *worker = Some(handle);
        Ok(())
    }

    /// Stops and joins the worker after it finishes any queued task.
    ///
    /// Callers must not submit concurrently with shutdown. Later submissions carrying a
    /// completion token fail with [`IoError::WorkerUnavailable`].
    pub fn shutdown(&self) {
        self.shared.lock().stop = true;
        self.shared.task_ready.notify_all();
        self.shared.slot_free.notify_all();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!(name = %self.name, "async worker panicked");
            }
        }
    }
}

impl Default for AsyncEngine {
    fn default() -> Self {
        Self::new(AsyncConfig::default())
    }
}

impl Drop for AsyncEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for AsyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.shared.lock();
        f.debug_struct("AsyncEngine")
            .field("name", &self.name)
            .field("busy", &slot.busy)
            .field("stop", &slot.stop)
            .finish()
    }
}

fn run_worker(shared: &Shared) {
    loop {
        let job = {
            let slot = shared.lock();
            let mut slot = shared
                .task_ready
                .wait_while(slot, |s| s.job.is_none() && !s.stop)
                .unwrap_or_else(PoisonError::into_inner);
            match slot.job.take() {
                Some(job) => job,
                None => return,
            }
        };

        if !shared.poll_delay.is_zero() {
            thread::sleep(shared.poll_delay);
        }

        let Job {
            task,
            mut req,
            completion,
        } = job;
        // A panicking task must still complete its token and free the slot.
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| task(&mut req))) {
            Ok(res) => res.map(|_| Transfer::from_request(&req)),
            Err(_) => {
                tracing::warn!(op = ?req.op, "async task panicked");
                Err(IoError::WorkerUnavailable("task panicked".to_string()))
            }
        };
        if let Err(err) = &outcome {
            tracing::debug!(op = ?req.op, %err, "async task failed");
        }
        completion.complete(outcome);

        shared.lock().busy = false;
        shared.slot_free.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    use cabinet_iohook::Handle;

    use super::*;

    fn overlapped_read(len: usize) -> (IoRequest, Arc<Completion>) {
        let completion = Arc::new(Completion::new());
        let req = IoRequest::read(Handle::alloc(), len).with_completion(Arc::clone(&completion));
        (req, completion)
    }

    #[test]
    fn no_token_runs_inline() {
        let engine = AsyncEngine::default();
        let caller = thread::current().id();
        let mut req = IoRequest::read(Handle::alloc(), 4);
        let status = engine
            .submit(&mut req, move |r| {
                assert_eq!(thread::current().id(), caller);
                r.read.write(b"hi")?;
                Ok(IoStatus::Complete)
            })
            .unwrap();
        assert_eq!(status, IoStatus::Complete);
        assert_eq!(req.read.filled(), b"hi");
    }

    #[test]
    fn token_receives_worker_result() {
        let engine = AsyncEngine::default();
        let (mut req, completion) = overlapped_read(4);
        let status = engine
            .submit(&mut req, |r| {
                r.read.write(&[1, 2, 3])?;
                Ok(IoStatus::Complete)
            })
            .unwrap();
        assert_eq!(status, IoStatus::Pending);

        let transfer = completion.wait().unwrap();
        assert_eq!(transfer.bytes_read, 3);
        assert_eq!(transfer.data, [1, 2, 3]);
        // The caller's copy is a snapshot source, not written by the worker.
        assert!(req.read.is_empty());
    }

    #[test]
    fn task_error_reaches_token() {
        let engine = AsyncEngine::default();
        let (mut req, completion) = overlapped_read(4);
        engine
            .submit(&mut req, |_| Err(IoError::InvalidParameter("nope")))
            .unwrap();
        assert_eq!(completion.wait(), Err(IoError::InvalidParameter("nope")));
    }

    #[test]
    fn second_submit_waits_for_first_completion() {
        let engine = Arc::new(AsyncEngine::default());
        let (release, gate) = mpsc::channel::<()>();

        let (mut first, first_done) = overlapped_read(1);
        engine
            .submit(&mut first, move |r| {
                gate.recv().ok();
                r.read.push(1)?;
                Ok(IoStatus::Complete)
            })
            .unwrap();

        let second_queued = Arc::new(AtomicBool::new(false));
        let (mut second, second_done) = overlapped_read(1);
        let submitter = {
            let engine = Arc::clone(&engine);
            let second_queued = Arc::clone(&second_queued);
            let first_done = Arc::clone(&first_done);
            thread::spawn(move || {
                engine
                    .submit(&mut second, |r| {
                        r.read.push(2)?;
                        Ok(IoStatus::Complete)
                    })
                    .unwrap();
                // Slot frees only after publication, so the first result is already visible.
                assert!(first_done.is_complete());
                second_queued.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!second_queued.load(Ordering::SeqCst));
        assert!(first_done.is_pending());

        release.send(()).unwrap();
        submitter.join().unwrap();
        assert!(second_queued.load(Ordering::SeqCst));
        assert_eq!(first_done.wait().unwrap().data, [1]);
        assert_eq!(second_done.wait().unwrap().data, [2]);
    }

    #[test]
    fn panicking_task_fails_its_token_and_frees_the_slot() {
        let engine = Arc::new(AsyncEngine::default());
        let (mut first, first_done) = overlapped_read(1);
        engine
            .submit(&mut first, |_| panic!("backend exploded"))
            .unwrap();
        assert_eq!(
            first_done.wait_timeout(Duration::from_secs(5)),
            Some(Err(IoError::WorkerUnavailable("task panicked".into())))
        );

        let (submitted, on_submit) = mpsc::channel();
        let (mut second, second_done) = overlapped_read(1);
        let submitter = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let status = engine.submit(&mut second, |r| {
                    r.read.push(7)?;
                    Ok(IoStatus::Complete)
                });
                submitted.send(status).ok();
            })
        };
        assert_eq!(
            on_submit.recv_timeout(Duration::from_secs(5)).unwrap(),
            Ok(IoStatus::Pending)
        );
        submitter.join().unwrap();
        assert_eq!(
            second_done
                .wait_timeout(Duration::from_secs(5))
                .unwrap()
                .unwrap()
                .data,
            [7]
        );
    }

    #[test]
    fn poll_delay_is_applied() {
        let engine = AsyncEngine::new(AsyncConfig {
            name: Some("delayed".into()),
            poll_delay: Duration::from_millis(20),
        });
        let (mut req, completion) = overlapped_read(1);
        let start = std::time::Instant::now();
        engine
            .submit(&mut req, |_| Ok(IoStatus::Complete))
            .unwrap();
        completion.wait().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let engine = AsyncEngine::default();
        let (mut req, _) = overlapped_read(1);
        engine.submit(&mut req, |_| Ok(IoStatus::Complete)).unwrap();
        engine.shutdown();

        let (mut req, _) = overlapped_read(1);
        let err = engine
            .submit(&mut req, |_| Ok(IoStatus::Complete))
            .unwrap_err();
        assert!(matches!(err, IoError::WorkerUnavailable(_)));
    }
}
