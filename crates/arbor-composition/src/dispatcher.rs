//! Dedicated coordination thread
//!
//! A named OS thread draining a crossbeam channel of jobs. `invoke` blocks on
//! a reply channel; `begin_invoke` returns immediately, and a failing job is
//! logged and kept in the dispatcher's failure log.

use arbor_core::{ArborError, CoordinationThread, DispatchJob, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

struct Envelope {
    job: DispatchJob,
    reply: Option<Sender<Result<()>>>,
}

fn run_job(job: DispatchJob) -> Result<()> {
    catch_unwind(AssertUnwindSafe(job))
        .unwrap_or_else(|_| Err(ArborError::dispatch("coordination job panicked")))
}

fn drain(receiver: Receiver<Envelope>, failures: Arc<Mutex<Vec<ArborError>>>) {
    for envelope in receiver.iter() {
        let result = run_job(envelope.job);
        match envelope.reply {
            Some(reply) => {
                // The caller may have given up waiting.
                let _ = reply.send(result);
            }
            None => {
                if let Err(err) = result {
                    tracing::error!(error = %err, "deferred coordination job failed");
                    failures.lock().push(err);
                }
            }
        }
    }
    tracing::debug!("coordination thread stopped");
}

/// Coordination thread backed by a dedicated OS thread
pub struct DedicatedDispatcher {
    name: String,
    thread_id: ThreadId,
    sender: Mutex<Option<Sender<Envelope>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    failures: Arc<Mutex<Vec<ArborError>>>,
}

impl DedicatedDispatcher {
    /// Spawn the thread; `capacity` bounds the job queue
    pub fn spawn(name: &str, capacity: Option<usize>) -> Result<Self> {
        let (sender, receiver) = match capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };
        let failures = Arc::new(Mutex::new(Vec::new()));
        let worker_failures = Arc::clone(&failures);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || drain(receiver, worker_failures))?;
        tracing::debug!(thread = name, ?capacity, "coordination thread started");

        Ok(Self {
            name: name.to_string(),
            thread_id: handle.thread().id(),
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            failures,
        })
    }

    /// Thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, envelope: Envelope) -> Result<()> {
        let Some(sender) = self.sender.lock().clone() else {
            return Err(ArborError::dispatch(format!(
                "coordination thread '{}' has shut down",
                self.name
            )));
        };
        if self.is_current_thread() {
            // Blocking on a full queue from the draining thread never returns.
            return sender.try_send(envelope).map_err(|err| match err {
                TrySendError::Full(_) => ArborError::dispatch("coordination queue is full"),
                TrySendError::Disconnected(_) => {
                    ArborError::dispatch("coordination thread has shut down")
                }
            });
        }
        sender
            .send(envelope)
            .map_err(|_| ArborError::dispatch("coordination thread has shut down"))
    }

    /// Failures of deferred jobs so far
    pub fn failures(&self) -> Vec<ArborError> {
        self.failures.lock().clone()
    }

    /// Drain the failure log
    pub fn take_failures(&self) -> Vec<ArborError> {
        std::mem::take(&mut *self.failures.lock())
    }

    /// Wait until every job queued before this call has run
    pub fn flush(&self) -> Result<()> {
        self.invoke(Box::new(|| Ok(())))
    }

    /// Stop accepting jobs, let queued jobs finish, and join the thread
    ///
    /// Called from the coordination thread itself, the thread is left to
    /// exit on its own.
    pub fn shutdown(&self) -> Result<()> {
        drop(self.sender.lock().take());
        if self.is_current_thread() {
            return Ok(());
        }
        match self.handle.lock().take() {
            Some(handle) => handle
                .join()
                .map_err(|_| ArborError::dispatch(format!("thread '{}' panicked", self.name))),
            None => Ok(()),
        }
    }
}

impl CoordinationThread for DedicatedDispatcher {
    fn is_current_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    fn invoke(&self, job: DispatchJob) -> Result<()> {
        if self.is_current_thread() {
            return run_job(job);
        }
        let (reply, response) = bounded(1);
        self.submit(Envelope {
            job,
            reply: Some(reply),
        })?;
        response
            .recv()
            .map_err(|_| ArborError::dispatch("coordination thread dropped the job"))?
    }

    fn begin_invoke(&self, job: DispatchJob) -> Result<()> {
        self.submit(Envelope { job, reply: None })
    }
}

impl Drop for DedicatedDispatcher {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(error = %err, "coordination thread shutdown failed");
        }
    }
}

impl std::fmt::Debug for DedicatedDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedicatedDispatcher")
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .field("failures", &self.failures.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_invoke_runs_on_named_thread() {
        let dispatcher = DedicatedDispatcher::spawn("test-coordination", None).unwrap();
        assert!(!dispatcher.is_current_thread());
        assert!(dispatcher.verify_current_thread().is_err());

        let name = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&name);
        dispatcher
            .invoke(Box::new(move || {
                *slot.lock() = std::thread::current().name().map(str::to_string);
                Ok(())
            }))
            .unwrap();
        assert_eq!(name.lock().as_deref(), Some("test-coordination"));
    }

    #[test]
    fn test_invoke_returns_job_failure() {
        let dispatcher = DedicatedDispatcher::spawn("test-coordination", None).unwrap();
        let result = dispatcher.invoke(Box::new(|| Err(ArborError::dispatch("nope"))));
        assert!(matches!(result, Err(ArborError::Dispatch { .. })));
        assert!(dispatcher.failures().is_empty());
    }

    #[test]
    fn test_begin_invoke_failure_lands_in_log() {
        let dispatcher = DedicatedDispatcher::spawn("test-coordination", Some(4)).unwrap();
        dispatcher
            .begin_invoke(Box::new(|| Err(ArborError::listener_failed("evt", "boom"))))
            .unwrap();
        dispatcher
            .begin_invoke(Box::new(|| panic!("job panicked")))
            .unwrap();
        dispatcher.flush().unwrap();
        let failures = dispatcher.take_failures();
        assert_eq!(failures.len(), 2);
        assert!(matches!(failures[0], ArborError::ListenerFailed { .. }));
        assert!(dispatcher.failures().is_empty());
    }

    #[test]
    fn test_nested_invoke_runs_inline() {
        let dispatcher = Arc::new(DedicatedDispatcher::spawn("test-coordination", None).unwrap());
        let inner = Arc::clone(&dispatcher);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        dispatcher
            .invoke(Box::new(move || {
                inner.verify_current_thread()?;
                inner.invoke(Box::new(move || {
                    flag.store(true, Ordering::SeqCst);
                    Ok(())
                }))
            }))
            .unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_shutdown_drains_queue_then_rejects() {
        let dispatcher = DedicatedDispatcher::spawn("test-coordination", None).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let count = Arc::clone(&count);
            dispatcher
                .begin_invoke(Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .unwrap();
        }
        dispatcher.shutdown().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 10);
        assert!(matches!(
            dispatcher.begin_invoke(Box::new(|| Ok(()))),
            Err(ArborError::Dispatch { .. })
        ));
    }
}
