//! Manually pumped coordination thread
//!
//! The thread that creates a [`ManualDispatcher`] is its coordination thread.
//! Jobs queued from other threads wait until that thread calls
//! [`ManualDispatcher::run_pending`], which lets tests observe exactly when
//! marshaled work runs.

use arbor_core::{ArborError, CoordinationThread, DispatchJob, Result};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::thread::ThreadId;

struct Queued {
    job: DispatchJob,
    reply: Option<Sender<Result<()>>>,
}

/// Coordination thread driven by the test itself
pub struct ManualDispatcher {
    thread_id: ThreadId,
    queue: Mutex<VecDeque<Queued>>,
    failures: Mutex<Vec<ArborError>>,
}

impl ManualDispatcher {
    /// Make the calling thread the coordination thread
    pub fn new() -> Self {
        Self {
            thread_id: std::thread::current().id(),
            queue: Mutex::new(VecDeque::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Number of queued jobs
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run queued jobs in order, including any they queue, and return how
    /// many ran
    pub fn run_pending(&self) -> Result<usize> {
        self.verify_current_thread()?;
        let mut ran = 0;
        loop {
            let next = self.queue.lock().pop_front();
            let Some(queued) = next else { break };
            let result = (queued.job)();
            ran += 1;
            match queued.reply {
                Some(reply) => {
                    let _ = reply.send(result);
                }
                None => {
                    if let Err(err) = result {
                        tracing::warn!(error = %err, "queued coordination job failed");
                        self.failures.lock().push(err);
                    }
                }
            }
        }
        Ok(ran)
    }

    /// Failures of fire-and-forget jobs so far
    pub fn failures(&self) -> Vec<ArborError> {
        self.failures.lock().clone()
    }

    /// Drain the failure log
    pub fn take_failures(&self) -> Vec<ArborError> {
        std::mem::take(&mut *self.failures.lock())
    }
}

impl Default for ManualDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinationThread for ManualDispatcher {
    fn is_current_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Blocks a foreign caller until the coordination thread pumps the queue
    fn invoke(&self, job: DispatchJob) -> Result<()> {
        if self.is_current_thread() {
            return job();
        }
        let (reply, response) = bounded(1);
        self.queue.lock().push_back(Queued {
            job,
            reply: Some(reply),
        });
        response
            .recv()
            .map_err(|_| ArborError::dispatch("manual dispatcher dropped a queued job"))?
    }

    fn begin_invoke(&self, job: DispatchJob) -> Result<()> {
        self.queue.lock().push_back(Queued { job, reply: None });
        Ok(())
    }
}

impl std::fmt::Debug for ManualDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualDispatcher")
            .field("pending", &self.pending())
            .field("failures", &self.failures.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_queued_jobs_wait_for_pump() {
        let dispatcher = ManualDispatcher::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        dispatcher
            .begin_invoke(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        dispatcher
            .begin_invoke(Box::new(|| Err(ArborError::dispatch("boom"))))
            .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.run_pending().unwrap(), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.take_failures().len(), 1);
        assert!(dispatcher.failures().is_empty());
    }

    #[test]
    fn test_foreign_invoke_blocks_until_pumped() {
        let dispatcher = Arc::new(ManualDispatcher::new());
        let remote = Arc::clone(&dispatcher);
        let caller = std::thread::spawn(move || {
            assert!(!remote.is_current_thread());
            assert!(remote.run_pending().is_err());
            remote.invoke(Box::new(|| Err(ArborError::dispatch("remote"))))
        });

        while dispatcher.pending() == 0 {
            std::thread::yield_now();
        }
        assert_eq!(dispatcher.run_pending().unwrap(), 1);
        let result = caller.join().unwrap();
        assert!(matches!(result, Err(ArborError::Dispatch { .. })));
        assert!(dispatcher.failures().is_empty());
    }
}
