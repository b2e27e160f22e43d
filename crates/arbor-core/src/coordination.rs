//! Coordination thread interface
//!
//! One thread is designated for thread-affine work. Other threads submit
//! jobs to it, either blocking until the job ran or fire-and-forget.

use crate::errors::{ArborError, Result};

/// Unit of work marshaled onto the coordination thread
pub type DispatchJob = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Access to the single coordination thread
pub trait CoordinationThread: Send + Sync {
    /// Whether the calling thread is the coordination thread
    fn is_current_thread(&self) -> bool;

    /// Run a job on the coordination thread and wait for its result
    ///
    /// Runs inline when already on the coordination thread.
    fn invoke(&self, job: DispatchJob) -> Result<()>;

    /// Queue a job without waiting
    ///
    /// A failing job surfaces on the coordination thread, not to the caller.
    fn begin_invoke(&self, job: DispatchJob) -> Result<()>;

    /// Fail unless called on the coordination thread
    fn verify_current_thread(&self) -> Result<()> {
        if self.is_current_thread() {
            Ok(())
        } else {
            Err(ArborError::thread_affinity(format!(
                "called from {:?}, expected the coordination thread",
                std::thread::current().name().unwrap_or("<unnamed>")
            )))
        }
    }
}
