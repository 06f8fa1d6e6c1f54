//! Progress reporting trait.
//!
//! Decouples the copy routine and worker from any specific UI technology.
//! Narrowed to the two events callers actually need: a `(copied_bytes,
//! percent)` sample on every chunk, and a checkpoint notification each time
//! a 10% boundary is crossed (the same instant the state store is asked to
//! persist). A CLI or future UI implements this trait; the engine never
//! assumes stdout exists.

use crate::job::Job;

/// Implement this to receive progress updates from a worker's copy loop.
/// All methods are called synchronously on the worker thread; keep them
/// fast, the same constraint the queue's event observers carry.
pub trait ProgressObserver: Send + Sync {
    /// Called after every chunk is written.
    fn on_progress(&self, job_name: &str, copied_bytes: u64, percent: f64);

    /// Called whenever `job.last_checkpoint` advances to a new 10%
    /// boundary, after the state store has already persisted it.
    fn on_checkpoint(&self, job: &Job);
}

/// No-op observer used when nothing wants progress updates.
pub struct NullProgressObserver;

impl ProgressObserver for NullProgressObserver {
    fn on_progress(&self, _job_name: &str, _copied_bytes: u64, _percent: f64) {}
    fn on_checkpoint(&self, _job: &Job) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn null_observer_does_nothing() {
        let observer = NullProgressObserver;
        observer.on_progress("a.mp4", 100, 50.0);
        let job = Job::new_waiting("a.mp4".into(), PathBuf::from("/src/a.mp4"), 1000, 3);
        observer.on_checkpoint(&job);
    }
}
