//! The worker pool (component G): a resizable set of worker threads all
//! pulling from the same `Queue`.
//!
//! Grounded in `original_source/src/core/download_manager.py`'s
//! `DownloadManager`, which owns the thread lifecycle and exposes
//! `set_max_parallel` for a live-reconfigurable worker count. Resize is
//! asymmetric: growing spawns new workers immediately; shrinking never
//! preempts an in-flight transfer, it only lets the surplus workers exit
//! after their current job (or idle wait) completes.

use crate::config::Config;
use crate::history::HistorySink;
use crate::progress::{NullProgressObserver, ProgressObserver};
use crate::queue::{Queue, QueueStats};
use crate::state_store::StateStore;
use crate::worker;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

pub const MIN_PARALLEL: u8 = 1;
pub const MAX_PARALLEL: u8 = 10;

struct WorkerHandle {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Owns the worker thread pool plus the shared queue/state/history handles
/// every worker needs.
pub struct Pool {
    queue: Arc<Queue>,
    state_store: Arc<StateStore>,
    history: Arc<HistorySink>,
    config: Arc<Mutex<Config>>,
    progress: Arc<dyn ProgressObserver>,
    workers: Mutex<Vec<WorkerHandle>>,
    target: AtomicUsize,
}

impl Pool {
    pub fn new(
        queue: Arc<Queue>,
        state_store: Arc<StateStore>,
        history: Arc<HistorySink>,
        config: Arc<Mutex<Config>>,
    ) -> Pool {
        Pool::with_progress(queue, state_store, history, config, Arc::new(NullProgressObserver))
    }

    pub fn with_progress(
        queue: Arc<Queue>,
        state_store: Arc<StateStore>,
        history: Arc<HistorySink>,
        config: Arc<Mutex<Config>>,
        progress: Arc<dyn ProgressObserver>,
    ) -> Pool {
        Pool {
            queue,
            state_store,
            history,
            config,
            progress,
            workers: Mutex::new(Vec::new()),
            target: AtomicUsize::new(0),
        }
    }

    /// Spawn `max_parallel` (clamped to `[MIN_PARALLEL, MAX_PARALLEL]`)
    /// worker threads.
    pub fn start(&self, max_parallel: u8) {
        let target = clamp(max_parallel) as usize;
        self.target.store(target, Ordering::SeqCst);
        let mut workers = self.workers.lock().unwrap();
        while workers.len() < target {
            workers.push(self.spawn_worker());
        }
    }

    fn spawn_worker(&self) -> WorkerHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let queue = self.queue.clone();
        let state_store = self.state_store.clone();
        let history = self.history.clone();
        let config = Arc::new(self.config.lock().unwrap().clone());
        let progress = self.progress.clone();
        let stop_clone = stop.clone();
        let join = std::thread::spawn(move || {
            worker::run(queue, state_store, history, config, progress, stop_clone);
        });
        WorkerHandle { stop, join }
    }

    /// Adjust the live worker count. Growing spawns new threads right
    /// away. Shrinking only signals the surplus workers to stop after
    /// their current `queue.next()`/job finishes; it never interrupts an
    /// in-flight transfer.
    pub fn set_max_parallel(&self, max_parallel: u8) {
        let target = clamp(max_parallel) as usize;
        self.target.store(target, Ordering::SeqCst);
        let mut workers = self.workers.lock().unwrap();

        while workers.len() < target {
            workers.push(self.spawn_worker());
        }
        while workers.len() > target {
            if let Some(handle) = workers.pop() {
                handle.stop.store(true, Ordering::SeqCst);
                // Don't block the resize call on a possibly long-running
                // transfer; reap it lazily on the next stop()/resize.
                drop(handle.join);
            }
        }
    }

    pub fn current_parallel(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    /// Signal every worker to stop, then join them with a bounded wait
    /// (workers poll the stop flag roughly once per second via
    /// `Queue::next`'s internal timeout, so this should return promptly
    /// once any in-flight transfer finishes).
    pub fn stop(&self) {
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.iter() {
            handle.stop.store(true, Ordering::SeqCst);
        }
        for handle in workers.drain(..) {
            let _ = handle.join.join();
        }
        self.target.store(0, Ordering::SeqCst);

        if let Err(e) = self.state_store.save(&self.queue.all()) {
            tracing::error!(error = %e, "failed to persist final state on shutdown");
        }
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn active_downloads(&self) -> Vec<crate::job::Job> {
        self.queue.active()
    }
}

fn clamp(max_parallel: u8) -> u8 {
    max_parallel.clamp(MIN_PARALLEL, MAX_PARALLEL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration as StdDuration;

    fn test_pool(dir: &std::path::Path) -> Pool {
        let queue = Queue::new();
        let state_store = Arc::new(StateStore::new(dir.join("state.json")));
        let history = Arc::new(HistorySink::new(dir.join("history.txt")).unwrap());
        let config = Arc::new(Mutex::new(Config::default()));
        Pool::new(queue, state_store, history, config)
    }

    #[test]
    fn start_spawns_clamped_worker_count() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(dir.path());
        pool.start(0);
        assert_eq!(pool.current_parallel(), MIN_PARALLEL as usize);
        pool.stop();
    }

    #[test]
    fn start_clamps_to_max_parallel() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(dir.path());
        pool.start(50);
        assert_eq!(pool.current_parallel(), MAX_PARALLEL as usize);
        pool.stop();
    }

    #[test]
    fn set_max_parallel_grows_and_shrinks() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(dir.path());
        pool.start(2);
        assert_eq!(pool.current_parallel(), 2);

        pool.set_max_parallel(4);
        assert_eq!(pool.current_parallel(), 4);

        pool.set_max_parallel(1);
        assert_eq!(pool.current_parallel(), 1);
        pool.stop();
    }

    #[test]
    fn stop_persists_state_and_empties_workers() {
        let dir = tempfile::tempdir().unwrap();
        let pool = test_pool(dir.path());
        pool.start(2);
        pool.stop();
        assert_eq!(pool.current_parallel(), 0);
        std::thread::sleep(StdDuration::from_millis(10));
        assert!(dir.path().join("state.json").exists());
    }
}
