//! The FIFO job queue (component B).
//!
//! Grounded in `original_source/src/core/queue_manager.py`'s
//! `QueueManager`: a FIFO of waiting names plus dictionaries for the
//! active/completed/failed sets, all mutated under one lock so external
//! readers (the history dashboard, a future UI) see consistent snapshots.
//! Event callbacks fire synchronously under the lock; observers must
//! keep them short.

use crate::job::{Job, JobStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Queue lifecycle events, fired synchronously under the queue's lock.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Added(String),
    Started(String),
    Completed(String),
    Failed(String),
    Retrying(String),
}

pub type QueueObserver = Box<dyn Fn(&QueueEvent) + Send + Sync>;

#[derive(Default)]
struct Inner {
    waiting: VecDeque<String>,
    jobs: HashMap<String, Job>,
    active: Vec<String>,
    completed: Vec<String>,
    failed: Vec<String>,
}

impl Inner {
    fn recompute_positions(&mut self) {
        for (idx, name) in self.waiting.iter().enumerate() {
            if let Some(job) = self.jobs.get_mut(name) {
                job.queue_position = idx + 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Thread-safe FIFO of jobs plus secondary indices by name/state.
pub struct Queue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    observers: Mutex<Vec<QueueObserver>>,
}

impl Queue {
    pub fn new() -> Arc<Queue> {
        Arc::new(Queue {
            inner: Mutex::new(Inner::default()),
            not_empty: Condvar::new(),
            observers: Mutex::new(Vec::new()),
        })
    }

    pub fn subscribe(&self, observer: QueueObserver) {
        self.observers.lock().unwrap().push(observer);
    }

    fn notify(&self, event: QueueEvent) {
        for observer in self.observers.lock().unwrap().iter() {
            observer(&event);
        }
    }

    /// Enqueue at the tail. Sets `status = waiting`. Returns the 1-based
    /// queue position.
    pub fn add(&self, mut job: Job) -> usize {
        let name = job.name.clone();
        job.status = JobStatus::Waiting;
        let position = {
            let mut inner = self.inner.lock().unwrap();
            inner.waiting.push_back(name.clone());
            inner.jobs.insert(name.clone(), job);
            inner.recompute_positions();
            self.not_empty.notify_one();
            inner.jobs.get(&name).map(|j| j.queue_position).unwrap_or(0)
        };
        self.notify(QueueEvent::Added(name));
        position
    }

    /// Dequeue the head, transition to `downloading`. Returns `None` after
    /// a bounded wait (~1s) so the worker loop can check its stop flag.
    pub fn next(&self) -> Option<Job> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(name) = inner.waiting.pop_front() {
                inner.recompute_positions();
                if let Some(job) = inner.jobs.get_mut(&name) {
                    job.status = JobStatus::Downloading;
                    job.queue_position = 0;
                    let snapshot = job.clone();
                    inner.active.push(name.clone());
                    drop(inner);
                    self.notify(QueueEvent::Started(name));
                    return Some(snapshot);
                }
                continue;
            }

            let (new_inner, timeout) = self
                .not_empty
                .wait_timeout(inner, Duration::from_secs(1))
                .unwrap();
            inner = new_inner;
            if timeout.timed_out() && inner.waiting.is_empty() {
                return None;
            }
        }
    }

    /// Move a job to the completed or failed set; remove from active.
    pub fn complete(&self, job: &Job, success: bool) {
        let name = job.name.clone();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.active.retain(|n| n != &name);
            inner.jobs.insert(name.clone(), job.clone());
            if success {
                inner.completed.push(name.clone());
            } else {
                inner.failed.push(name.clone());
            }
            inner.recompute_positions();
        }
        self.notify(if success {
            QueueEvent::Completed(name)
        } else {
            QueueEvent::Failed(name)
        });
    }

    /// Record a failure. If `retry` and `retry_count < max_retry`,
    /// re-enqueue at the tail with `status = waiting`; otherwise mark
    /// permanently failed. The retry counter is the single source of
    /// truth for retry eligibility.
    pub fn fail(&self, mut job: Job, err: &str, retry: bool) {
        job.retry_count += 1;
        job.last_error = Some(err.to_string());
        let name = job.name.clone();
        let will_retry = retry && job.retry_count < job.max_retry;

        {
            let mut inner = self.inner.lock().unwrap();
            inner.active.retain(|n| n != &name);
            if will_retry {
                // copied_bytes/last_checkpoint carry over unchanged so a
                // retried attempt resumes rather than restarting.
                job.status = JobStatus::Waiting;
                inner.jobs.insert(name.clone(), job);
                inner.waiting.push_back(name.clone());
                inner.recompute_positions();
                self.not_empty.notify_one();
            } else {
                job.status = JobStatus::Failed;
                inner.jobs.insert(name.clone(), job);
                inner.failed.push(name.clone());
            }
        }

        self.notify(if will_retry {
            QueueEvent::Retrying(name)
        } else {
            QueueEvent::Failed(name)
        });
    }

    pub fn get(&self, name: &str) -> Option<Job> {
        self.inner.lock().unwrap().jobs.get(name).cloned()
    }

    pub fn all(&self) -> Vec<Job> {
        self.inner.lock().unwrap().jobs.values().cloned().collect()
    }

    pub fn waiting(&self) -> Vec<Job> {
        let inner = self.inner.lock().unwrap();
        inner
            .waiting
            .iter()
            .filter_map(|name| inner.jobs.get(name).cloned())
            .collect()
    }

    pub fn active(&self) -> Vec<Job> {
        let inner = self.inner.lock().unwrap();
        inner
            .active
            .iter()
            .filter_map(|name| inner.jobs.get(name).cloned())
            .collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.inner.lock().unwrap().jobs.get(name).map(|j| j.queue_position)
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().unwrap();
        QueueStats {
            waiting: inner.waiting.len(),
            active: inner.active.len(),
            completed: inner.completed.len(),
            failed: inner.failed.len(),
        }
    }

    /// Drop terminal entries to bound memory.
    pub fn clear_completed(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let mut removed = 0;
        for name in inner.completed.drain(..).collect::<Vec<_>>() {
            inner.jobs.remove(&name);
            removed += 1;
        }
        for name in inner.failed.drain(..).collect::<Vec<_>>() {
            inner.jobs.remove(&name);
            removed += 1;
        }
        removed
    }

    /// Update the owning worker's in-progress job snapshot (checkpoints,
    /// progress) without changing its bucket membership.
    pub fn update(&self, job: &Job) {
        let mut inner = self.inner.lock().unwrap();
        inner.jobs.insert(job.name.clone(), job.clone());
    }
}
