//! A worker (component F): one thread that repeatedly dequeues a job from
//! the `Queue`, runs it through the copy routine, and reports the outcome
//! to the queue, the state store, and the history sink.
//!
//! Grounded in `original_source/src/core/download_worker.py`'s
//! `DownloadWorker._process_job`: the same defensive pre-flight order
//! (empty source path, missing source, empty/missing destination
//! configuration, unwritable destination directory), the same
//! source-deletion-after-success step, and the same delegation of retry
//! policy to the queue rather than deciding it locally.

use crate::config::Config;
use crate::copy;
use crate::error::WorkerError;
use crate::history::HistorySink;
use crate::job::{Job, JobStatus};
use crate::progress::ProgressObserver;
use crate::queue::Queue;
use crate::state_store::StateStore;
use chrono::Utc;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DELETE_BACKOFF_SECS: [u64; 3] = [1, 2, 4];

/// One worker's run loop. Blocks on `queue.next()` until `stop` is set,
/// then returns once its current job (if any) finishes.
pub fn run(
    queue: Arc<Queue>,
    state_store: Arc<StateStore>,
    history: Arc<HistorySink>,
    config: Arc<Config>,
    progress: Arc<dyn ProgressObserver>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        let job = match queue.next() {
            Some(job) => job,
            None => continue,
        };
        process_job(&queue, &state_store, &history, &config, progress.as_ref(), job);
    }
}

fn process_job(
    queue: &Queue,
    state_store: &StateStore,
    history: &HistorySink,
    config: &Config,
    progress: &dyn ProgressObserver,
    mut job: Job,
) {
    job.start_time = Some(Utc::now());

    if let Err(e) = preflight(&mut job, config) {
        finish_failed(queue, state_store, history, job, &e.to_string(), e.is_retryable());
        return;
    }

    if let Err(e) = state_store.update_job(&job) {
        tracing::error!(job = %job.name, error = %e, "failed to persist job before transfer start");
    }

    let dest_dir = job
        .dest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.destination_folder.clone());

    let job_name = job.name.clone();
    let result = copy::copy(
        &mut job,
        &dest_dir,
        crate::config::DEFAULT_CHUNK_SIZE,
        |copied, percent| {
            progress.on_progress(&job_name, copied, percent);
        },
        |j| {
            if let Err(e) = state_store.update_job(j) {
                tracing::error!(job = %j.name, error = %e, "failed to persist checkpoint");
            }
            queue.update(j);
            progress.on_checkpoint(j);
        },
    );

    match result {
        Ok(()) => finish_succeeded(queue, state_store, history, job),
        Err(e) => {
            let retryable = e.is_backoff_eligible()
                || matches!(
                    e,
                    crate::error::CopyError::SourceNotFound { .. } | crate::error::CopyError::SizeMismatch { .. }
                );
            finish_failed(queue, state_store, history, job, &e.to_string(), retryable);
        }
    }
}

fn preflight(job: &mut Job, config: &Config) -> Result<(), WorkerError> {
    if job.source_path.as_os_str().is_empty() {
        return Err(WorkerError::EmptySourcePath);
    }
    if !job.source_path.exists() {
        return Err(WorkerError::Copy(crate::error::CopyError::SourceNotFound {
            path: job.source_path.clone(),
        }));
    }

    if job.dest_path.as_os_str().is_empty() {
        if config.destination_folder.as_os_str().is_empty() {
            return Err(WorkerError::DestinationNotConfigured);
        }
        job.dest_path = copy::unique_dest_path(&config.destination_folder, &job.name);
    }

    let dest_dir = job
        .dest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.destination_folder.clone());

    if !dest_dir.exists() {
        fs::create_dir_all(&dest_dir).map_err(|e| WorkerError::CannotCreateDestDir {
            path: dest_dir.clone(),
            source: e,
        })?;
    }

    if fs::metadata(&dest_dir).map(|m| m.permissions().readonly()).unwrap_or(false) {
        return Err(WorkerError::DestDirNotWritable { path: dest_dir });
    }

    Ok(())
}

fn finish_succeeded(queue: &Queue, state_store: &StateStore, history: &HistorySink, mut job: Job) {
    job.status = JobStatus::Completed;
    job.end_time = Some(Utc::now());
    job.last_checkpoint = 100;

    let duration = job
        .start_time
        .and_then(|start| job.end_time.map(|end| (end - start).num_milliseconds() as f64 / 1000.0))
        .unwrap_or(0.0);

    if let Err(e) = history.log_success(&job.name, job.size_bytes, duration, job.retry_count) {
        tracing::error!(job = %job.name, error = %e, "failed to write history row");
    }

    delete_source_with_backoff(&job.source_path);

    if let Err(e) = state_store.update_job(&job) {
        tracing::error!(job = %job.name, error = %e, "failed to persist completed job");
    }

    queue.complete(&job, true);
}

fn finish_failed(queue: &Queue, state_store: &StateStore, history: &HistorySink, job: Job, err: &str, retry: bool) {
    if let Err(e) = history.log_failed(&job.name, job.size_bytes, err, job.retry_count) {
        tracing::error!(job = %job.name, error = %e, "failed to write history row");
    }
    tracing::warn!(job = %job.name, error = err, retry, "job failed");

    queue.fail(job.clone(), err, retry);

    if let Some(updated) = queue.get(&job.name) {
        if let Err(e) = state_store.update_job(&updated) {
            tracing::error!(job = %updated.name, error = %e, "failed to persist failed job");
        }
    }
}

fn delete_source_with_backoff(path: &Path) {
    for (attempt, wait) in DELETE_BACKOFF_SECS.iter().enumerate() {
        match fs::remove_file(path) {
            Ok(()) => return,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(path = %path.display(), attempt, error = %e, "failed to delete source, retrying");
                std::thread::sleep(Duration::from_secs(*wait));
            }
        }
    }
    tracing::error!(path = %path.display(), "giving up deleting source after retries");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::PathBuf;

    fn make_config(dest: PathBuf) -> Config {
        let mut c = Config::default();
        c.destination_folder = dest;
        c
    }

    #[test]
    fn preflight_rejects_empty_source_path() {
        let mut job = Job::new_waiting("a.mp4".into(), PathBuf::new(), 100, 3);
        let cfg = make_config(PathBuf::from("/dest"));
        let result = preflight(&mut job, &cfg);
        assert!(matches!(result, Err(WorkerError::EmptySourcePath)));
    }

    #[test]
    fn preflight_rejects_missing_destination_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.mp4");
        fs::write(&src, b"data").unwrap();
        let mut job = Job::new_waiting("a.mp4".into(), src, 4, 3);
        let cfg = make_config(PathBuf::new());
        let result = preflight(&mut job, &cfg);
        assert!(matches!(result, Err(WorkerError::DestinationNotConfigured)));
    }

    #[test]
    fn preflight_creates_missing_destination_directory() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.mp4");
        fs::write(&src, b"data").unwrap();
        let dest_dir = dir.path().join("out");
        let mut job = Job::new_waiting("a.mp4".into(), src, 4, 3);
        let cfg = make_config(dest_dir.clone());
        preflight(&mut job, &cfg).expect("preflight ok");
        assert!(dest_dir.exists());
        assert_eq!(job.dest_path, dest_dir.join("a.mp4"));
    }

    #[test]
    fn preflight_detects_missing_source_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("missing.mp4");
        let mut job = Job::new_waiting("missing.mp4".into(), src, 4, 3);
        let cfg = make_config(dir.path().join("out"));
        let result = preflight(&mut job, &cfg);
        assert!(matches!(
            result,
            Err(WorkerError::Copy(crate::error::CopyError::SourceNotFound { .. }))
        ));
    }

    #[test]
    fn size_mismatch_after_copy_is_treated_as_retryable() {
        let err = crate::error::CopyError::SizeMismatch { expected: 100, actual: 50 };
        let retryable = err.is_backoff_eligible()
            || matches!(
                err,
                crate::error::CopyError::SourceNotFound { .. } | crate::error::CopyError::SizeMismatch { .. }
            );
        assert!(retryable);
    }
}
