//! The watch-folder detector (component H): polls each source folder,
//! tracks candidate files until their size stops changing, then enqueues
//! a job.
//!
//! Grounded directly in `original_source/src/core/file_monitor.py`'s
//! `FileMonitor`: a per-folder "seen" set to distinguish genuinely new
//! files from already-known ones, and a separate "stabilizing" table
//! keyed by full path (`first_seen`, `last_size`) that is checked on
//! every poll tick. A file is promoted to a job once its size is
//! unchanged for at least `STABLE_WINDOW_SECS`. The initial scan on
//! `start()` seeds the seen set without emitting jobs, so files already
//! present when the daemon starts are not treated as newly arrived
//! (they are instead recovered from the state store's resumable set).

use crate::config::Config;
use crate::job::Job;
use crate::queue::Queue;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Candidate {
    first_seen: Instant,
    last_size: u64,
    folder: PathBuf,
    filename: String,
}

/// Polls configured source folders and feeds newly-stable files into the
/// queue. Source folders and extensions can be updated live.
pub struct Detector {
    queue: Arc<Queue>,
    config: Arc<RwLock<Config>>,
    seen: Mutex<HashMap<PathBuf, HashSet<String>>>,
    candidates: Mutex<HashMap<PathBuf, Candidate>>,
    stop: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Default)]
pub struct DetectorStats {
    pub folders_monitored: usize,
    pub files_seen: usize,
    pub files_stabilizing: usize,
}

impl Detector {
    pub fn new(queue: Arc<Queue>, config: Arc<RwLock<Config>>) -> Detector {
        Detector {
            queue,
            config,
            seen: Mutex::new(HashMap::new()),
            candidates: Mutex::new(HashMap::new()),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Seed the seen set from an initial scan (no jobs emitted), then run
    /// the polling loop until `stop()` is called. Intended to be spawned
    /// on its own thread.
    pub fn run(&self) {
        {
            let cfg = self.config.read().unwrap();
            for folder in &cfg.source_folders {
                let files = self.list_matching(folder, &cfg.extensions);
                self.seen.lock().unwrap().insert(folder.clone(), files);
            }
        }
        tracing::info!("detector started");

        let poll_interval = Duration::from_secs(crate::config::POLL_INTERVAL_SECS.max(1));
        while !self.stop.load(Ordering::Relaxed) {
            self.tick();
            sleep_interruptible(poll_interval, &self.stop);
        }
        tracing::info!("detector stopped");
    }

    /// Files under `folder` whose name matches one of `extensions`,
    /// ignoring subdirectories. Used for the initial seed scan, which
    /// must populate the seen set without creating stabilization
    /// candidates (files already present at startup are not "new").
    fn list_matching(&self, folder: &PathBuf, extensions: &[String]) -> HashSet<String> {
        let entries = match fs::read_dir(folder) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(folder = %folder.display(), error = %e, "cannot scan source folder");
                return HashSet::new();
            }
        };
        entries
            .flatten()
            .filter(|entry| !entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| matches_extension(name, extensions))
            .collect()
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// A clone of the detector's live configuration, for callers (such as
    /// a config-reload loop) that need to diff against a newly-loaded one.
    pub fn current_config(&self) -> Config {
        self.config.read().unwrap().clone()
    }

    /// Add a source folder at runtime. Grounded in `file_monitor.py`'s
    /// `add_source_folder`. Seeds the new folder's seen set from an
    /// initial scan so files already present in it are not treated as
    /// newly arrived, the same no-emit behavior as `run()`'s startup scan.
    pub fn add_source_folder(&self, folder: PathBuf) {
        {
            let mut cfg = self.config.write().unwrap();
            if !cfg.source_folders.contains(&folder) {
                cfg.source_folders.push(folder.clone());
            }
        }
        let extensions = self.config.read().unwrap().extensions.clone();
        let files = self.list_matching(&folder, &extensions);
        self.seen.lock().unwrap().insert(folder.clone(), files);
        tracing::info!(folder = %folder.display(), "source folder added");
    }

    /// Remove a source folder at runtime. Grounded in `file_monitor.py`'s
    /// `remove_source_folder`: clears the folder's seen set and drops any
    /// of its files that were still stabilizing.
    pub fn remove_source_folder(&self, folder: &Path) {
        {
            let mut cfg = self.config.write().unwrap();
            cfg.source_folders.retain(|f| f != folder);
        }
        self.seen.lock().unwrap().remove(folder);
        self.candidates.lock().unwrap().retain(|path, _| path.parent() != Some(folder));
        tracing::info!(folder = %folder.display(), "source folder removed");
    }

    /// Replace the matched extension list at runtime. Grounded in
    /// `file_monitor.py`'s `update_extensions`. Takes effect on the next
    /// poll tick; already-stabilizing candidates are unaffected.
    pub fn update_extensions(&self, extensions: Vec<String>) {
        self.config.write().unwrap().extensions = extensions.clone();
        tracing::info!(count = extensions.len(), "extensions updated");
    }

    /// Run one scan-all-folders-then-check-stability pass. Exposed
    /// separately from `run()` so tests and a manual "force scan" action
    /// can drive it without the sleep loop.
    pub fn tick(&self) {
        let (folders, extensions, stable_window, max_retry) = {
            let cfg = self.config.read().unwrap();
            (
                cfg.source_folders.clone(),
                cfg.extensions.clone(),
                crate::config::STABLE_WINDOW_SECS,
                cfg.max_retry as u32,
            )
        };

        for folder in &folders {
            self.scan_folder(folder, &extensions);
        }
        self.check_stable_files(stable_window, max_retry);
    }

    fn scan_folder(&self, folder: &PathBuf, extensions: &[String]) {
        let entries = match fs::read_dir(folder) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(folder = %folder.display(), error = %e, "cannot scan source folder");
                return;
            }
        };

        let mut current = HashSet::new();
        let mut seen_guard = self.seen.lock().unwrap();
        let previously_seen = seen_guard.entry(folder.clone()).or_insert_with(HashSet::new).clone();

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let filename = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            if !matches_extension(&filename, extensions) {
                continue;
            }

            current.insert(filename.clone());

            if !previously_seen.contains(&filename) {
                match fs::metadata(&path) {
                    Ok(meta) => {
                        tracing::info!(file = %filename, size = meta.len(), folder = %folder.display(), "new file detected");
                        self.candidates.lock().unwrap().insert(
                            path.clone(),
                            Candidate {
                                first_seen: Instant::now(),
                                last_size: meta.len(),
                                folder: folder.clone(),
                                filename,
                            },
                        );
                    }
                    Err(e) => {
                        tracing::error!(file = %filename, error = %e, "error reading size for new file");
                    }
                }
            }
        }

        seen_guard.insert(folder.clone(), current);
    }

    fn check_stable_files(&self, stable_window_secs: u64, max_retry: u32) {
        let mut to_remove = Vec::new();
        let mut candidates = self.candidates.lock().unwrap();

        for (path, candidate) in candidates.iter_mut() {
            if !path.exists() {
                to_remove.push(path.clone());
                continue;
            }

            let current_size = match fs::metadata(path) {
                Ok(meta) => meta.len(),
                Err(_) => {
                    to_remove.push(path.clone());
                    continue;
                }
            };
            let elapsed = candidate.first_seen.elapsed();

            if current_size == candidate.last_size && elapsed >= Duration::from_secs(stable_window_secs) {
                tracing::info!(file = %candidate.filename, size = current_size, elapsed = elapsed.as_secs_f64(), "file stable, enqueuing");
                let job = Job::new_waiting(candidate.filename.clone(), path.clone(), current_size, max_retry);
                self.queue.add(job);
                to_remove.push(path.clone());
            } else if current_size != candidate.last_size {
                candidate.last_size = current_size;
            }
        }

        for path in to_remove {
            candidates.remove(&path);
        }
    }

    pub fn stats(&self) -> DetectorStats {
        let seen = self.seen.lock().unwrap();
        DetectorStats {
            folders_monitored: seen.len(),
            files_seen: seen.values().map(|s| s.len()).sum(),
            files_stabilizing: self.candidates.lock().unwrap().len(),
        }
    }
}

fn matches_extension(filename: &str, extensions: &[String]) -> bool {
    let lower = filename.to_lowercase();
    extensions.iter().any(|ext| lower.ends_with(&ext.to_lowercase()))
}

fn sleep_interruptible(duration: Duration, stop: &AtomicBool) {
    let step = Duration::from_millis(200);
    let mut waited = Duration::ZERO;
    while waited < duration {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let remaining = duration - waited;
        std::thread::sleep(step.min(remaining));
        waited += step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector_with_folder(folder: PathBuf, extensions: Vec<String>) -> (Detector, Arc<Queue>) {
        let queue = Queue::new();
        let mut cfg = Config::default();
        cfg.source_folders = vec![folder];
        cfg.extensions = extensions;
        let config = Arc::new(RwLock::new(cfg));
        (Detector::new(queue.clone(), config), queue)
    }

    #[test]
    fn initial_scan_does_not_emit_jobs_for_pre_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.mp4"), vec![1u8; 100]).unwrap();

        let (detector, queue) = detector_with_folder(dir.path().to_path_buf(), vec![".mp4".to_string()]);
        // run()'s initial-scan half, without the polling loop
        {
            let cfg = detector.config.read().unwrap();
            for folder in &cfg.source_folders {
                let files = detector.list_matching(folder, &cfg.extensions);
                detector.seen.lock().unwrap().insert(folder.clone(), files);
            }
        }
        detector.tick();
        assert_eq!(queue.stats().waiting, 0);
    }

    #[test]
    fn new_file_is_enqueued_once_size_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let (detector, queue) = detector_with_folder(dir.path().to_path_buf(), vec![".mp4".to_string()]);

        detector.tick(); // seeds seen set, empty folder
        fs::write(dir.path().join("new.mp4"), vec![1u8; 100]).unwrap();
        detector.tick(); // detects candidate

        assert_eq!(queue.stats().waiting, 0);

        // Simulate the stable window having elapsed by back-dating first_seen.
        {
            let mut candidates = detector.candidates.lock().unwrap();
            for candidate in candidates.values_mut() {
                candidate.first_seen = Instant::now() - Duration::from_secs(10);
            }
        }
        detector.tick();
        assert_eq!(queue.stats().waiting, 1);
    }

    #[test]
    fn growing_file_resets_stability_window() {
        let dir = tempfile::tempdir().unwrap();
        let (detector, queue) = detector_with_folder(dir.path().to_path_buf(), vec![".mp4".to_string()]);

        detector.tick();
        fs::write(dir.path().join("growing.mp4"), vec![1u8; 100]).unwrap();
        detector.tick();
        {
            let mut candidates = detector.candidates.lock().unwrap();
            for candidate in candidates.values_mut() {
                candidate.first_seen = Instant::now() - Duration::from_secs(10);
            }
        }
        fs::write(dir.path().join("growing.mp4"), vec![1u8; 200]).unwrap();
        detector.tick();

        assert_eq!(queue.stats().waiting, 0);
        assert_eq!(detector.stats().files_stabilizing, 1);
    }

    #[test]
    fn non_matching_extension_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (detector, queue) = detector_with_folder(dir.path().to_path_buf(), vec![".mp4".to_string()]);
        detector.tick();
        fs::write(dir.path().join("notes.txt"), vec![1u8; 100]).unwrap();
        detector.tick();
        assert_eq!(detector.stats().files_stabilizing, 0);
        let _ = queue;
    }

    #[test]
    fn adding_a_source_folder_does_not_emit_jobs_for_its_existing_files() {
        let queue = Queue::new();
        let config = Arc::new(RwLock::new(Config::default()));
        let detector = Detector::new(queue.clone(), config);

        let new_dir = tempfile::tempdir().unwrap();
        fs::write(new_dir.path().join("already_here.mp4"), vec![1u8; 100]).unwrap();

        detector.add_source_folder(new_dir.path().to_path_buf());
        assert_eq!(detector.current_config().source_folders, vec![new_dir.path().to_path_buf()]);

        detector.tick();
        assert_eq!(queue.stats().waiting, 0);
        assert_eq!(detector.stats().files_stabilizing, 0);
    }

    #[test]
    fn removing_a_source_folder_clears_its_seen_set_and_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let (detector, _queue) = detector_with_folder(dir.path().to_path_buf(), vec![".mp4".to_string()]);
        detector.tick();
        fs::write(dir.path().join("new.mp4"), vec![1u8; 100]).unwrap();
        detector.tick();
        assert_eq!(detector.stats().files_stabilizing, 1);

        detector.remove_source_folder(dir.path());
        assert!(detector.current_config().source_folders.is_empty());
        assert_eq!(detector.stats().files_stabilizing, 0);
        assert_eq!(detector.stats().folders_monitored, 0);
    }

    #[test]
    fn update_extensions_replaces_the_matched_list() {
        let queue = Queue::new();
        let config = Arc::new(RwLock::new(Config::default()));
        let detector = Detector::new(queue, config);

        detector.update_extensions(vec![".txt".to_string()]);
        assert_eq!(detector.current_config().extensions, vec![".txt".to_string()]);
    }
}
