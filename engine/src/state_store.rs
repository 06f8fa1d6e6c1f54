//! Durable state store (component C): a whole-file JSON snapshot of all
//! non-terminal jobs, used for crash-safe resume.
//!
//! Grounded in `original_source/src/utils/state_manager.py`'s
//! `StateManager`, with one deliberate correction: `save()` there writes
//! directly to the target path, so a crash mid-write corrupts
//! `pipeline_state.json`. This implementation writes to a temporary
//! sibling file and renames it over the target, the same durable-write
//! shape as
//! `other_examples/667e51e0_groblegark-oddjobs__crates-storage-src-checkpoint.rs.rs`'s
//! `checkpoint_blocking` (write tmp, then atomically rename).

use crate::error::StateStoreError;
use crate::job::{Job, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub version: String,
    pub last_update: Option<DateTime<Utc>>,
    pub jobs: HashMap<String, Job>,
    pub active_downloads: Vec<String>,
    pub queue: Vec<String>,
}

impl Default for StateDocument {
    fn default() -> Self {
        StateDocument {
            version: "1.0".to_string(),
            last_update: None,
            jobs: HashMap::new(),
            active_downloads: Vec::new(),
            queue: Vec::new(),
        }
    }
}

pub struct StateStore {
    path: PathBuf,
    document: Mutex<StateDocument>,
}

impl StateStore {
    pub fn new(path: PathBuf) -> StateStore {
        StateStore {
            path,
            document: Mutex::new(StateDocument::default()),
        }
    }

    /// Load from disk. Missing file -> empty state. A document that isn't
    /// even valid JSON degrades to empty state. Otherwise each job record
    /// is parsed independently: one corrupt record is dropped and logged,
    /// it never drags down the rest of the document, since `Job`'s own
    /// `Deserialize` impl already tolerates missing/corrupt fields on
    /// well-formed records.
    pub fn load(&self) -> StateDocument {
        let mut guard = self.document.lock().unwrap();
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "state file not found, using empty state");
                return guard.clone();
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "error loading state file, using empty state");
                return guard.clone();
            }
        };

        let root: serde_json::Value = match serde_json::from_str(&data) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "malformed state file, using empty state");
                return guard.clone();
            }
        };

        let mut doc = StateDocument::default();
        if let Some(version) = root.get("version").and_then(|v| v.as_str()) {
            doc.version = version.to_string();
        }
        doc.last_update = root
            .get("last_update")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        if let Some(jobs) = root.get("jobs").and_then(|v| v.as_object()) {
            for (name, value) in jobs {
                match serde_json::from_value::<Job>(value.clone()) {
                    Ok(job) => {
                        doc.jobs.insert(name.clone(), job);
                    }
                    Err(e) => {
                        tracing::error!(job = %name, error = %e, "dropping unreadable job record, other jobs unaffected");
                    }
                }
            }
        }
        doc.active_downloads = root
            .get("active_downloads")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        doc.queue = root
            .get("queue")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        *guard = doc.clone();
        doc
    }

    /// Replace the full job set and persist. Used at shutdown / when
    /// reconciling a whole queue snapshot.
    pub fn save(&self, jobs: &[Job]) -> Result<(), StateStoreError> {
        let mut guard = self.document.lock().unwrap();
        let mut jobs_map = HashMap::new();
        let mut active = Vec::new();
        let mut waiting = Vec::new();
        for job in jobs {
            match job.status {
                JobStatus::Downloading => active.push(job.name.clone()),
                JobStatus::Waiting => waiting.push(job.name.clone()),
                _ => {}
            }
            jobs_map.insert(job.name.clone(), job.clone());
        }
        guard.jobs = jobs_map;
        guard.active_downloads = active;
        guard.queue = waiting;
        guard.last_update = Some(Utc::now());
        self.persist(&guard)
    }

    /// Update a single job's record in place (the common checkpoint-time
    /// call), then persist the whole document atomically.
    pub fn update_job(&self, job: &Job) -> Result<(), StateStoreError> {
        let mut guard = self.document.lock().unwrap();
        guard.jobs.insert(job.name.clone(), job.clone());

        guard.active_downloads.retain(|n| n != &job.name);
        guard.queue.retain(|n| n != &job.name);
        match job.status {
            JobStatus::Downloading => guard.active_downloads.push(job.name.clone()),
            JobStatus::Waiting => guard.queue.push(job.name.clone()),
            _ => {}
        }
        guard.last_update = Some(Utc::now());
        self.persist(&guard)
    }

    pub fn remove_job(&self, name: &str) -> Result<(), StateStoreError> {
        let mut guard = self.document.lock().unwrap();
        guard.jobs.remove(name);
        guard.active_downloads.retain(|n| n != name);
        guard.queue.retain(|n| n != name);
        guard.last_update = Some(Utc::now());
        self.persist(&guard)
    }

    pub fn get_resumable_jobs(&self) -> Vec<Job> {
        let guard = self.document.lock().unwrap();
        guard
            .jobs
            .values()
            .filter(|j| j.status.is_resumable())
            .cloned()
            .collect()
    }

    pub fn clear_completed(&self) -> Result<usize, StateStoreError> {
        let mut guard = self.document.lock().unwrap();
        let before = guard.jobs.len();
        guard.jobs.retain(|_, job| !job.status.is_terminal());
        let removed = before - guard.jobs.len();
        if removed > 0 {
            guard.last_update = Some(Utc::now());
            self.persist(&guard)?;
        }
        Ok(removed)
    }

    fn persist(&self, doc: &StateDocument) -> Result<(), StateStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = fs::create_dir_all(parent);
            }
        }
        let json = serde_json::to_string_pretty(doc)?;
        let tmp_path = tmp_path_for(&self.path);
        fs::write(&tmp_path, json).map_err(|e| StateStoreError::Write {
            path: self.path.clone(),
            source: e,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|e| StateStoreError::Rename {
            path: self.path.clone(),
            source: e,
        })?;
        tracing::debug!(path = %self.path.display(), "state persisted");
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
