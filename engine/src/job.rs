//! The job record (component A): the central entity tracked by the queue,
//! the state store, and the copy routine.
//!
//! A `Job` is pure data plus derived accessors. It is exclusively owned by
//! its worker once dequeued; the queue retains only a lookup for UI/stat
//! purposes. Serialization to and from a self-describing key/value form
//! (used by the state store) tolerates missing optional fields and
//! degrades corrupt timestamps silently rather than failing to load.

use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// One of the four buckets a job can live in, plus `paused` (reserved for
/// a future pause/resume UI action; the core engine never assigns it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Downloading,
    Completed,
    Failed,
    Paused,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn is_resumable(&self) -> bool {
        matches!(self, JobStatus::Waiting | JobStatus::Downloading)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Downloading => "downloading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

/// One pending/active/finished file transfer.
///
/// `name` is the unique identifier within the running process and within
/// the state store's non-terminal population (invariant 5).
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub name: String,
    pub source_path: PathBuf,
    /// May be empty at creation; materialized before transfer begins.
    pub dest_path: PathBuf,
    pub size_bytes: u64,
    pub status: JobStatus,
    pub copied_bytes: u64,
    /// Largest multiple of 10 (%) for which a persistence write has been
    /// performed. Invariant: `last_checkpoint in {0,10,...,100}`.
    pub last_checkpoint: u8,
    pub retry_count: u32,
    pub max_retry: u32,
    pub detected_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// 1-based index in the waiting sequence; recomputed on every queue
    /// mutation. `0` means "not currently waiting".
    pub queue_position: usize,
    pub last_error: Option<String>,

    /// Not persisted: `(sampled_at, copied_bytes)` used only to derive
    /// `speed_mbps`/`eta_formatted`. Absent until the first progress sample
    /// of the current attempt.
    #[serde(skip)]
    pub last_progress_sample: Option<(std::time::Instant, u64)>,
}

/// Hand-rolled so a single malformed or missing field degrades that field
/// alone rather than failing the whole record: missing optional fields
/// fall back to their defaults, and a corrupt/missing `detected_time`
/// degrades to `now` instead of rejecting the record (the state store
/// relies on this to keep one bad job record from wiping out every other
/// resumable job on restart).
impl<'de> Deserialize<'de> for Job {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let obj = value
            .as_object()
            .ok_or_else(|| DeError::custom("job record is not a JSON object"))?;

        let str_field = |key: &str| obj.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let timestamp = |key: &str| {
            obj.get(key)
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };

        let status = obj
            .get("status")
            .cloned()
            .and_then(|v| serde_json::from_value::<JobStatus>(v).ok())
            .unwrap_or(JobStatus::Waiting);

        Ok(Job {
            name: str_field("name").unwrap_or_default(),
            source_path: PathBuf::from(str_field("source_path").unwrap_or_default()),
            dest_path: PathBuf::from(str_field("dest_path").unwrap_or_default()),
            size_bytes: obj.get("size_bytes").and_then(|v| v.as_u64()).unwrap_or(0),
            status,
            copied_bytes: obj.get("copied_bytes").and_then(|v| v.as_u64()).unwrap_or(0),
            last_checkpoint: obj.get("last_checkpoint").and_then(|v| v.as_u64()).unwrap_or(0) as u8,
            retry_count: obj.get("retry_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            max_retry: obj
                .get("max_retry")
                .and_then(|v| v.as_u64())
                .unwrap_or(crate::config::DEFAULT_MAX_RETRY as u64) as u32,
            detected_time: timestamp("detected_time").unwrap_or_else(Utc::now),
            start_time: timestamp("start_time"),
            end_time: timestamp("end_time"),
            queue_position: obj.get("queue_position").and_then(|v| v.as_u64()).unwrap_or(0) as usize,
            last_error: str_field("last_error"),
            last_progress_sample: None,
        })
    }
}

impl Job {
    /// Construct a newly-detected job with `status = waiting` and an empty
    /// destination path (materialized later by the worker).
    pub fn new_waiting(name: String, source_path: PathBuf, size_bytes: u64, max_retry: u32) -> Self {
        Job {
            name,
            source_path,
            dest_path: PathBuf::new(),
            size_bytes,
            status: JobStatus::Waiting,
            copied_bytes: 0,
            last_checkpoint: 0,
            retry_count: 0,
            max_retry,
            detected_time: Utc::now(),
            start_time: None,
            end_time: None,
            queue_position: 0,
            last_error: None,
            last_progress_sample: None,
        }
    }

    pub fn size_gb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    pub fn progress_percent(&self) -> f64 {
        if self.size_bytes == 0 {
            100.0
        } else {
            (self.copied_bytes as f64 / self.size_bytes as f64) * 100.0
        }
    }

    /// Bytes per second since the last progress sample, or `0` if there is
    /// no prior sample or progress is already complete.
    pub fn speed_mbps(&self) -> f64 {
        if self.copied_bytes >= self.size_bytes {
            return 0.0;
        }
        match self.last_progress_sample {
            Some((at, bytes)) => {
                let elapsed = at.elapsed().as_secs_f64();
                if elapsed <= 0.0 || self.copied_bytes < bytes {
                    0.0
                } else {
                    let delta = (self.copied_bytes - bytes) as f64;
                    (delta / elapsed) / (1024.0 * 1024.0)
                }
            }
            None => 0.0,
        }
    }

    pub fn eta_seconds(&self) -> f64 {
        let speed_bps = self.speed_mbps() * 1024.0 * 1024.0;
        if speed_bps <= 0.0 || self.copied_bytes >= self.size_bytes {
            return 0.0;
        }
        (self.size_bytes - self.copied_bytes) as f64 / speed_bps
    }

    pub fn eta_formatted(&self) -> String {
        let secs = self.eta_seconds() as u64;
        if secs == 0 {
            return "-".to_string();
        }
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }

    /// `floor(progress / 10) * 10`, the checkpoint boundary a given
    /// progress value has crossed.
    pub fn checkpoint_floor(&self) -> u8 {
        ((self.progress_percent() / 10.0).floor() * 10.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_waiting_job_has_zero_progress() {
        let job = Job::new_waiting("a.mp4".into(), "/src/a.mp4".into(), 1000, 3);
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.copied_bytes, 0);
        assert_eq!(job.progress_percent(), 0.0);
        assert_eq!(job.last_checkpoint, 0);
    }

    #[test]
    fn progress_percent_tracks_copied_bytes() {
        let mut job = Job::new_waiting("a.mp4".into(), "/src/a.mp4".into(), 1000, 3);
        job.copied_bytes = 500;
        assert_eq!(job.progress_percent(), 50.0);
    }

    #[test]
    fn zero_byte_job_reports_complete_progress() {
        let job = Job::new_waiting("empty.mp4".into(), "/src/empty.mp4".into(), 0, 3);
        assert_eq!(job.progress_percent(), 100.0);
    }

    #[test]
    fn checkpoint_floor_rounds_down_to_10_percent_boundary() {
        let mut job = Job::new_waiting("a.mp4".into(), "/src/a.mp4".into(), 1000, 3);
        job.copied_bytes = 359;
        assert_eq!(job.checkpoint_floor(), 30);
        job.copied_bytes = 400;
        assert_eq!(job.checkpoint_floor(), 40);
    }

    #[test]
    fn eta_formatted_is_dash_when_speed_unknown() {
        let job = Job::new_waiting("a.mp4".into(), "/src/a.mp4".into(), 1000, 3);
        assert_eq!(job.eta_formatted(), "-");
    }

    #[test]
    fn job_status_terminal_and_resumable_classification() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Waiting.is_terminal());
        assert!(JobStatus::Waiting.is_resumable());
        assert!(JobStatus::Downloading.is_resumable());
        assert!(!JobStatus::Completed.is_resumable());
    }

    #[test]
    fn serialize_round_trip_preserves_fields() {
        let job = Job::new_waiting("a.mp4".into(), "/src/a.mp4".into(), 12345, 3);
        let json = serde_json::to_string(&job).expect("serialize");
        let back: Job = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.name, job.name);
        assert_eq!(back.size_bytes, job.size_bytes);
        assert_eq!(back.status, job.status);
    }

    #[test]
    fn deserialize_tolerates_missing_queue_position() {
        let json = r#"{
            "name": "a.mp4",
            "source_path": "/src/a.mp4",
            "dest_path": "",
            "size_bytes": 100,
            "status": "waiting",
            "copied_bytes": 0,
            "last_checkpoint": 0,
            "retry_count": 0,
            "max_retry": 3,
            "detected_time": "2026-01-01T00:00:00Z",
            "start_time": null,
            "end_time": null,
            "last_error": null
        }"#;
        let job: Job = serde_json::from_str(json).expect("deserialize with defaults");
        assert_eq!(job.queue_position, 0);
    }

    #[test]
    fn deserialize_degrades_corrupt_detected_time_to_now() {
        let json = r#"{
            "name": "a.mp4",
            "source_path": "/src/a.mp4",
            "dest_path": "",
            "size_bytes": 100,
            "status": "waiting",
            "copied_bytes": 0,
            "last_checkpoint": 0,
            "retry_count": 0,
            "max_retry": 3,
            "detected_time": "not-a-timestamp"
        }"#;
        let before = Utc::now();
        let job: Job = serde_json::from_str(json).expect("deserialize despite corrupt timestamp");
        assert!(job.detected_time >= before);
        assert_eq!(job.start_time, None);
        assert_eq!(job.last_error, None);
    }

    #[test]
    fn deserialize_tolerates_entirely_missing_optional_fields() {
        let json = r#"{"name": "a.mp4", "source_path": "/src/a.mp4"}"#;
        let job: Job = serde_json::from_str(json).expect("deserialize with all defaults");
        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.size_bytes, 0);
        assert_eq!(job.max_retry, DEFAULT_MAX_RETRY_FOR_TEST);
        assert_eq!(job.queue_position, 0);
        assert!(job.last_error.is_none());
    }

    const DEFAULT_MAX_RETRY_FOR_TEST: u32 = crate::config::DEFAULT_MAX_RETRY as u32;
}
