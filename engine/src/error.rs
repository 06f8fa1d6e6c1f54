//! Error types for the transfer engine.
//!
//! Configuration errors are terminal and never retried; transient I/O and
//! size-mismatch errors are eligible for job-level retry (decided by the
//! queue, not by these types themselves); unknown errors are logged and
//! treated as terminal.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("destination_folder is not set")]
    DestinationNotSet,
}

/// Errors raised by the copy routine (component E).
///
/// `SourceNotFound` -> `NonExistentSourceError` (retryable),
/// `PermissionDenied`/`TransientIo` -> `TransientIOError` (retried inside
/// E with backoff, escalated to the worker only once exhausted),
/// `SizeMismatch` -> `SizeMismatchError`, everything else -> `Unknown`.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("source file not found: {path}")]
    SourceNotFound { path: PathBuf },

    #[error("permission denied after {attempts} attempts: {path}")]
    PermissionDenied { path: PathBuf, attempts: u32 },

    #[error("I/O error on {path}: {source}")]
    TransientIo { path: PathBuf, source: io::Error },

    #[error("size mismatch: expected {expected} bytes, destination has {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("{message}")]
    Unknown { message: String },
}

impl CopyError {
    /// Whether this failure is eligible for the in-copy exponential
    /// backoff retry loop (distinct from job-level retry owned by the
    /// queue).
    pub fn is_backoff_eligible(&self) -> bool {
        matches!(self, CopyError::PermissionDenied { .. } | CopyError::TransientIo { .. })
    }
}

/// Errors raised by a worker's defensive pre-flight checks (component F)
/// that are not already covered by `CopyError`.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("source path is empty")]
    EmptySourcePath,

    #[error("destination folder not configured")]
    DestinationNotConfigured,

    #[error("cannot create destination folder {path}: {source}")]
    CannotCreateDestDir { path: PathBuf, source: io::Error },

    #[error("no write permission to destination folder {path}")]
    DestDirNotWritable { path: PathBuf },

    #[error(transparent)]
    Copy(#[from] CopyError),
}

impl WorkerError {
    /// Whether the queue should re-enqueue this job for another attempt.
    /// Configuration problems are terminal; a missing source file may be
    /// transient (the share may still be settling).
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::EmptySourcePath
            | WorkerError::DestinationNotConfigured
            | WorkerError::CannotCreateDestDir { .. }
            | WorkerError::DestDirNotWritable { .. } => false,
            WorkerError::Copy(CopyError::SourceNotFound { .. }) => true,
            WorkerError::Copy(_) => true,
        }
    }
}

/// Errors raised by the durable state store (component C).
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("failed to write state file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to rename temp state file into place at {path}: {source}")]
    Rename { path: PathBuf, source: io::Error },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised by the append-only history sink (component D).
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to open history file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to write history row: {source}")]
    Write { source: io::Error },
}
