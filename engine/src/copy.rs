//! The checkpointed copy routine (component E) — the heart of the engine.
//!
//! Grounded in `original_source/src/core/file_handler.py`'s
//! `copy_with_progress`/`safe_copy` for the algorithm shape (pre-flight,
//! chunked read/write loop with checkpoint firing, post-verify), and in
//! `other_examples/910b0d6b_vdavid-cmdr__apps-desktop-src-tauri-src-file_system-write_operations-chunked_copy.rs.rs`
//! for the idiomatic buffered-loop structure in Rust. Mtime preservation
//! after a completed copy mirrors `fs_ops::copy_file_with_metadata`'s pattern.
//!
//! The one deliberate behavior change from `file_handler.py` is that the
//! destination is never opened in truncate mode on a resumed attempt.

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::CopyError;
use crate::job::Job;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

const BACKOFF_SCHEDULE_SECS: [u64; 5] = [1, 2, 4, 8, 16];

/// Compute a collision-free destination path by appending ` (n)` before
/// the extension until no existing file matches.
pub fn unique_dest_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(filename);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(filename);
    let ext = path.extension().and_then(|e| e.to_str());

    let mut n = 1;
    loop {
        let new_name = match ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = dir.join(new_name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Retry `op` with the exponential backoff schedule on permission-denied
/// or other transient I/O errors. Source-not-found and unknown errors are
/// not retried here; they propagate on the first attempt.
fn with_backoff<T>(path: &Path, mut op: impl FnMut() -> std::io::Result<T>) -> Result<T, CopyError> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CopyError::SourceNotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) if is_backoff_eligible(&e) => {
                attempt += 1;
                if attempt > BACKOFF_SCHEDULE_SECS.len() {
                    return Err(if e.kind() == ErrorKind::PermissionDenied {
                        CopyError::PermissionDenied {
                            path: path.to_path_buf(),
                            attempts: attempt - 1,
                        }
                    } else {
                        CopyError::TransientIo {
                            path: path.to_path_buf(),
                            source: e,
                        }
                    });
                }
                let wait = BACKOFF_SCHEDULE_SECS[attempt - 1];
                tracing::warn!(path = %path.display(), attempt, wait, "retryable I/O error, backing off");
                thread::sleep(Duration::from_secs(wait));
            }
            Err(e) => {
                return Err(CopyError::Unknown {
                    message: e.to_string(),
                })
            }
        }
    }
}

fn is_backoff_eligible(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::PermissionDenied | ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock
    )
}

/// Copy `job.source_path` to a collision-free path under `dest_dir`,
/// resuming from `job.copied_bytes` if non-zero. Invokes `on_progress`
/// after every chunk and `on_checkpoint` whenever a 10%-boundary is
/// crossed (§4.5 step 3). Returns `Ok(())` only after the post-verify
/// step confirms the destination size matches `job.size_bytes`.
pub fn copy(
    job: &mut Job,
    dest_dir: &Path,
    chunk_size: u64,
    mut on_progress: impl FnMut(u64, f64),
    mut on_checkpoint: impl FnMut(&Job),
) -> Result<(), CopyError> {
    let chunk_size = if chunk_size == 0 { DEFAULT_CHUNK_SIZE } else { chunk_size };

    // 1. Pre-flight: live source size, dest dir, collision-free path.
    let live_size = with_backoff(&job.source_path, || fs::metadata(&job.source_path).map(|m| m.len()))?;
    if live_size != job.size_bytes {
        tracing::info!(job = %job.name, recorded = job.size_bytes, live = live_size, "adopting live source size");
        job.size_bytes = live_size;
    }

    if job.dest_path.as_os_str().is_empty() {
        fs::create_dir_all(dest_dir).map_err(|e| CopyError::TransientIo {
            path: dest_dir.to_path_buf(),
            source: e,
        })?;
        job.dest_path = unique_dest_path(dest_dir, &job.name);
    }

    // 2. Open streams; seek both to copied_bytes on resume. The
    // destination is opened without truncation on every attempt so a
    // resumed partial file is preserved.
    let mut src_file = with_backoff(&job.source_path, || File::open(&job.source_path))?;
    with_backoff(&job.source_path, || src_file.seek(SeekFrom::Start(job.copied_bytes)))?;

    if job.copied_bytes == 0 {
        // Fresh attempt: truncate exactly once, at this moment.
        with_backoff(&job.dest_path, || {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&job.dest_path)
        })?;
    } else {
        // Resume: ensure destination is at least copied_bytes long
        // without discarding any of the existing partial content.
        let dst_len = fs::metadata(&job.dest_path).map(|m| m.len()).unwrap_or(0);
        if dst_len < job.copied_bytes {
            return Err(CopyError::SizeMismatch {
                expected: job.copied_bytes,
                actual: dst_len,
            });
        }
    }

    let mut dst_file = with_backoff(&job.dest_path, || {
        OpenOptions::new().write(true).create(true).open(&job.dest_path)
    })?;
    with_backoff(&job.dest_path, || dst_file.seek(SeekFrom::Start(job.copied_bytes)))?;

    // 3. Chunk loop.
    let mut buf = vec![0u8; chunk_size.min(job.size_bytes.max(1)) as usize];
    while job.copied_bytes < job.size_bytes {
        let remaining = job.size_bytes - job.copied_bytes;
        let to_read = remaining.min(buf.len() as u64) as usize;

        let read_bytes = with_backoff(&job.source_path, || src_file.read(&mut buf[..to_read]))?;
        if read_bytes == 0 {
            return Err(CopyError::SourceNotFound {
                path: job.source_path.clone(),
            });
        }

        with_backoff(&job.dest_path, || dst_file.write_all(&buf[..read_bytes]))?;

        job.copied_bytes += read_bytes as u64;
        job.last_progress_sample = Some((std::time::Instant::now(), job.copied_bytes));
        on_progress(job.copied_bytes, job.progress_percent());

        let crossed = job.checkpoint_floor();
        if crossed > job.last_checkpoint {
            job.last_checkpoint = crossed;
            on_checkpoint(job);
        }
    }

    // 4. Completion.
    job.last_checkpoint = 100;
    job.end_time = Some(chrono::Utc::now());

    // Preserve source mtime on the destination (ambient nicety, mirrors
    // copy_file_with_metadata's behavior).
    if let Ok(metadata) = src_file.metadata() {
        if let Ok(mtime) = metadata.modified() {
            let _ = filetime::set_file_mtime(&job.dest_path, filetime::FileTime::from_system_time(mtime));
        }
    }

    // 5. Post-verify.
    let dest_size = fs::metadata(&job.dest_path)
        .map(|m| m.len())
        .map_err(|e| CopyError::TransientIo {
            path: job.dest_path.clone(),
            source: e,
        })?;
    if dest_size != job.size_bytes {
        return Err(CopyError::SizeMismatch {
            expected: job.size_bytes,
            actual: dest_size,
        });
    }

    Ok(())
}
