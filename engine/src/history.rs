//! Append-only history sink (component D).
//!
//! Grounded directly in `original_source/src/utils/history.py`'s
//! `HistoryLogger`: a 5-line header (two separators, a title line, a
//! created-at line, a column-header line) followed by one fixed-format
//! row per terminal outcome, with a second indented line carrying the
//! error message on failure. `get_recent`/`get_stats` are carried as the
//! sink's own whitespace-splitting re-parsers since they share the row
//! format with the writer. Because a source filename can contain spaces,
//! `get_stats` locates the size column by scanning for the first token
//! that parses as a number rather than indexing by a fixed column offset.

use crate::error::HistoryError;
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SEPARATOR: &str = "====================================================================================================";
const COLUMN_HEADER: &str = "Timestamp            Filename                                         Size Status     Duration   Retry";
const HEADER_LINE_COUNT: usize = 5;

pub struct HistorySink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryStats {
    pub total_files: u64,
    pub total_size_gb: f64,
    pub success_count: u64,
    pub failed_count: u64,
    pub total_duration_seconds: u64,
}

impl HistorySink {
    pub fn new(path: PathBuf) -> Result<HistorySink, HistoryError> {
        let sink = HistorySink {
            path,
            write_lock: Mutex::new(()),
        };
        if !sink.path.exists() {
            sink.write_header()?;
        }
        Ok(sink)
    }

    fn write_header(&self) -> Result<(), HistoryError> {
        let _guard = self.write_lock.lock().unwrap();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| HistoryError::Open {
                path: self.path.clone(),
                source: e,
            })?;

        writeln!(file, "{SEPARATOR}").map_err(|e| HistoryError::Write { source: e })?;
        writeln!(file, "HISTORY COPY FILE - relaywatch").map_err(|e| HistoryError::Write { source: e })?;
        writeln!(file, "Created: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"))
            .map_err(|e| HistoryError::Write { source: e })?;
        writeln!(file, "{SEPARATOR}").map_err(|e| HistoryError::Write { source: e })?;
        writeln!(file, "{COLUMN_HEADER}").map_err(|e| HistoryError::Write { source: e })?;
        Ok(())
    }

    pub fn log_success(
        &self,
        filename: &str,
        size_bytes: u64,
        duration_seconds: f64,
        retry_count: u32,
    ) -> Result<(), HistoryError> {
        self.log_entry(filename, size_bytes, "SUCCESS", duration_seconds, retry_count, None)
    }

    pub fn log_failed(
        &self,
        filename: &str,
        size_bytes: u64,
        error_msg: &str,
        retry_count: u32,
    ) -> Result<(), HistoryError> {
        self.log_entry(filename, size_bytes, "FAILED", 0.0, retry_count, Some(error_msg))
    }

    fn log_entry(
        &self,
        filename: &str,
        size_bytes: u64,
        status: &str,
        duration_seconds: f64,
        retry_count: u32,
        error_msg: Option<&str>,
    ) -> Result<(), HistoryError> {
        let _guard = self.write_lock.lock().unwrap();
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S");
        let size_gb = size_bytes as f64 / (1024.0 * 1024.0 * 1024.0);

        let duration_str = if duration_seconds > 0.0 {
            let secs = duration_seconds as u64;
            format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
        } else {
            "-".to_string()
        };

        let display_name = if filename.len() <= 38 {
            filename.to_string()
        } else {
            format!("{}...", &filename[..35])
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| HistoryError::Open {
                path: self.path.clone(),
                source: e,
            })?;

        writeln!(
            file,
            "{timestamp:<20} {display_name:<40} {size_gb:>11.2} GB {status:<10} {duration_str:<10} {retry_count:<5}"
        )
        .map_err(|e| HistoryError::Write { source: e })?;

        if let Some(msg) = error_msg {
            writeln!(file, "{:<20} {:<40} {}", " ", "ERROR:", msg)
                .map_err(|e| HistoryError::Write { source: e })?;
        }

        Ok(())
    }

    /// Most recent `limit` data rows (non-indented lines), oldest-first
    /// within the window returned.
    pub fn get_recent(&self, limit: usize) -> Vec<String> {
        let lines = match Self::read_lines(&self.path) {
            Some(l) => l,
            None => return Vec::new(),
        };
        let data_lines: Vec<&String> = lines
            .iter()
            .skip(HEADER_LINE_COUNT)
            .filter(|l| !l.trim().is_empty() && !l.starts_with(' '))
            .collect();
        let start = data_lines.len().saturating_sub(limit);
        data_lines[start..].iter().map(|s| s.to_string()).collect()
    }

    pub fn get_stats(&self) -> HistoryStats {
        let mut stats = HistoryStats::default();
        let lines = match Self::read_lines(&self.path) {
            Some(l) => l,
            None => return stats,
        };

        for line in lines.iter().skip(HEADER_LINE_COUNT) {
            if line.trim().is_empty() || line.starts_with(' ') {
                continue;
            }
            // The filename column can itself contain spaces, so its width
            // isn't fixed in token count. Find the first token that parses
            // as the size (the column that always follows the filename),
            // then read GB/status/duration relative to that token instead
            // of by a fixed index.
            let parts: Vec<&str> = line.split_whitespace().collect();
            let size_idx = match parts.iter().skip(1).position(|p| p.parse::<f64>().is_ok()) {
                Some(i) => i + 1,
                None => continue,
            };
            if parts.len() < size_idx + 3 {
                continue;
            }
            stats.total_files += 1;
            if let Ok(size) = parts[size_idx].parse::<f64>() {
                stats.total_size_gb += size;
            }
            let status_idx = size_idx + 2; // size_idx+1 is the "GB" unit
            match parts[status_idx] {
                "SUCCESS" => stats.success_count += 1,
                "FAILED" => stats.failed_count += 1,
                _ => {}
            }
            let duration_idx = status_idx + 1;
            if parts.len() > duration_idx && parts[duration_idx] != "-" {
                let time_parts: Vec<&str> = parts[duration_idx].split(':').collect();
                if time_parts.len() == 3 {
                    if let (Ok(h), Ok(m), Ok(s)) = (
                        time_parts[0].parse::<u64>(),
                        time_parts[1].parse::<u64>(),
                        time_parts[2].parse::<u64>(),
                    ) {
                        stats.total_duration_seconds += h * 3600 + m * 60 + s;
                    }
                }
            }
        }
        stats
    }

    fn read_lines(path: &Path) -> Option<Vec<String>> {
        let file = std::fs::File::open(path).ok()?;
        let reader = std::io::BufReader::new(file);
        Some(reader.lines().filter_map(|l| l.ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sink_writes_five_line_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.txt");
        HistorySink::new(path.clone()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 5);
        assert!(content.contains("HISTORY COPY FILE"));
    }

    #[test]
    fn log_success_appends_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.txt");
        let sink = HistorySink::new(path.clone()).unwrap();
        sink.log_success("a.mp4", 1_073_741_824, 10.0, 0).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 6);
        assert!(content.contains("a.mp4"));
        assert!(content.contains("SUCCESS"));
        assert!(content.contains("1.00 GB"));
    }

    #[test]
    fn log_failed_appends_error_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.txt");
        let sink = HistorySink::new(path.clone()).unwrap();
        sink.log_failed("bad.mp4", 1000, "disk full", 3).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("FAILED"));
        assert!(content.contains("ERROR:"));
        assert!(content.contains("disk full"));
    }

    #[test]
    fn get_recent_skips_header_and_error_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.txt");
        let sink = HistorySink::new(path).unwrap();
        sink.log_success("a.mp4", 1000, 1.0, 0).unwrap();
        sink.log_failed("b.mp4", 1000, "oops", 1).unwrap();

        let recent = sink.get_recent(10);
        assert_eq!(recent.len(), 2);
        assert!(recent[0].contains("a.mp4"));
        assert!(recent[1].contains("b.mp4"));
    }

    #[test]
    fn get_stats_counts_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.txt");
        let sink = HistorySink::new(path).unwrap();
        sink.log_success("a.mp4", 1_073_741_824, 3600.0, 0).unwrap();
        sink.log_success("b.mp4", 2 * 1_073_741_824, 1800.0, 1).unwrap();
        sink.log_failed("c.mp4", 1_073_741_824, "timeout", 3).unwrap();

        let stats = sink.get_stats();
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.total_duration_seconds, 3600 + 1800);
    }

    #[test]
    fn get_stats_handles_filenames_with_embedded_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.txt");
        let sink = HistorySink::new(path).unwrap();
        sink.log_success("raw footage day one.mp4", 1_073_741_824, 60.0, 0).unwrap();
        sink.log_failed("camera b clip.mov", 2 * 1_073_741_824, "disk full", 1).unwrap();

        let stats = sink.get_stats();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failed_count, 1);
        assert!((stats.total_size_gb - 3.0).abs() < 0.01);
        assert_eq!(stats.total_duration_seconds, 60);
    }

    #[test]
    fn long_filenames_are_truncated_in_the_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.txt");
        let sink = HistorySink::new(path.clone()).unwrap();
        let long_name = "a_very_long_filename_that_exceeds_the_column_width.mp4";
        sink.log_success(long_name, 1000, 1.0, 0).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("..."));
        assert!(!content.contains(long_name));
    }
}
