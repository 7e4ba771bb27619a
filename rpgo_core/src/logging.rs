// rpgo_core/src/logging.rs

//! Per-update statistics sinks.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::IoError;
use crate::outlier::RejectionStats;

const STATS_FILE: &str = "log.txt";
const ERROR_FILE: &str = "error.txt";
const STATS_HEADER: &str = "#lc #good-lc #odom-consistent-lc #multirobot-lc #good-multirobot-lc #ldmrk-measurements #good-ldmrk-measurements #error";
const ERROR_HEADER: &str = "#consistency-error";

/// What the solver reports after each `update`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRecord {
    pub stats: RejectionStats,
    /// Total graph error at the current values.
    pub error: f64,
}

/// A sink for per-update records. Sinks own their formatting and failure handling.
pub trait StatsLogger: Send + Sync {
    fn record(&mut self, record: &UpdateRecord);
}

/// Appends to `log.txt` and `error.txt` in a folder. Each record opens and
/// closes both files.
#[derive(Debug, Clone)]
pub struct FileStatsLogger {
    stats_path: PathBuf,
    error_path: PathBuf,
}

impl FileStatsLogger {
    /// Creates (or truncates) both files and writes their headers.
    pub fn create(folder: impl AsRef<Path>) -> Result<Self, IoError> {
        let folder = folder.as_ref();
        let logger = Self {
            stats_path: folder.join(STATS_FILE),
            error_path: folder.join(ERROR_FILE),
        };
        write_header(&logger.stats_path, STATS_HEADER)?;
        write_header(&logger.error_path, ERROR_HEADER)?;
        Ok(logger)
    }

    pub fn stats_path(&self) -> &Path {
        &self.stats_path
    }

    pub fn error_path(&self) -> &Path {
        &self.error_path
    }

    fn append(path: &Path, line: &str) {
        let result = OpenOptions::new()
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{}", line));
        if let Err(e) = result {
            warn!("Failed to append to {:?}: {}", path, e);
        }
    }
}

impl StatsLogger for FileStatsLogger {
    fn record(&mut self, record: &UpdateRecord) {
        let s = &record.stats;
        let stats_line = format!(
            "{} {} {} {} {} {} {} {}",
            s.lc,
            s.good_lc,
            s.odom_consistent_lc,
            s.multirobot_lc,
            s.good_multirobot_lc,
            s.landmark_measurements,
            s.good_landmark_measurements,
            record.error
        );
        let error_line = s
            .consistency_error
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        Self::append(&self.stats_path, &stats_line);
        Self::append(&self.error_path, &error_line);
    }
}

fn write_header(path: &Path, header: &str) -> Result<(), IoError> {
    let mut file = File::create(path).map_err(|e| IoError::file(path, e))?;
    writeln!(file, "{}", header).map_err(|e| IoError::file(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(lc: usize, errors: &[f64]) -> UpdateRecord {
        UpdateRecord {
            stats: RejectionStats {
                lc,
                good_lc: lc,
                consistency_error: errors.to_vec(),
                ..Default::default()
            },
            error: 0.5,
        }
    }

    #[test]
    fn writes_headers_then_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = FileStatsLogger::create(dir.path()).unwrap();
        logger.record(&record(1, &[0.25]));
        logger.record(&record(2, &[0.5, 3.0]));

        let stats = std::fs::read_to_string(logger.stats_path()).unwrap();
        let lines: Vec<&str> = stats.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], STATS_HEADER);
        assert_eq!(lines[2], "2 2 0 0 0 0 0 0.5");
        assert_eq!(lines[2].split(' ').count(), 8);

        let errors = std::fs::read_to_string(logger.error_path()).unwrap();
        let lines: Vec<&str> = errors.lines().collect();
        assert_eq!(lines, vec![ERROR_HEADER, "0.25", "0.5 3"]);
    }

    #[test]
    fn create_truncates_previous_logs() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = FileStatsLogger::create(dir.path()).unwrap();
        logger.record(&record(1, &[]));
        let logger = FileStatsLogger::create(dir.path()).unwrap();

        let stats = std::fs::read_to_string(logger.stats_path()).unwrap();
        assert_eq!(stats.lines().count(), 1);
    }

    #[test]
    fn missing_folder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileStatsLogger::create(dir.path().join("absent")).is_err());
    }

    #[test]
    fn record_after_folder_removal_only_warns() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("logs");
        std::fs::create_dir(&folder).unwrap();
        let mut logger = FileStatsLogger::create(&folder).unwrap();
        std::fs::remove_dir_all(&folder).unwrap();
        logger.record(&record(1, &[1.0]));
    }
}
