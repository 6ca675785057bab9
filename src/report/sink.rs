//! Per-attempt log sinks
//!
//! Every attempt is handed to an [`AttemptSink`] as soon as it finishes. Sinks are
//! passed in explicitly by the caller; the core never reaches for a global logger.

use super::ReportError;
use crate::fetcher::AttemptRecord;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Default attempt log filename under the output root
pub const ATTEMPT_LOG_FILE_NAME: &str = "download_attempts.jsonl";

/// Receives every attempt record
pub trait AttemptSink: Send + Sync {
    /// Persist one record
    fn record(&self, record: &AttemptRecord) -> Result<(), ReportError>;
}

/// Append-only JSON-lines file, one record per line
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    /// Open (or create) `path` for appending
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ReportError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ReportError::IoError(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                ReportError::IoError(format!("Failed to open attempt log {}: {}", path.display(), e))
            })?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Log file location
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AttemptSink for JsonLinesSink {
    fn record(&self, record: &AttemptRecord) -> Result<(), ReportError> {
        let mut line =
            serde_json::to_vec(record).map_err(|e| ReportError::SerializationError(e.to_string()))?;
        line.push(b'\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| ReportError::IoError("attempt log lock poisoned".to_string()))?;
        // One write per line keeps lines whole under O_APPEND.
        file.write_all(&line)
            .map_err(|e| ReportError::IoError(e.to_string()))
    }
}

/// Keeps records in memory; used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AttemptRecord>>,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far
    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl AttemptSink for MemorySink {
    fn record(&self, record: &AttemptRecord) -> Result<(), ReportError> {
        self.records
            .lock()
            .map_err(|_| ReportError::IoError("memory sink lock poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }
}
