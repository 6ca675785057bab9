//! Outcome aggregation and run reporting
//!
//! The [`OutcomeAggregator`] is the single consumer of terminal target reports. It
//! turns them into a [`RunSummary`] whose contents do not depend on the order in
//! which lanes finished: failures are listed by catalog ordinal.
//!
//! Summaries serialize to JSON (`download_summary.json`) and, when anything failed,
//! export the failed subset as CSV (`failed_targets.csv`) so the missing archives
//! can be requested again.

pub mod sink;

pub use sink::{AttemptSink, JsonLinesSink, MemorySink, ATTEMPT_LOG_FILE_NAME};

use crate::downloader::job::{TargetReport, TargetState};
use crate::fetcher::ErrorKind;
use crate::{metrics, TemporalResolution, Variable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Summary filename under the output root
pub const SUMMARY_FILE_NAME: &str = "download_summary.json";

/// Failed-target export filename under the output root
pub const FAILED_TARGETS_FILE_NAME: &str = "failed_targets.csv";

/// Reporting errors
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// A target was reported twice
    #[error("duplicate terminal report for target #{0}")]
    DuplicateReport(usize),

    /// A report carried a non-terminal state
    #[error("target #{ordinal} reported in non-terminal state {state}")]
    NonTerminal {
        /// Target ordinal
        ordinal: usize,
        /// State label
        state: &'static str,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every target succeeded or was skipped
    Success,
    /// The run completed but some targets failed
    PartialFailure,
    /// The run was stopped early (fatal error or cancellation)
    HardFailure,
}

impl RunOutcome {
    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::PartialFailure => 2,
            RunOutcome::HardFailure => 1,
        }
    }
}

/// Per-state target counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    /// Targets in the catalog
    pub total: usize,
    /// Committed this run
    pub succeeded: usize,
    /// Gave up
    pub failed: usize,
    /// Already present
    pub skipped: usize,
    /// Never dispatched (run halted or cancelled)
    pub not_attempted: usize,
}

/// One failed target, as listed in the summary and CSV export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTarget {
    /// Catalog ordinal
    pub ordinal: usize,
    /// Variable
    pub variable: Variable,
    /// Resolution
    pub resolution: TemporalResolution,
    /// Period key
    pub period_key: String,
    /// Final error classification
    pub error_kind: ErrorKind,
    /// Final error detail
    pub detail: String,
    /// Attempts spent
    pub attempts: u32,
    /// Where the archive would have been written
    pub local_path: PathBuf,
}

/// CSV row of the failed-target export
#[derive(Debug, Serialize)]
struct FailedRow<'a> {
    variable: Variable,
    resolution: TemporalResolution,
    period_key: &'a str,
    error_kind: ErrorKind,
    detail: &'a str,
}

/// How the run ended, supplied by the orchestrator
#[derive(Debug, Clone, Default)]
pub struct RunTermination {
    /// External cancellation was requested
    pub cancelled: bool,
    /// Fatal error that halted dispatch
    pub fatal_error: Option<String>,
}

/// Stable summary of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: DateTime<Utc>,
    /// Target counts per state
    pub counts: StateCounts,
    /// Attempts across all targets
    pub total_attempts: u64,
    /// Bytes committed this run
    pub bytes_downloaded: u64,
    /// Failed targets ordered by catalog ordinal
    pub failed: Vec<FailedTarget>,
    /// Whether the run was cancelled
    pub cancelled: bool,
    /// Fatal error, if the run was halted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal_error: Option<String>,
    /// Overall result
    pub outcome: RunOutcome,
}

impl RunSummary {
    /// Summary of a run that had nothing to do
    pub fn empty(started_at: DateTime<Utc>) -> Self {
        OutcomeAggregator::with_start(0, started_at).finish(RunTermination::default())
    }

    /// Write the JSON summary atomically
    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| ReportError::SerializationError(e.to_string()))?;
        write_atomically(path, |file| {
            file.write_all(&json)
                .map_err(|e| ReportError::IoError(e.to_string()))
        })
    }

    /// Export failed targets as CSV (`variable,resolution,period_key,error_kind,detail`)
    pub fn write_failed_csv(&self, path: &Path) -> Result<(), ReportError> {
        write_atomically(path, |file| {
            let mut writer = csv::Writer::from_writer(file);
            for failed in &self.failed {
                writer
                    .serialize(FailedRow {
                        variable: failed.variable,
                        resolution: failed.resolution,
                        period_key: &failed.period_key,
                        error_kind: failed.error_kind,
                        detail: &failed.detail,
                    })
                    .map_err(|e| ReportError::SerializationError(e.to_string()))?;
            }
            writer
                .flush()
                .map_err(|e| ReportError::IoError(e.to_string()))
        })
    }

    /// Multi-line human-readable rendering
    pub fn render_human(&self) -> String {
        let mut lines = vec![
            format!(
                "Run {}: {} targets, {} succeeded, {} skipped, {} failed, {} not attempted",
                match self.outcome {
                    RunOutcome::Success => "succeeded",
                    RunOutcome::PartialFailure => "finished with failures",
                    RunOutcome::HardFailure => "stopped early",
                },
                self.counts.total,
                self.counts.succeeded,
                self.counts.skipped,
                self.counts.failed,
                self.counts.not_attempted
            ),
            format!(
                "  {} attempts, {:.1} MiB downloaded in {:.1}s",
                self.total_attempts,
                self.bytes_downloaded as f64 / (1024.0 * 1024.0),
                (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
            ),
        ];
        if let Some(fatal) = &self.fatal_error {
            lines.push(format!("  Fatal error: {fatal}"));
        }
        if self.cancelled {
            lines.push("  Cancelled by user; re-run the same request to resume".to_string());
        }
        for failed in &self.failed {
            lines.push(format!(
                "  [FAILED] {} {} {}: {} ({} attempts) {}",
                failed.variable,
                failed.resolution,
                failed.period_key,
                failed.error_kind,
                failed.attempts,
                failed.detail
            ));
        }
        lines.join("\n")
    }
}

fn write_atomically<F>(path: &Path, write: F) -> Result<(), ReportError>
where
    F: FnOnce(&mut std::fs::File) -> Result<(), ReportError>,
{
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| ReportError::IoError(e.to_string()))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| ReportError::IoError(format!("Failed to create temp file: {e}")))?;
    write(temp.as_file_mut())?;
    temp.as_file()
        .sync_all()
        .map_err(|e| ReportError::IoError(format!("Failed to sync temp file: {e}")))?;
    temp.persist(path)
        .map_err(|e| ReportError::IoError(format!("Failed to persist {}: {}", path.display(), e)))?;
    Ok(())
}

/// Single consumer of terminal target reports
#[derive(Debug)]
pub struct OutcomeAggregator {
    total: usize,
    started_at: DateTime<Utc>,
    reports: BTreeMap<usize, TargetReport>,
}

impl OutcomeAggregator {
    /// Aggregator for a catalog of `total` targets, starting now
    pub fn new(total: usize) -> Self {
        Self::with_start(total, Utc::now())
    }

    /// Aggregator with an explicit start time
    pub fn with_start(total: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            total,
            started_at,
            reports: BTreeMap::new(),
        }
    }

    /// Number of reports accepted so far
    pub fn reported(&self) -> usize {
        self.reports.len()
    }

    /// Accept one terminal report; duplicates and non-terminal states are rejected
    pub fn accept(&mut self, report: TargetReport) -> Result<(), ReportError> {
        let ordinal = report.target.ordinal;
        if !report.state.is_terminal() {
            warn!(ordinal, state = report.state.label(), "Rejected non-terminal target report");
            return Err(ReportError::NonTerminal {
                ordinal,
                state: report.state.label(),
            });
        }
        if self.reports.contains_key(&ordinal) {
            warn!(ordinal, target = %report.target, "Rejected duplicate target report");
            return Err(ReportError::DuplicateReport(ordinal));
        }

        debug!(target = %report.target, state = report.state.label(), "Target reached terminal state");
        metrics::record_target(report.state.label());
        self.reports.insert(ordinal, report);
        Ok(())
    }

    /// Build the summary
    pub fn finish(self, termination: RunTermination) -> RunSummary {
        let mut counts = StateCounts {
            total: self.total,
            ..StateCounts::default()
        };
        let mut total_attempts = 0u64;
        let mut bytes_downloaded = 0u64;
        let mut failed = Vec::new();

        for report in self.reports.values() {
            total_attempts += u64::from(report.attempts());
            match &report.state {
                TargetState::Skipped => counts.skipped += 1,
                TargetState::Succeeded { bytes, .. } => {
                    counts.succeeded += 1;
                    bytes_downloaded += bytes;
                }
                TargetState::Failed {
                    attempts,
                    error_kind,
                    detail,
                } => {
                    counts.failed += 1;
                    failed.push(FailedTarget {
                        ordinal: report.target.ordinal,
                        variable: report.target.variable,
                        resolution: report.target.temporal_resolution,
                        period_key: report.target.period_key.clone(),
                        error_kind: *error_kind,
                        detail: detail.clone(),
                        attempts: *attempts,
                        local_path: report.target.local_path.clone(),
                    });
                }
                _ => {}
            }
        }
        counts.not_attempted = self.total.saturating_sub(self.reports.len());

        let outcome = if termination.cancelled || termination.fatal_error.is_some() {
            RunOutcome::HardFailure
        } else if counts.failed > 0 || counts.not_attempted > 0 {
            RunOutcome::PartialFailure
        } else {
            RunOutcome::Success
        };

        RunSummary {
            started_at: self.started_at,
            finished_at: Utc::now(),
            counts,
            total_attempts,
            bytes_downloaded,
            failed,
            cancelled: termination.cancelled,
            fatal_error: termination.fatal_error,
            outcome,
        }
    }
}
