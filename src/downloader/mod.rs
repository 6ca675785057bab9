//! Download orchestration
//!
//! This module turns a validated catalog into concurrent, retried, resumable fetches.
//!
//! # Overview
//!
//! 1. **Lifecycle**: every target moves through [`job::TargetState`]
//! 2. **Retry**: [`retry::RetryRunner`] runs attempts with capped exponential backoff
//!    and switches to the fallback transport after repeated primary failures
//! 3. **Pacing**: each lane waits out [`rate_limit::LanePacer`] between requests
//! 4. **Concurrency**: [`pool::WorkerPool`] runs a fixed number of lanes over a shared queue
//! 5. **Orchestration**: [`executor::DownloadExecutor`] ties catalog, resume filter,
//!    pool, manifest and reporting together
//!
//! # Quick Start
//!
//! ```no_run
//! use prism_bulk_downloader::catalog::RetrievalRequest;
//! use prism_bulk_downloader::downloader::{DownloadExecutor, RetryConfig};
//! use prism_bulk_downloader::shutdown::ShutdownCoordinator;
//! use prism_bulk_downloader::{TemporalResolution, Variable};
//! use chrono::NaiveDate;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let request = RetrievalRequest::new(
//!     NaiveDate::from_ymd_opt(2001, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2001, 1, 31).unwrap(),
//!     vec![Variable::Tmax],
//!     TemporalResolution::Daily,
//!     "./prism_data",
//! )
//! .with_concurrency(2);
//!
//! let executor = DownloadExecutor::new()
//!     .with_retry_config(RetryConfig::new(8))
//!     .with_shutdown(ShutdownCoordinator::shared());
//! let summary = executor.execute(request).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Target-scoped failures (not found, exhausted retries) land in the
//! [`RunSummary`](crate::report::RunSummary) and never surface as `Err`. Only
//! run-scoped conditions do: invalid requests, a locked output root, local filesystem
//! failures and cancellation. The last two carry the partial summary.

pub mod config;
pub mod executor;
pub mod job;
pub mod pool;
pub mod rate_limit;
pub mod retry;

pub use config::{PoolConfig, RetryConfig};
pub use executor::{DownloadExecutor, DownloadPlan};
pub use job::{TargetReport, TargetState};
pub use pool::{PoolOutcome, WorkerPool};
pub use rate_limit::LanePacer;
pub use retry::RetryRunner;

use crate::catalog::ConfigurationError;
use crate::report::{ReportError, RunSummary};
use crate::resume::ResumeError;

/// Run-level download errors
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Request failed validation; nothing was fetched
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Another run holds the output root
    #[error("output directory {} is in use by another run", .0.display())]
    Locked(std::path::PathBuf),

    /// Resume state error
    #[error("resume error: {0}")]
    Resume(ResumeError),

    /// Attempt log could not be opened
    #[error("report error: {0}")]
    Report(#[from] ReportError),

    /// Local filesystem failure halted the run
    #[error("local filesystem error halted the run: {detail}")]
    LocalResource {
        /// What failed
        detail: String,
        /// Partial summary
        summary: Box<RunSummary>,
    },

    /// Run was cancelled
    #[error("download cancelled")]
    Cancelled {
        /// Partial summary
        summary: Box<RunSummary>,
    },

    /// A blocking task panicked or was cancelled
    #[error("background task failed: {0}")]
    TaskError(String),
}

impl From<ResumeError> for DownloadError {
    fn from(err: ResumeError) -> Self {
        match err {
            ResumeError::Locked(path) => DownloadError::Locked(path),
            other => DownloadError::Resume(other),
        }
    }
}

impl DownloadError {
    /// Partial summary carried by fatal and cancelled runs
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            DownloadError::LocalResource { summary, .. } | DownloadError::Cancelled { summary } => {
                Some(summary)
            }
            _ => None,
        }
    }
}
