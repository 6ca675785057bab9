//! Run orchestration
//!
//! [`DownloadExecutor::execute`] is the whole pipeline for one request:
//!
//! 1. Build and validate the catalog (fails before any I/O)
//! 2. Take the run lock on the output root
//! 3. Load the download manifest and sweep abandoned temp files
//! 4. Partition targets with the resume filter
//! 5. Run the worker pool, aggregating reports as they arrive
//! 6. Merge successes into the manifest and save it (always, even on fatal/cancel)
//! 7. Optionally extract committed archives, then write the summary files

use super::config::{PoolConfig, RetryConfig, MIN_FILE_SIZE};
use super::job::{TargetReport, TargetState};
use super::pool::{PoolOutcome, WorkerPool};
use super::retry::RetryRunner;
use super::DownloadError;
use crate::catalog::{build_catalog, RetrievalRequest, RetrievalTarget};
use crate::fetcher::{FetchExecutor, Transports};
use crate::output::extract_archive;
use crate::report::{
    AttemptSink, JsonLinesSink, OutcomeAggregator, RunSummary, RunTermination,
    ATTEMPT_LOG_FILE_NAME, FAILED_TARGETS_FILE_NAME, SUMMARY_FILE_NAME,
};
use crate::resume::{sweep_temp_files, DownloadManifest, ManifestEntry, ResumeFilter, RunLock};
use crate::shutdown::{SharedShutdown, ShutdownCoordinator};
use chrono::Utc;
use indicatif::ProgressBar;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};

/// Dry-run result: what a request would fetch
#[derive(Debug, Clone, Serialize)]
pub struct DownloadPlan {
    /// Every target in catalog order
    pub targets: Vec<RetrievalTarget>,
    /// Targets that would be fetched
    pub pending: usize,
    /// Targets already present
    pub skipped: usize,
}

/// Download executor orchestrates the complete download workflow
pub struct DownloadExecutor {
    retry: RetryConfig,
    pool: PoolConfig,
    transports: Transports,
    shutdown: Option<SharedShutdown>,
    attempt_sink: Option<Arc<dyn AttemptSink>>,
    attempt_log_path: Option<PathBuf>,
    min_file_size: u64,
    verify_checksums: bool,
    verify_archive: bool,
    extract: bool,
    write_reports: bool,
    progress: Option<ProgressBar>,
}

impl Default for DownloadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadExecutor {
    /// Executor with default retry/pool settings over HTTP
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            pool: PoolConfig::default(),
            transports: Transports::default(),
            shutdown: None,
            attempt_sink: None,
            attempt_log_path: None,
            min_file_size: MIN_FILE_SIZE,
            verify_checksums: false,
            verify_archive: true,
            extract: false,
            write_reports: true,
            progress: None,
        }
    }

    /// Set retry/backoff parameters
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set pool parameters (lane count is taken from the request)
    pub fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Replace the transports (tests, custom clients)
    pub fn with_transports(mut self, transports: Transports) -> Self {
        self.transports = transports;
        self
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Send attempt records to `sink` instead of the default JSON-lines file
    pub fn with_attempt_sink(mut self, sink: Arc<dyn AttemptSink>) -> Self {
        self.attempt_sink = Some(sink);
        self
    }

    /// Write the JSON-lines attempt log to `path` instead of the output root
    pub fn with_attempt_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.attempt_log_path = Some(path.into());
        self
    }

    /// Minimum size for an existing file to count as present
    pub fn with_min_file_size(mut self, min_file_size: u64) -> Self {
        self.min_file_size = min_file_size;
        self
    }

    /// Re-hash files known to the manifest before skipping them
    pub fn with_checksum_verification(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Toggle the ZIP check before commit
    pub fn with_archive_verification(mut self, verify: bool) -> Self {
        self.verify_archive = verify;
        self
    }

    /// Unpack archives after they are committed
    pub fn with_extraction(mut self, extract: bool) -> Self {
        self.extract = extract;
        self
    }

    /// Toggle writing `download_summary.json` / `failed_targets.csv`
    pub fn with_report_files(mut self, write_reports: bool) -> Self {
        self.write_reports = write_reports;
        self
    }

    /// Drive `progress` from finished targets
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Build the catalog and resume partition without fetching or locking
    pub async fn plan(&self, request: &RetrievalRequest) -> Result<DownloadPlan, DownloadError> {
        let targets = build_catalog(request)?;
        let manifest = DownloadManifest::load_or_default(&DownloadManifest::path_for(&request.output_root));
        let mut filter = self.resume_filter(request, manifest);

        tokio::task::spawn_blocking(move || {
            let mut pending = 0;
            let mut skipped = 0;
            for target in &targets {
                if filter.is_satisfied(target) {
                    skipped += 1;
                } else {
                    pending += 1;
                }
            }
            DownloadPlan {
                targets,
                pending,
                skipped,
            }
        })
        .await
        .map_err(|e| DownloadError::TaskError(e.to_string()))
    }

    /// Run `request` to completion
    pub async fn execute(&self, request: RetrievalRequest) -> Result<RunSummary, DownloadError> {
        let span = tracing::info_span!(
            "run",
            resolution = %request.temporal_resolution,
            start = %request.date_start,
            end = %request.date_end,
            output = %request.output_root.display(),
        );
        self.execute_inner(request).instrument(span).await
    }

    async fn execute_inner(&self, request: RetrievalRequest) -> Result<RunSummary, DownloadError> {
        let started_at = Utc::now();
        let targets = build_catalog(&request)?;
        info!(targets = targets.len(), "Catalog built");

        let _lock = RunLock::try_acquire(&request.output_root)?;
        let manifest_path = DownloadManifest::path_for(&request.output_root);
        let manifest = DownloadManifest::load_or_default(&manifest_path);

        let mut aggregator = OutcomeAggregator::with_start(targets.len(), started_at);
        let mut filter = self.resume_filter(&request, manifest);
        let (filter, partition) = tokio::task::spawn_blocking(move || {
            let swept = sweep_temp_files(&targets);
            if swept > 0 {
                info!(swept, "Removed temp files left by an interrupted run");
            }
            let partition = filter.partition(targets);
            (filter, partition)
        })
        .await
        .map_err(|e| DownloadError::TaskError(e.to_string()))?;
        let mut manifest = filter.into_manifest();

        info!(
            pending = partition.pending.len(),
            skipped = partition.skipped.len(),
            "Resume filter applied"
        );
        for target in partition.skipped {
            let report = TargetReport {
                target,
                state: TargetState::Skipped,
            };
            if let Err(e) = aggregator.accept(report) {
                warn!(error = %e, "Skipped target not recorded");
            }
        }

        let mut committed = Vec::new();
        let mut pool_outcome = PoolOutcome::default();

        if !partition.pending.is_empty() {
            let sink = self.attempt_sink(&request)?;
            let shutdown = self
                .shutdown
                .clone()
                .unwrap_or_else(ShutdownCoordinator::shared);
            let fetcher = FetchExecutor::new(self.transports.clone())
                .with_archive_verification(self.verify_archive);
            let runner =
                RetryRunner::new(fetcher, self.retry.clone(), sink).with_shutdown(shutdown.clone());
            let mut pool_config = self.pool.clone();
            pool_config.max_concurrency = request.max_concurrency;
            let mut pool = WorkerPool::new(pool_config, runner, shutdown);
            if let Some(progress) = &self.progress {
                progress.set_length(partition.pending.len() as u64);
                pool = pool.with_progress(progress.clone());
            }

            let (tx, mut rx) = mpsc::unbounded_channel::<TargetReport>();
            let output_root = request.output_root.clone();
            let consume = async {
                while let Some(report) = rx.recv().await {
                    if let TargetState::Succeeded { bytes, sha256, .. } = &report.state {
                        if let Some(key) =
                            DownloadManifest::relative_key(&output_root, &report.target.local_path)
                        {
                            manifest.record(
                                key,
                                ManifestEntry {
                                    bytes: *bytes,
                                    sha256: sha256.clone(),
                                    completed_at: Utc::now(),
                                },
                            );
                        }
                        committed.push(report.target.local_path.clone());
                    }
                    if let Err(e) = aggregator.accept(report) {
                        debug!(error = %e, "Report rejected by aggregator");
                    }
                }
            };

            let (outcome, ()) = tokio::join!(pool.run(partition.pending, tx), consume);
            pool_outcome = outcome;
            if let Some(progress) = &self.progress {
                progress.finish_and_clear();
            }
        }

        let manifest_result = tokio::task::spawn_blocking({
            let manifest_path = manifest_path.clone();
            move || manifest.save(&manifest_path)
        })
        .await;
        match manifest_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Failed to save download manifest"),
            Err(e) => error!(error = %e, "Manifest save task failed"),
        }

        if self.extract && !committed.is_empty() {
            extract_all(committed).await;
        }

        let summary = aggregator.finish(RunTermination {
            cancelled: pool_outcome.cancelled,
            fatal_error: pool_outcome.fatal_error.clone(),
        });
        if self.write_reports {
            write_report_files(&request, &summary).await;
        }

        info!(
            outcome = ?summary.outcome,
            succeeded = summary.counts.succeeded,
            skipped = summary.counts.skipped,
            failed = summary.counts.failed,
            not_attempted = summary.counts.not_attempted,
            attempts = summary.total_attempts,
            bytes = summary.bytes_downloaded,
            "Run finished"
        );

        if let Some(detail) = pool_outcome.fatal_error {
            return Err(DownloadError::LocalResource {
                detail,
                summary: Box::new(summary),
            });
        }
        if pool_outcome.cancelled {
            return Err(DownloadError::Cancelled {
                summary: Box::new(summary),
            });
        }
        Ok(summary)
    }

    fn resume_filter(&self, request: &RetrievalRequest, manifest: DownloadManifest) -> ResumeFilter {
        ResumeFilter::new(request.output_root.clone(), manifest)
            .with_min_file_size(self.min_file_size)
            .with_checksum_verification(self.verify_checksums)
    }

    fn attempt_sink(&self, request: &RetrievalRequest) -> Result<Arc<dyn AttemptSink>, DownloadError> {
        if let Some(sink) = &self.attempt_sink {
            return Ok(sink.clone());
        }
        let path = self
            .attempt_log_path
            .clone()
            .unwrap_or_else(|| request.output_root.join(ATTEMPT_LOG_FILE_NAME));
        Ok(Arc::new(JsonLinesSink::open(path)?))
    }
}

async fn extract_all(archives: Vec<PathBuf>) {
    let result = tokio::task::spawn_blocking(move || {
        for archive in &archives {
            match extract_archive(archive) {
                Ok(files) => debug!(archive = %archive.display(), files = files.len(), "Archive extracted"),
                Err(e) => warn!(archive = %archive.display(), error = %e, "Archive extraction failed"),
            }
        }
        archives.len()
    })
    .await;
    match result {
        Ok(count) => info!(archives = count, "Extraction finished"),
        Err(e) => warn!(error = %e, "Extraction task failed"),
    }
}

async fn write_report_files(request: &RetrievalRequest, summary: &RunSummary) {
    let summary_path = request.output_root.join(SUMMARY_FILE_NAME);
    let failed_path = request.output_root.join(FAILED_TARGETS_FILE_NAME);
    let summary = summary.clone();

    let result = tokio::task::spawn_blocking(move || {
        summary.write_json(&summary_path)?;
        if summary.failed.is_empty() {
            match std::fs::remove_file(&failed_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(error = %e, "Failed to remove stale failed-target list"),
            }
        } else {
            summary.write_failed_csv(&failed_path)?;
        }
        Ok::<_, crate::report::ReportError>(())
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Failed to write run report files"),
        Err(e) => warn!(error = %e, "Report task failed"),
    }
}
