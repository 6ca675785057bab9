//! Single fetch attempt with atomic commit
//!
//! One attempt streams a response body into a `.prism-*.part` temp file next to the
//! target's final path, hashing as it goes. The temp file is renamed into place only
//! after the length and archive checks pass. Every other exit path, including the
//! attempt future being dropped on cancellation, drops the temp handle and with it
//! the file, so a partial download never appears at the final path.

use super::{ErrorKind, TransportKind, Transports};
use crate::catalog::RetrievalTarget;
use crate::downloader::config::MIN_FILE_SIZE;
use crate::output::{verify_archive, TEMP_PREFIX, TEMP_SUFFIX};
use crate::resume::state::sync_directory;
use crate::{metrics, TemporalResolution, Variable};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::BufReader;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Result class of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// File committed at its final path
    Success,
    /// Worth retrying
    TransientFailure,
    /// Retrying will not help (or must not happen)
    PermanentFailure,
}

impl AttemptOutcome {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::TransientFailure => "transient_failure",
            AttemptOutcome::PermanentFailure => "permanent_failure",
        }
    }
}

/// One line of the attempt log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
    /// Catalog ordinal of the target
    pub ordinal: usize,
    /// Target variable
    pub variable: Variable,
    /// Target resolution
    pub temporal_resolution: TemporalResolution,
    /// Target period key
    pub period_key: String,
    /// 1-based attempt number
    pub attempt_number: u32,
    /// Source used
    pub transport: TransportKind,
    /// URL requested
    pub url: String,
    /// Result class
    pub outcome: AttemptOutcome,
    /// Failure classification, absent on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Failure detail, absent on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Bytes received
    pub bytes: u64,
    /// SHA-256 of the committed file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Wall time of the attempt in milliseconds
    pub elapsed_ms: u64,
    /// Backoff slept before this attempt in milliseconds
    pub backoff_ms: u64,
}

impl AttemptRecord {
    fn new(target: &RetrievalTarget, attempt_number: u32, transport: TransportKind, url: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            ordinal: target.ordinal,
            variable: target.variable,
            temporal_resolution: target.temporal_resolution,
            period_key: target.period_key.clone(),
            attempt_number,
            transport,
            url: url.to_string(),
            outcome: AttemptOutcome::PermanentFailure,
            error_kind: None,
            detail: None,
            bytes: 0,
            sha256: None,
            elapsed_ms: 0,
            backoff_ms: 0,
        }
    }

    /// Set the backoff that preceded this attempt
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Whether the attempt committed its file
    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

/// Failure inside an attempt before it is turned into a record
struct AttemptFailure {
    kind: ErrorKind,
    detail: String,
    bytes: u64,
}

impl AttemptFailure {
    fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            bytes: 0,
        }
    }

    fn local(context: &str, err: impl std::fmt::Display) -> Self {
        Self::new(ErrorKind::LocalResource, format!("{context}: {err}"))
    }

    fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = bytes;
        self
    }
}

struct Committed {
    bytes: u64,
    sha256: String,
}

/// Runs one attempt for one target over one transport
#[derive(Debug, Clone)]
pub struct FetchExecutor {
    transports: Transports,
    verify_archive: bool,
}

impl FetchExecutor {
    /// Executor over `transports` with archive verification enabled
    pub fn new(transports: Transports) -> Self {
        Self {
            transports,
            verify_archive: true,
        }
    }

    /// Toggle the ZIP integrity check before commit
    pub fn with_archive_verification(mut self, verify: bool) -> Self {
        self.verify_archive = verify;
        self
    }

    /// Fetch `target` once over `transport`
    pub async fn attempt(
        &self,
        target: &RetrievalTarget,
        transport: TransportKind,
        attempt_number: u32,
    ) -> AttemptRecord {
        let url = match transport {
            TransportKind::Primary => target.primary_url.as_str(),
            TransportKind::Fallback => target.fallback_url.as_str(),
        };
        let mut record = AttemptRecord::new(target, attempt_number, transport, url);
        let started = Instant::now();

        match self.fetch_and_commit(target, transport, url).await {
            Ok(committed) => {
                record.outcome = AttemptOutcome::Success;
                record.bytes = committed.bytes;
                record.sha256 = Some(committed.sha256);
            }
            Err(failure) => {
                record.outcome = if failure.kind.is_retryable() {
                    AttemptOutcome::TransientFailure
                } else {
                    AttemptOutcome::PermanentFailure
                };
                record.error_kind = Some(failure.kind);
                record.detail = Some(failure.detail);
                record.bytes = failure.bytes;
            }
        }

        let elapsed = started.elapsed();
        record.elapsed_ms = elapsed.as_millis() as u64;
        record.timestamp = Utc::now();

        let committed_bytes = if record.is_success() { record.bytes } else { 0 };
        metrics::record_attempt(transport.as_str(), record.outcome.as_str(), elapsed, committed_bytes);
        debug!(
            target = %target,
            transport = %transport,
            attempt = attempt_number,
            outcome = record.outcome.as_str(),
            bytes = record.bytes,
            elapsed_ms = record.elapsed_ms,
            "Attempt finished"
        );

        record
    }

    async fn fetch_and_commit(
        &self,
        target: &RetrievalTarget,
        transport: TransportKind,
        url: &str,
    ) -> Result<Committed, AttemptFailure> {
        let mut body = self
            .transports
            .get(transport)
            .open(url)
            .await
            .map_err(|e| AttemptFailure::new(e.kind(), e.to_string()))?;

        let dir = target
            .local_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AttemptFailure::local("create directory", e))?;

        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(&dir)
            .map_err(|e| AttemptFailure::local("create temp file", e))?;
        let std_file = temp
            .as_file()
            .try_clone()
            .map_err(|e| AttemptFailure::local("open temp file", e))?;
        let mut file = tokio::fs::File::from_std(std_file);

        let mut hasher = Sha256::new();
        let mut written: u64 = 0;
        while let Some(chunk) = body.stream.next().await {
            let chunk = chunk
                .map_err(|e| AttemptFailure::new(e.kind(), e.to_string()).with_bytes(written))?;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| AttemptFailure::local("write temp file", e).with_bytes(written))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| AttemptFailure::local("flush temp file", e))?;
        file.sync_all()
            .await
            .map_err(|e| AttemptFailure::local("sync temp file", e))?;
        drop(file);

        if let Some(expected) = body.content_length {
            if expected != written {
                return Err(AttemptFailure::new(
                    ErrorKind::SizeMismatch,
                    format!("expected {expected} bytes, received {written}"),
                )
                .with_bytes(written));
            }
        }

        if written < MIN_FILE_SIZE {
            return Err(AttemptFailure::new(ErrorKind::InvalidArchive, "empty response body"));
        }

        let temp = if self.verify_archive {
            check_archive(temp).await.map_err(|f| f.with_bytes(written))?
        } else {
            temp
        };

        let local_path = target.local_path.clone();
        tokio::task::spawn_blocking(move || commit(temp, &local_path))
            .await
            .map_err(|e| AttemptFailure::local("commit task", e))??;

        Ok(Committed {
            bytes: written,
            sha256: format!("{:x}", hasher.finalize()),
        })
    }
}

async fn check_archive(temp: NamedTempFile) -> Result<NamedTempFile, AttemptFailure> {
    let (temp, verdict) = tokio::task::spawn_blocking(move || {
        let verdict = temp
            .reopen()
            .map_err(|e| AttemptFailure::local("reopen temp file", e))
            .and_then(|file| {
                verify_archive(BufReader::new(file))
                    .map_err(|e| AttemptFailure::new(ErrorKind::InvalidArchive, e.to_string()))
            });
        (temp, verdict)
    })
    .await
    .map_err(|e| AttemptFailure::local("archive check task", e))?;

    verdict.map(|_| temp)
}

fn commit(temp: NamedTempFile, local_path: &Path) -> Result<(), AttemptFailure> {
    let persisted = temp
        .persist(local_path)
        .map_err(|e| AttemptFailure::local("rename into place", e.error))?;
    drop(persisted);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(local_path, std::fs::Permissions::from_mode(0o644));
    }

    if let Some(parent) = local_path.parent() {
        sync_directory(parent);
    }
    Ok(())
}
