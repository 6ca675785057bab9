//! Error classification and retry message formatting.
//!
//! Every failed attempt is reduced to an [`ErrorKind`]. The kind decides whether the
//! retry loop keeps going ([`FailureClass`]) and supplies the wording for the
//! human-readable retry and failure messages built by [`RetryContext`].

use reqwest::{Error as ReqwestError, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::TransportKind;

/// How the retry loop treats a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth another attempt
    Transient,
    /// Recorded against the target; the run continues
    Permanent,
    /// Stops the whole run
    Fatal,
}

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// HTTP 404/410: the archive does not exist upstream
    NotFound,
    /// Other HTTP 4xx (except 429)
    ClientError,
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx
    ServerError,
    /// Connect or request timeout
    Timeout,
    /// Connection refused, reset or DNS failure
    Connection,
    /// Body stream broke mid-transfer
    BodyStream,
    /// Body length differed from the declared content length
    SizeMismatch,
    /// Body was not a readable ZIP archive
    InvalidArchive,
    /// Local filesystem failure (directory, temp file, write, rename)
    LocalResource,
    /// Run was cancelled before the target finished
    Cancelled,
    /// Unclassified network error
    Network,
}

impl ErrorKind {
    /// Kind for a non-success HTTP status
    pub fn from_status(code: u16) -> Self {
        match code {
            404 | 410 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::ServerError,
            400..=499 => ErrorKind::ClientError,
            _ => ErrorKind::Network,
        }
    }

    /// How the retry loop treats this kind
    pub fn class(&self) -> FailureClass {
        match self {
            ErrorKind::NotFound | ErrorKind::ClientError | ErrorKind::Cancelled => {
                FailureClass::Permanent
            }
            ErrorKind::LocalResource => FailureClass::Fatal,
            ErrorKind::RateLimited
            | ErrorKind::ServerError
            | ErrorKind::Timeout
            | ErrorKind::Connection
            | ErrorKind::BodyStream
            | ErrorKind::SizeMismatch
            | ErrorKind::InvalidArchive
            | ErrorKind::Network => FailureClass::Transient,
        }
    }

    /// Whether another attempt may help
    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    /// Stable snake_case name used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::ClientError => "client_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection",
            ErrorKind::BodyStream => "body_stream",
            ErrorKind::SizeMismatch => "size_mismatch",
            ErrorKind::InvalidArchive => "invalid_archive",
            ErrorKind::LocalResource => "local_resource",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Network => "network",
        }
    }

    /// User-friendly description used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "archive not found",
            ErrorKind::ClientError => "request rejected",
            ErrorKind::RateLimited => "rate limit exceeded",
            ErrorKind::ServerError => "server error",
            ErrorKind::Timeout => "network timeout",
            ErrorKind::Connection => "connection failed",
            ErrorKind::BodyStream => "transfer interrupted",
            ErrorKind::SizeMismatch => "incomplete transfer",
            ErrorKind::InvalidArchive => "response was not a ZIP archive",
            ErrorKind::LocalResource => "local filesystem error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Network => "network error",
        }
    }

    /// Suggested remediation presented after failures.
    pub fn suggestion(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => {
                "The period may not be published yet or may be listed under another stability code"
            }
            ErrorKind::ClientError => "Check the base URLs and resolution arguments",
            ErrorKind::RateLimited => "Lower --concurrency or raise --politeness-ms",
            ErrorKind::ServerError => "PRISM may be experiencing issues, try again later",
            ErrorKind::Timeout => "Check your network connection and firewall settings",
            ErrorKind::Connection => "Verify internet connectivity and DNS resolution",
            ErrorKind::BodyStream | ErrorKind::SizeMismatch => {
                "Re-run the same request; only missing archives are fetched again"
            }
            ErrorKind::InvalidArchive => {
                "The service may be refusing repeated downloads of the same file; wait before retrying"
            }
            ErrorKind::LocalResource => "Check free disk space and permissions on the output directory",
            ErrorKind::Cancelled => "Re-run the same request to finish the remaining archives",
            ErrorKind::Network => "Check network connectivity and try again",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract an [`ErrorKind`] from an HTTP status or reqwest error.
pub fn extract_error_kind(status: Option<StatusCode>, err: Option<&ReqwestError>) -> ErrorKind {
    if let Some(status) = status {
        if !status.is_success() {
            return ErrorKind::from_status(status.as_u16());
        }
    }

    if let Some(err) = err {
        if let Some(status) = err.status() {
            return ErrorKind::from_status(status.as_u16());
        }
        if err.is_timeout() {
            return ErrorKind::Timeout;
        }
        if err.is_connect() {
            return ErrorKind::Connection;
        }
        if err.is_body() || err.is_decode() {
            return ErrorKind::BodyStream;
        }
    }

    ErrorKind::Network
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt that just failed (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered retry
    pub error_kind: ErrorKind,
    /// Backoff duration until next attempt
    pub backoff_duration: Duration,
    /// Target label, e.g. `ppt/monthly/197101`
    pub target: String,
    /// Transport used by the failed attempt
    pub transport: TransportKind,
    /// Transport the next attempt will use
    pub next_transport: TransportKind,
    /// Original error message for details
    pub error_message: String,
    /// URL that failed
    pub endpoint: String,
}

impl RetryContext {
    /// Format standardized retry message with attempt counters and context.
    pub fn format_retry(&self) -> String {
        let mut message = format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds... ({})",
            self.attempt + 1,
            self.max_attempts,
            self.error_kind.description(),
            self.backoff_duration.as_secs_f64(),
            self.target
        );
        if self.next_transport != self.transport {
            message.push_str(&format!(" switching to {} source", self.next_transport));
        }
        message
    }

    /// Format final failure summary with actionable suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "[FAILED] {} failed after {} attempt{}",
            self.target,
            self.attempt,
            if self.attempt == 1 { "" } else { "s" }
        ));
        lines.push(format!("  Last error: {}", self.error_message));
        lines.push(format!("  Source: {} ({})", self.transport, self.endpoint));
        lines.push("  Suggestions:".to_string());

        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }

        lines.join("\n")
    }

    /// Derive suggestions tailored to the current retry context.
    pub fn format_suggestions(&self) -> Vec<String> {
        let mut suggestions = vec![self.error_kind.suggestion().to_string()];
        if self.error_kind.is_retryable() {
            suggestions.push(format!(
                "Try increasing --max-attempts (current: {})",
                self.max_attempts
            ));
        }
        suggestions
    }
}
