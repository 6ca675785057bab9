//! Transports and single-attempt fetching
//!
//! A [`Transport`] turns a URL into a streaming [`RemoteBody`]; it knows nothing about
//! targets, files or retries. The [`attempt::FetchExecutor`] drives one attempt for one
//! target over one transport and reports the result as an [`attempt::AttemptRecord`].
//!
//! Two transports are in play for every target: the PRISM web service (primary) and
//! the HTTP view of the archive tree (fallback). Both are plain HTTPS in production
//! and share the global client from [`shared_resources`].

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;

pub mod attempt;
pub mod http;
pub mod retry_formatter;
pub mod shared_resources;

pub use attempt::{AttemptOutcome, AttemptRecord, FetchExecutor};
pub use http::HttpTransport;
pub use retry_formatter::{ErrorKind, FailureClass, RetryContext};

/// Which remote source an attempt used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// PRISM web service
    Primary,
    /// Archive tree mirror
    Fallback,
}

impl TransportKind {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Primary => "primary",
            TransportKind::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Remote has no such archive (404/410)
    #[error("not found (HTTP {0})")]
    NotFound(u16),

    /// Any other non-success status
    #[error("HTTP status {0}")]
    Status(u16),

    /// Connect or request timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection refused, reset, DNS failure
    #[error("connection failed: {0}")]
    Connect(String),

    /// Body stream broke after headers arrived
    #[error("body stream error: {0}")]
    Body(String),

    /// Anything else reported by the HTTP stack
    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    /// Error kind recorded for this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::NotFound(_) => ErrorKind::NotFound,
            TransportError::Status(code) => ErrorKind::from_status(*code),
            TransportError::Timeout(_) => ErrorKind::Timeout,
            TransportError::Connect(_) => ErrorKind::Connection,
            TransportError::Body(_) => ErrorKind::BodyStream,
            TransportError::Network(_) => ErrorKind::Network,
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Stream of body chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = TransportResult<Bytes>> + Send>>;

/// An opened, successful response
pub struct RemoteBody {
    /// Declared body length, when the server sent one
    pub content_length: Option<u64>,
    /// Body chunks
    pub stream: ByteStream,
}

impl std::fmt::Debug for RemoteBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Opens remote archives as byte streams
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open `url`; succeeds only for a success status with a readable body to follow
    async fn open(&self, url: &str) -> TransportResult<RemoteBody>;
}

/// The primary/fallback transport pair used by a run
#[derive(Clone)]
pub struct Transports {
    primary: Arc<dyn Transport>,
    fallback: Arc<dyn Transport>,
}

impl Transports {
    /// Pair two transports
    pub fn new(primary: Arc<dyn Transport>, fallback: Arc<dyn Transport>) -> Self {
        Self { primary, fallback }
    }

    /// Production pair: one HTTP transport on the shared client for both roles
    pub fn http() -> Self {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new());
        Self::new(transport.clone(), transport)
    }

    /// Transport for `kind`
    pub fn get(&self, kind: TransportKind) -> &Arc<dyn Transport> {
        match kind {
            TransportKind::Primary => &self.primary,
            TransportKind::Fallback => &self.fallback,
        }
    }
}

impl Default for Transports {
    fn default() -> Self {
        Self::http()
    }
}

impl std::fmt::Debug for Transports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transports").finish_non_exhaustive()
    }
}
