//! CLI error types and conversions

use crate::downloader::DownloadError;
use crate::metrics::MetricsError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Download error
    #[error("download error: {0}")]
    DownloadError(DownloadError),

    /// Metrics exporter could not start
    #[error("metrics error: {0}")]
    MetricsError(#[from] MetricsError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Request failed validation
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

impl From<DownloadError> for CliError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::Configuration(e) => CliError::ConfigurationError(e.to_string()),
            other => CliError::DownloadError(other),
        }
    }
}
