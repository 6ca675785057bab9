//! HTTP transport on top of reqwest

use super::retry_formatter::extract_error_kind;
use super::shared_resources::global_http_client;
use super::{ErrorKind, RemoteBody, Transport, TransportError, TransportResult};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;

/// Streams archives over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Arc<Client>,
}

impl HttpTransport {
    /// Transport on the global shared client
    pub fn new() -> Self {
        Self {
            client: global_http_client(),
        }
    }

    /// Transport on a caller-provided client
    pub fn with_client(client: Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    match extract_error_kind(None, Some(&err)) {
        ErrorKind::Timeout => TransportError::Timeout(err.to_string()),
        ErrorKind::Connection => TransportError::Connect(err.to_string()),
        ErrorKind::BodyStream => TransportError::Body(err.to_string()),
        _ => TransportError::Network(err.to_string()),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, url: &str) -> TransportResult<RemoteBody> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        debug!(url, status = status.as_u16(), "HTTP response received");

        if !status.is_success() {
            return Err(match extract_error_kind(Some(status), None) {
                ErrorKind::NotFound => TransportError::NotFound(status.as_u16()),
                _ => TransportError::Status(status.as_u16()),
            });
        }

        let content_length = response.content_length();
        let stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| match map_reqwest_error(e) {
                TransportError::Timeout(msg) => TransportError::Timeout(msg),
                other => TransportError::Body(other.to_string()),
            })
        });

        Ok(RemoteBody {
            content_length,
            stream: Box::pin(stream),
        })
    }
}
