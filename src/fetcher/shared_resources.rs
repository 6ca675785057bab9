//! Shared resources for all transport instances
//!
//! One process-wide HTTP client keeps connection pooling effective across worker
//! lanes: every lane talks to the same two hosts, so reusing TLS sessions matters
//! more than isolating lanes from one another.

use once_cell::sync::Lazy;
use reqwest::Client;
use std::sync::Arc;

use crate::downloader::config::{CONNECT_TIMEOUT, REQUEST_TIMEOUT};

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("prism-bulk-downloader/", env!("CARGO_PKG_VERSION"));

/// Global HTTP client shared by all transports
///
/// Configured with explicit timeouts to prevent indefinite hangs:
/// - Connect timeout: 10 seconds
/// - Request timeout: 300 seconds (covers the body of large 800m bundles)
pub static GLOBAL_HTTP_CLIENT: Lazy<Arc<Client>> = Lazy::new(|| {
    Arc::new(
        Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|e| {
                panic!("FATAL: Failed to build HTTP client: {}. Check system TLS configuration.", e);
            }),
    )
});

/// Get the global HTTP client
///
/// Returns a clone of the Arc, which is cheap (just increments ref count)
pub fn global_http_client() -> Arc<Client> {
    GLOBAL_HTTP_CLIENT.clone()
}
