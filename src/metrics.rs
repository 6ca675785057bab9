//! Production observability metrics for PRISM bulk downloads
//!
//! ## Architecture
//!
//! - Uses `metrics` crate for low-overhead metric collection
//! - Optional Prometheus exporter for a scrape endpoint (`--metrics-addr`)
//! - Without an installed recorder every macro below is a no-op

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Counter: attempts by transport and outcome
pub const ATTEMPTS_TOTAL: &str = "prism_attempts_total";
/// Counter: terminal target states
pub const TARGETS_TOTAL: &str = "prism_targets_total";
/// Counter: committed bytes
pub const BYTES_DOWNLOADED_TOTAL: &str = "prism_bytes_downloaded_total";
/// Histogram: attempt wall time
pub const ATTEMPT_DURATION_SECONDS: &str = "prism_attempt_duration_seconds";
/// Histogram: backoff sleeps
pub const BACKOFF_DURATION_SECONDS: &str = "prism_backoff_duration_seconds";
/// Gauge: targets currently being worked on
pub const TARGETS_IN_FLIGHT: &str = "prism_targets_in_flight";

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Metrics initialization errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be installed (port in use, recorder already set)
    #[error("failed to install Prometheus exporter: {0}")]
    Install(String),
}

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: later calls are ignored once an exporter is installed.
///
/// # Arguments
/// * `addr` - Socket address to bind the scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    describe_counter!(
        ATTEMPTS_TOTAL,
        Unit::Count,
        "Fetch attempts by transport and outcome"
    );
    describe_counter!(
        TARGETS_TOTAL,
        Unit::Count,
        "Targets reaching a terminal state"
    );
    describe_counter!(
        BYTES_DOWNLOADED_TOTAL,
        Unit::Bytes,
        "Bytes committed to the archive tree"
    );
    describe_histogram!(
        ATTEMPT_DURATION_SECONDS,
        Unit::Seconds,
        "Wall time of a single fetch attempt"
    );
    describe_histogram!(
        BACKOFF_DURATION_SECONDS,
        Unit::Seconds,
        "Backoff delay slept before a retry"
    );
    describe_gauge!(
        TARGETS_IN_FLIGHT,
        Unit::Count,
        "Targets currently held by a worker lane"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Record one finished attempt
pub fn record_attempt(transport: &'static str, outcome: &'static str, elapsed: Duration, bytes: u64) {
    counter!(ATTEMPTS_TOTAL, "transport" => transport, "outcome" => outcome).increment(1);
    histogram!(ATTEMPT_DURATION_SECONDS, "transport" => transport).record(elapsed.as_secs_f64());
    if bytes > 0 {
        counter!(BYTES_DOWNLOADED_TOTAL).increment(bytes);
    }
}

/// Record a backoff sleep before a retry
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    histogram!(BACKOFF_DURATION_SECONDS).record(duration.as_secs_f64());
    debug!(
        backoff_ms = duration.as_millis() as u64,
        attempt, "Recorded retry backoff"
    );
}

/// Record a target reaching a terminal state
pub fn record_target(state: &'static str) {
    counter!(TARGETS_TOTAL, "state" => state).increment(1);
}

/// Raises the in-flight gauge while alive
#[derive(Debug)]
pub struct InFlightGuard(());

impl InFlightGuard {
    /// Mark one more target as in flight
    pub fn enter() -> Self {
        gauge!(TARGETS_IN_FLIGHT).increment(1.0);
        Self(())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(TARGETS_IN_FLIGHT).decrement(1.0);
    }
}
