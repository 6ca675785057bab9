//! Retry loop around the fetch executor
//!
//! Runs attempts for one target until it succeeds, fails permanently, exhausts its
//! attempt budget or the run is cancelled. Transport selection follows the
//! [`RetryConfig`]: attempts start on the primary service and move to the fallback
//! archive tree after `fallback_after` consecutive transient primary failures.

use super::config::RetryConfig;
use super::job::{TargetReport, TargetState};
use super::rate_limit::LanePacer;
use crate::catalog::RetrievalTarget;
use crate::fetcher::{
    AttemptOutcome, AttemptRecord, ErrorKind, FetchExecutor, RetryContext, TransportKind,
};
use crate::metrics;
use crate::report::AttemptSink;
use crate::shutdown::SharedShutdown;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

/// Drives the attempts for single targets
#[derive(Clone)]
pub struct RetryRunner {
    fetcher: FetchExecutor,
    config: RetryConfig,
    sink: Arc<dyn AttemptSink>,
    shutdown: Option<SharedShutdown>,
}

impl RetryRunner {
    /// Create a runner
    pub fn new(fetcher: FetchExecutor, config: RetryConfig, sink: Arc<dyn AttemptSink>) -> Self {
        Self {
            fetcher,
            config,
            sink,
            shutdown: None,
        }
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Retry configuration in use
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Work `target` to a terminal state
    pub async fn run(&self, target: RetrievalTarget, pacer: &mut LanePacer) -> TargetReport {
        let span = tracing::info_span!(
            "target",
            variable = %target.variable,
            resolution = %target.temporal_resolution,
            period = %target.period_key,
        );
        let state = self.run_attempts(&target, pacer).instrument(span).await;
        TargetReport { target, state }
    }

    async fn run_attempts(&self, target: &RetrievalTarget, pacer: &mut LanePacer) -> TargetState {
        let max_attempts = self.config.max_attempts;
        let mut state = TargetState::Pending;
        let mut transport = TransportKind::Primary;
        let mut primary_failures = 0u32;
        let mut next_delay = Duration::ZERO;

        if self.shutdown_requested() {
            return advance(state, cancelled(0, "cancelled before the first attempt"));
        }

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                if !self.sleep_or_cancel(next_delay).await {
                    info!(attempt, "Shutdown requested during backoff; abandoning target");
                    return advance(
                        state,
                        cancelled(attempt - 1, "cancelled while waiting to retry"),
                    );
                }
                metrics::record_retry_backoff(next_delay, attempt);
            }

            pacer.wait().await;
            state = advance(state, TargetState::InFlight { attempt, transport });

            let record = self
                .fetcher
                .attempt(target, transport, attempt)
                .await
                .with_backoff(next_delay);
            self.log_attempt(&record);

            let error_kind = record.error_kind.unwrap_or(ErrorKind::Network);
            let detail = record.detail.clone().unwrap_or_default();

            match record.outcome {
                AttemptOutcome::Success => {
                    info!(
                        attempt,
                        transport = %transport,
                        bytes = record.bytes,
                        "Archive downloaded"
                    );
                    return advance(
                        state,
                        TargetState::Succeeded {
                            attempts: attempt,
                            bytes: record.bytes,
                            sha256: record.sha256.unwrap_or_default(),
                        },
                    );
                }
                AttemptOutcome::PermanentFailure => {
                    let switch_on_not_found = error_kind == ErrorKind::NotFound
                        && transport == TransportKind::Primary
                        && self.config.fallback_on_not_found
                        && attempt < max_attempts;

                    if !switch_on_not_found {
                        self.log_failure(target, &record, attempt, error_kind, &detail);
                        return advance(
                            state,
                            TargetState::Failed {
                                attempts: attempt,
                                error_kind,
                                detail,
                            },
                        );
                    }
                    transport = TransportKind::Fallback;
                }
                AttemptOutcome::TransientFailure => {
                    if attempt == max_attempts {
                        self.log_failure(target, &record, attempt, error_kind, &detail);
                        return advance(
                            state,
                            TargetState::Failed {
                                attempts: attempt,
                                error_kind,
                                detail,
                            },
                        );
                    }
                    if transport == TransportKind::Primary {
                        primary_failures += 1;
                        if primary_failures >= self.config.fallback_after {
                            transport = TransportKind::Fallback;
                        }
                    }
                }
            }

            next_delay = self
                .config
                .delay_before(attempt + 1, &mut rand::thread_rng());
            let context = RetryContext {
                attempt,
                max_attempts,
                error_kind,
                backoff_duration: next_delay,
                target: target.label(),
                transport: record.transport,
                next_transport: transport,
                error_message: detail,
                endpoint: record.url.clone(),
            };
            warn!(
                attempt,
                max_attempts,
                error_kind = %error_kind,
                backoff_ms = next_delay.as_millis() as u64,
                "{}",
                context.format_retry()
            );
            state = advance(state, TargetState::Retrying { attempt, error_kind });
        }

        // max_attempts >= 1, so the loop always returns; kept for a total function.
        advance(
            state,
            TargetState::Failed {
                attempts: max_attempts,
                error_kind: ErrorKind::Network,
                detail: "attempt budget exhausted".to_string(),
            },
        )
    }

    fn log_attempt(&self, record: &AttemptRecord) {
        if let Err(e) = self.sink.record(record) {
            warn!(error = %e, "Failed to write attempt log entry");
        }
    }

    fn log_failure(
        &self,
        target: &RetrievalTarget,
        record: &AttemptRecord,
        attempt: u32,
        error_kind: ErrorKind,
        detail: &str,
    ) {
        let context = RetryContext {
            attempt,
            max_attempts: self.config.max_attempts,
            error_kind,
            backoff_duration: Duration::ZERO,
            target: target.label(),
            transport: record.transport,
            next_transport: record.transport,
            error_message: detail.to_string(),
            endpoint: record.url.clone(),
        };
        if error_kind == ErrorKind::LocalResource {
            error!(error_kind = %error_kind, "{}", context.format_failure());
        } else {
            warn!(error_kind = %error_kind, "{}", context.format_failure());
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }

    /// Sleep for `delay`; returns false if shutdown interrupted the sleep
    async fn sleep_or_cancel(&self, delay: Duration) -> bool {
        if self.shutdown_requested() {
            return false;
        }
        match &self.shutdown {
            Some(shutdown) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = shutdown.wait_for_shutdown() => false,
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}

fn cancelled(attempts: u32, detail: &str) -> TargetState {
    TargetState::Failed {
        attempts,
        error_kind: ErrorKind::Cancelled,
        detail: detail.to_string(),
    }
}

/// Apply a lifecycle transition the loop structure guarantees is legal
fn advance(state: TargetState, next: TargetState) -> TargetState {
    match state.transition(next.clone()) {
        Ok(state) => state,
        Err(e) => {
            debug_assert!(false, "{e}");
            error!(error = %e, "Unexpected target state transition");
            next
        }
    }
}
