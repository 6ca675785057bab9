//! Bounded worker pool
//!
//! `max_concurrency` lanes share one queue of pending targets. Each lane pulls a
//! target, runs the retry loop on it to a terminal state and sends the resulting
//! [`TargetReport`] to the single aggregator over a channel.
//!
//! Two things stop dispatch early:
//!
//! - **Fatal error** (local filesystem failure): the halt flag is raised, lanes stop
//!   pulling new targets and in-flight targets run to completion.
//! - **Cancellation** (shutdown requested): lanes stop pulling, in-flight targets get
//!   `grace_period` to finish, then remaining lanes are aborted and their targets
//!   reported as `Failed(Cancelled)`.
//!
//! Undispatched targets are never reported; the aggregator counts them as not attempted.

use super::config::PoolConfig;
use super::job::{TargetReport, TargetState};
use super::rate_limit::LanePacer;
use super::retry::RetryRunner;
use crate::catalog::RetrievalTarget;
use crate::fetcher::{ErrorKind, FailureClass};
use crate::metrics::InFlightGuard;
use crate::shutdown::SharedShutdown;
use indicatif::ProgressBar;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How a pool run ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    /// Targets handed to a lane
    pub dispatched: usize,
    /// Shutdown was requested while work remained
    pub cancelled: bool,
    /// Detail of the fatal error that halted dispatch
    pub fatal_error: Option<String>,
}

/// State shared by every lane of one run
struct LaneShared {
    queue: Mutex<VecDeque<RetrievalTarget>>,
    in_flight: Mutex<HashMap<usize, RetrievalTarget>>,
    halt: AtomicBool,
    fatal_error: Mutex<Option<String>>,
    dispatched: AtomicUsize,
    reports: UnboundedSender<TargetReport>,
}

impl LaneShared {
    fn next_target(&self, lane: usize) -> Option<RetrievalTarget> {
        let target = self.queue.lock().ok()?.pop_front()?;
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.insert(lane, target.clone());
        }
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        Some(target)
    }

    fn finish_target(&self, lane: usize, report: TargetReport) -> bool {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(&lane);
        }
        self.reports.send(report).is_ok()
    }

    fn raise_fatal(&self, detail: String) {
        if !self.halt.swap(true, Ordering::SeqCst) {
            if let Ok(mut slot) = self.fatal_error.lock() {
                *slot = Some(detail);
            }
        }
    }
}

/// Runs targets across a fixed number of lanes
pub struct WorkerPool {
    config: PoolConfig,
    runner: RetryRunner,
    shutdown: SharedShutdown,
    progress: Option<ProgressBar>,
}

impl WorkerPool {
    /// Create a pool
    pub fn new(config: PoolConfig, runner: RetryRunner, shutdown: SharedShutdown) -> Self {
        Self {
            config,
            runner,
            shutdown,
            progress: None,
        }
    }

    /// Advance `progress` by one per finished target
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Work every target in `targets`, sending one report per dispatched target
    pub async fn run(
        &self,
        targets: Vec<RetrievalTarget>,
        reports: UnboundedSender<TargetReport>,
    ) -> PoolOutcome {
        let lane_count = self.config.max_concurrency.max(1).min(targets.len());
        if lane_count == 0 {
            return PoolOutcome::default();
        }

        let shared = Arc::new(LaneShared {
            queue: Mutex::new(targets.into()),
            in_flight: Mutex::new(HashMap::new()),
            halt: AtomicBool::new(false),
            fatal_error: Mutex::new(None),
            dispatched: AtomicUsize::new(0),
            reports,
        });

        info!(lanes = lane_count, "Starting worker lanes");
        let mut lanes = JoinSet::new();
        for lane in 0..lane_count {
            lanes.spawn(run_lane(
                lane,
                shared.clone(),
                self.runner.clone(),
                LanePacer::new(self.config.politeness_delay),
                self.shutdown.clone(),
                self.progress.clone(),
            ));
        }

        let cancelled = loop {
            tokio::select! {
                joined = lanes.join_next() => match joined {
                    None => break false,
                    Some(Err(e)) => error!(error = %e, "Worker lane terminated abnormally"),
                    Some(Ok(())) => {}
                },
                _ = self.shutdown.wait_for_shutdown() => break true,
            }
        };

        if cancelled {
            self.drain_after_cancel(&mut lanes, &shared).await;
        }
        // Lanes that saw the flag first may all have exited before the select did.
        let cancelled = cancelled || self.shutdown.is_shutdown_requested();

        let fatal_error = shared.fatal_error.lock().ok().and_then(|slot| slot.clone());
        PoolOutcome {
            dispatched: shared.dispatched.load(Ordering::SeqCst),
            cancelled,
            fatal_error,
        }
    }

    async fn drain_after_cancel(&self, lanes: &mut JoinSet<()>, shared: &LaneShared) {
        let grace = self.config.grace_period;
        info!(
            grace_secs = grace.as_secs_f64(),
            in_flight = lanes.len(),
            "Shutdown requested; draining in-flight targets"
        );

        let drained = tokio::time::timeout(grace, async {
            while lanes.join_next().await.is_some() {}
        })
        .await;

        if drained.is_ok() {
            return;
        }

        warn!(remaining = lanes.len(), "Grace period elapsed; aborting remaining lanes");
        lanes.abort_all();
        while lanes.join_next().await.is_some() {}

        let abandoned: Vec<RetrievalTarget> = shared
            .in_flight
            .lock()
            .map(|mut in_flight| in_flight.drain().map(|(_, target)| target).collect())
            .unwrap_or_default();

        for target in abandoned {
            debug!(target = %target, "Reporting aborted target as cancelled");
            let report = TargetReport {
                target,
                state: TargetState::Failed {
                    attempts: 0,
                    error_kind: ErrorKind::Cancelled,
                    detail: "aborted after shutdown grace period".to_string(),
                },
            };
            if shared.reports.send(report).is_err() {
                break;
            }
            if let Some(progress) = &self.progress {
                progress.inc(1);
            }
        }
    }
}

async fn run_lane(
    lane: usize,
    shared: Arc<LaneShared>,
    runner: RetryRunner,
    mut pacer: LanePacer,
    shutdown: SharedShutdown,
    progress: Option<ProgressBar>,
) {
    loop {
        if shared.halt.load(Ordering::SeqCst) || shutdown.is_shutdown_requested() {
            break;
        }
        let Some(target) = shared.next_target(lane) else {
            break;
        };

        let report = {
            let _in_flight = InFlightGuard::enter();
            runner.run(target, &mut pacer).await
        };

        if let Some(kind) = report.error_kind() {
            if kind.class() == FailureClass::Fatal {
                let detail = match &report.state {
                    TargetState::Failed { detail, .. } => format!("{}: {detail}", report.target),
                    _ => report.target.to_string(),
                };
                error!(lane, error = %detail, "Fatal error; halting dispatch");
                shared.raise_fatal(detail);
            }
        }

        if !shared.finish_target(lane, report) {
            break;
        }
        if let Some(progress) = &progress {
            progress.inc(1);
        }
    }
    debug!(lane, "Worker lane finished");
}
