//! Worker pool dispatch, concurrency bound and halting

use crate::support::{
    date, fast_pool, fast_retry, sample_archive, Reply, ScriptedTransport,
};
use prism_bulk_downloader::catalog::{build_catalog, RetrievalRequest, RetrievalTarget};
use prism_bulk_downloader::downloader::{PoolConfig, RetryRunner, TargetReport, WorkerPool};
use prism_bulk_downloader::fetcher::FetchExecutor;
use prism_bulk_downloader::report::MemorySink;
use prism_bulk_downloader::shutdown::{SharedShutdown, ShutdownCoordinator};
use prism_bulk_downloader::{TemporalResolution, Variable};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn daily_targets(dir: &TempDir) -> Vec<RetrievalTarget> {
    let request = RetrievalRequest::new(
        date(2001, 1, 1),
        date(2001, 1, 10),
        vec![Variable::Tmax, Variable::Tmin],
        TemporalResolution::Daily,
        dir.path(),
    )
    .with_reference_date(date(2024, 6, 15));
    build_catalog(&request).unwrap()
}

fn pool(
    transport: &Arc<ScriptedTransport>,
    config: PoolConfig,
    shutdown: SharedShutdown,
) -> WorkerPool {
    let fetcher = FetchExecutor::new(transport.transports());
    let runner = RetryRunner::new(fetcher, fast_retry(3), Arc::new(MemorySink::new()))
        .with_shutdown(shutdown.clone());
    WorkerPool::new(config, runner, shutdown)
}

async fn collect(mut rx: mpsc::UnboundedReceiver<TargetReport>) -> Vec<TargetReport> {
    let mut reports = Vec::new();
    while let Some(report) = rx.recv().await {
        reports.push(report);
    }
    reports
}

#[tokio::test]
async fn test_every_target_reported_exactly_once() {
    let dir = TempDir::new().unwrap();
    let targets = daily_targets(&dir);
    let total = targets.len();
    let transport = ScriptedTransport::new(Reply::Archive(sample_archive()));
    let pool = pool(&transport, fast_pool(), ShutdownCoordinator::shared());

    let (tx, rx) = mpsc::unbounded_channel();
    let (outcome, reports) = tokio::join!(pool.run(targets, tx), collect(rx));

    assert_eq!(outcome.dispatched, total);
    assert!(!outcome.cancelled);
    assert!(outcome.fatal_error.is_none());
    assert_eq!(reports.len(), total);
    let ordinals: HashSet<usize> = reports.iter().map(|r| r.target.ordinal).collect();
    assert_eq!(ordinals.len(), total);
    assert!(reports.iter().all(|r| r.state.is_terminal()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_lane_count() {
    let dir = TempDir::new().unwrap();
    let targets = daily_targets(&dir);
    let transport =
        ScriptedTransport::with_latency(Reply::Archive(sample_archive()), Duration::from_millis(20));
    let config = PoolConfig {
        max_concurrency: 3,
        ..fast_pool()
    };
    let pool = pool(&transport, config, ShutdownCoordinator::shared());

    let (tx, rx) = mpsc::unbounded_channel();
    let (_outcome, reports) = tokio::join!(pool.run(targets, tx), collect(rx));

    assert_eq!(reports.len(), 20);
    assert!(transport.peak_concurrency() <= 3);
    assert!(transport.peak_concurrency() >= 2);
}

#[tokio::test]
async fn test_politeness_delay_spaces_requests_on_a_lane() {
    let dir = TempDir::new().unwrap();
    let targets: Vec<_> = daily_targets(&dir).into_iter().take(3).collect();
    let transport = ScriptedTransport::new(Reply::Archive(sample_archive()));
    let config = PoolConfig {
        max_concurrency: 1,
        politeness_delay: Duration::from_millis(40),
        ..fast_pool()
    };
    let pool = pool(&transport, config, ShutdownCoordinator::shared());

    let started = std::time::Instant::now();
    let (tx, rx) = mpsc::unbounded_channel();
    let (_outcome, reports) = tokio::join!(pool.run(targets, tx), collect(rx));

    assert_eq!(reports.len(), 3);
    assert!(started.elapsed() >= Duration::from_millis(80));
}

#[tokio::test]
async fn test_shutdown_stops_dispatch() {
    let dir = TempDir::new().unwrap();
    let targets = daily_targets(&dir);
    let transport = ScriptedTransport::new(Reply::Archive(sample_archive()));
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let pool = pool(&transport, fast_pool(), shutdown);

    let (tx, rx) = mpsc::unbounded_channel();
    let (outcome, reports) = tokio::join!(pool.run(targets, tx), collect(rx));

    assert!(outcome.cancelled);
    assert_eq!(outcome.dispatched, 0);
    assert!(reports.is_empty());
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_grace_period_abort_reports_in_flight_as_cancelled() {
    let dir = TempDir::new().unwrap();
    let targets = daily_targets(&dir);
    let transport =
        ScriptedTransport::with_latency(Reply::Archive(sample_archive()), Duration::from_secs(30));
    let shutdown = ShutdownCoordinator::shared();
    let config = PoolConfig {
        max_concurrency: 2,
        grace_period: Duration::from_millis(50),
        ..fast_pool()
    };
    let pool = pool(&transport, config, shutdown.clone());

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.request_shutdown();
        }
    });

    let (tx, rx) = mpsc::unbounded_channel();
    let (outcome, reports) = tokio::time::timeout(
        Duration::from_secs(5),
        async { tokio::join!(pool.run(targets, tx), collect(rx)) },
    )
    .await
    .expect("pool did not abort after the grace period");

    assert!(outcome.cancelled);
    assert_eq!(outcome.dispatched, 2);
    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert_eq!(
            report.error_kind(),
            Some(prism_bulk_downloader::fetcher::ErrorKind::Cancelled)
        );
        assert_eq!(report.attempts(), 0);
        assert!(!report.target.local_path.exists());
    }
}
