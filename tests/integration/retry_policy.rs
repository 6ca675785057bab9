//! Retry loop behaviour for single targets

use crate::support::{fast_retry, ppt_1971_request, sample_archive, Reply, ScriptedTransport};
use prism_bulk_downloader::catalog::{build_catalog, RetrievalTarget};
use prism_bulk_downloader::downloader::{LanePacer, RetryConfig, RetryRunner, TargetState};
use prism_bulk_downloader::fetcher::{ErrorKind, FetchExecutor, TransportKind};
use prism_bulk_downloader::report::MemorySink;
use prism_bulk_downloader::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn first_target(dir: &TempDir) -> RetrievalTarget {
    build_catalog(&ppt_1971_request(dir.path()))
        .unwrap()
        .remove(0)
}

fn runner(
    transport: &Arc<ScriptedTransport>,
    config: RetryConfig,
) -> (RetryRunner, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let fetcher = FetchExecutor::new(transport.transports());
    (RetryRunner::new(fetcher, config, sink.clone()), sink)
}

#[tokio::test]
async fn test_attempts_never_exceed_budget() {
    let dir = TempDir::new().unwrap();
    let target = first_target(&dir);
    let transport = ScriptedTransport::new(Reply::Status(500));
    let (runner, sink) = runner(&transport, fast_retry(6));

    let report = runner.run(target, &mut LanePacer::new(Duration::ZERO)).await;

    assert_eq!(transport.calls().len(), 6);
    match report.state {
        TargetState::Failed {
            attempts,
            error_kind,
            ..
        } => {
            assert_eq!(attempts, 6);
            assert_eq!(error_kind, ErrorKind::ServerError);
        }
        other => panic!("unexpected state {other:?}"),
    }

    let records = sink.records();
    assert_eq!(records.len(), 6);
    let attempt_numbers: Vec<u32> = records.iter().map(|r| r.attempt_number).collect();
    assert_eq!(attempt_numbers, vec![1, 2, 3, 4, 5, 6]);

    let delays: Vec<u64> = records.iter().map(|r| r.backoff_ms).collect();
    assert_eq!(delays[0], 0);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]), "delays decreased: {delays:?}");
    assert!(delays.iter().all(|d| *d <= 4));
}

#[tokio::test]
async fn test_switches_to_fallback_after_threshold() {
    let dir = TempDir::new().unwrap();
    let target = first_target(&dir);
    let transport = ScriptedTransport::new(Reply::Archive(sample_archive()));
    transport.script(&target.primary_url, vec![Reply::Timeout; 5]);
    let (runner, sink) = runner(&transport, fast_retry(5).with_fallback_after(3));

    let report = runner.run(target.clone(), &mut LanePacer::new(Duration::ZERO)).await;

    assert!(matches!(report.state, TargetState::Succeeded { attempts: 4, .. }));
    let transports: Vec<TransportKind> = sink.records().iter().map(|r| r.transport).collect();
    assert_eq!(
        transports,
        vec![
            TransportKind::Primary,
            TransportKind::Primary,
            TransportKind::Primary,
            TransportKind::Fallback
        ]
    );
    assert!(target.local_path.exists());
}

#[tokio::test]
async fn test_not_found_stops_without_fallback() {
    let dir = TempDir::new().unwrap();
    let target = first_target(&dir);
    let transport = ScriptedTransport::new(Reply::NotFound);
    let (runner, _sink) = runner(&transport, fast_retry(5));

    let report = runner.run(target, &mut LanePacer::new(Duration::ZERO)).await;

    assert_eq!(report.error_kind(), Some(ErrorKind::NotFound));
    assert_eq!(report.attempts(), 1);
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn test_not_found_tries_fallback_when_enabled() {
    let dir = TempDir::new().unwrap();
    let target = first_target(&dir);
    let transport = ScriptedTransport::new(Reply::Archive(sample_archive()));
    transport.script(&target.primary_url, vec![Reply::NotFound]);
    let config = fast_retry(5).with_fallback_on_not_found(true);
    let (runner, _sink) = runner(&transport, config);

    let report = runner.run(target.clone(), &mut LanePacer::new(Duration::ZERO)).await;

    assert!(matches!(report.state, TargetState::Succeeded { attempts: 2, .. }));
    assert_eq!(transport.calls_for(&target.fallback_url), 1);
}

#[tokio::test]
async fn test_client_error_is_permanent() {
    let dir = TempDir::new().unwrap();
    let target = first_target(&dir);
    let transport = ScriptedTransport::new(Reply::Status(403));
    let (runner, _sink) = runner(&transport, fast_retry(5));

    let report = runner.run(target, &mut LanePacer::new(Duration::ZERO)).await;

    assert_eq!(report.error_kind(), Some(ErrorKind::ClientError));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn test_rate_limited_is_retried() {
    let dir = TempDir::new().unwrap();
    let target = first_target(&dir);
    let transport = ScriptedTransport::new(Reply::Archive(sample_archive()));
    transport.script(&target.primary_url, vec![Reply::Status(429)]);
    let (runner, _sink) = runner(&transport, fast_retry(5));

    let report = runner.run(target, &mut LanePacer::new(Duration::ZERO)).await;

    assert!(matches!(report.state, TargetState::Succeeded { attempts: 2, .. }));
}

#[tokio::test]
async fn test_shutdown_interrupts_backoff() {
    let dir = TempDir::new().unwrap();
    let target = first_target(&dir);
    let transport = ScriptedTransport::new(Reply::Status(503));
    let config = RetryConfig::new(5)
        .with_delays(Duration::from_secs(30), Duration::from_secs(60))
        .with_jitter(0.0);
    let shutdown = ShutdownCoordinator::shared();
    let (runner, _sink) = runner(&transport, config);
    let runner = runner.with_shutdown(shutdown.clone());

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.request_shutdown();
        }
    });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        runner.run(target, &mut LanePacer::new(Duration::ZERO)),
    )
    .await
    .expect("backoff sleep was not interrupted");

    match report.state {
        TargetState::Failed {
            attempts,
            error_kind,
            ..
        } => {
            assert_eq!(error_kind, ErrorKind::Cancelled);
            assert_eq!(attempts, 1);
        }
        other => panic!("unexpected state {other:?}"),
    }
    assert_eq!(transport.calls().len(), 1);
}
