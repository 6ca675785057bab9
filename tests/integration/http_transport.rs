//! HttpTransport against a loopback server

use crate::support::{sample_archive, spawn_http_server};
use futures_util::StreamExt;
use prism_bulk_downloader::fetcher::{ErrorKind, HttpTransport, Transport, TransportError};

#[tokio::test]
async fn test_success_streams_body_with_length() {
    let archive = sample_archive();
    let addr = spawn_http_server(vec![("/4km/ppt/197101", 200, archive.clone())]).await;
    let transport = HttpTransport::with_client(reqwest::Client::new());

    let mut body = transport
        .open(&format!("http://{addr}/4km/ppt/197101"))
        .await
        .unwrap();

    assert_eq!(body.content_length, Some(archive.len() as u64));
    let mut received = Vec::new();
    while let Some(chunk) = body.stream.next().await {
        received.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(received, archive);
}

#[tokio::test]
async fn test_missing_archive_is_not_found() {
    let addr = spawn_http_server(vec![]).await;
    let transport = HttpTransport::with_client(reqwest::Client::new());

    let err = transport
        .open(&format!("http://{addr}/4km/ppt/189001"))
        .await
        .unwrap_err();

    assert_eq!(err, TransportError::NotFound(404));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_server_errors_keep_their_status() {
    let addr = spawn_http_server(vec![
        ("/busy", 503, b"try later".to_vec()),
        ("/slow-down", 429, Vec::new()),
        ("/gone", 410, Vec::new()),
    ])
    .await;
    let transport = HttpTransport::with_client(reqwest::Client::new());

    let busy = transport.open(&format!("http://{addr}/busy")).await.unwrap_err();
    assert_eq!(busy, TransportError::Status(503));
    assert_eq!(busy.kind(), ErrorKind::ServerError);

    let limited = transport.open(&format!("http://{addr}/slow-down")).await.unwrap_err();
    assert_eq!(limited.kind(), ErrorKind::RateLimited);
    assert!(limited.kind().is_retryable());

    let gone = transport.open(&format!("http://{addr}/gone")).await.unwrap_err();
    assert_eq!(gone, TransportError::NotFound(410));
}

#[tokio::test]
async fn test_refused_connection_is_transient() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let transport = HttpTransport::with_client(reqwest::Client::new());

    let err = transport
        .open(&format!("http://{addr}/4km/ppt/197101"))
        .await
        .unwrap_err();

    assert!(err.kind().is_retryable(), "unexpected {err:?}");
}
