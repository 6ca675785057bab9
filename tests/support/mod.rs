//! Shared fixtures: scripted transport, archive builders, a tiny HTTP responder

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use prism_bulk_downloader::catalog::RetrievalRequest;
use prism_bulk_downloader::downloader::{DownloadExecutor, PoolConfig, RetryConfig};
use prism_bulk_downloader::fetcher::{
    RemoteBody, Transport, TransportError, TransportResult, Transports,
};
use prism_bulk_downloader::{TemporalResolution, Variable};
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A small valid ZIP holding one `.bil` member
pub fn zip_bytes(member: &str, content: &[u8]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    writer.start_file(member, options).unwrap();
    writer.write_all(content).unwrap();
    writer.finish().unwrap().into_inner()
}

/// Default archive served by [`ScriptedTransport`]
pub fn sample_archive() -> Vec<u8> {
    zip_bytes("grid.bil", &[7u8; 256])
}

/// One scripted response
#[derive(Debug, Clone)]
pub enum Reply {
    /// 200 with this body and a correct content length
    Archive(Vec<u8>),
    /// 200 with a body that is not a ZIP
    Garbage,
    /// 200 declaring more bytes than it sends
    Truncated,
    /// Body breaks after the first chunk
    BrokenStream,
    /// 404
    NotFound,
    /// Any other status
    Status(u16),
    /// Request timed out
    Timeout,
}

impl Reply {
    fn into_result(self) -> TransportResult<RemoteBody> {
        match self {
            Reply::Archive(bytes) => Ok(body(Some(bytes.len() as u64), vec![Ok(bytes)])),
            Reply::Garbage => {
                let html = b"<html>Too many downloads</html>".to_vec();
                Ok(body(Some(html.len() as u64), vec![Ok(html)]))
            }
            Reply::Truncated => {
                let archive = sample_archive();
                let declared = archive.len() as u64;
                Ok(body(Some(declared), vec![Ok(archive[..archive.len() / 2].to_vec())]))
            }
            Reply::BrokenStream => {
                let archive = sample_archive();
                Ok(body(
                    None,
                    vec![
                        Ok(archive[..16].to_vec()),
                        Err(TransportError::Body("connection reset".to_string())),
                    ],
                ))
            }
            Reply::NotFound => Err(TransportError::NotFound(404)),
            Reply::Status(code) => Err(TransportError::Status(code)),
            Reply::Timeout => Err(TransportError::Timeout("deadline elapsed".to_string())),
        }
    }
}

fn body(content_length: Option<u64>, chunks: Vec<TransportResult<Vec<u8>>>) -> RemoteBody {
    let chunks: Vec<TransportResult<Bytes>> =
        chunks.into_iter().map(|c| c.map(Bytes::from)).collect();
    RemoteBody {
        content_length,
        stream: Box::pin(futures_util::stream::iter(chunks)),
    }
}

/// Transport answering from per-URL scripts, recording every call
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    default: Reply,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    latency: Duration,
}

impl ScriptedTransport {
    /// Every unscripted URL gets `default`
    pub fn new(default: Reply) -> Arc<Self> {
        Arc::new(Self::build(default, Duration::ZERO))
    }

    /// Like [`ScriptedTransport::new`] but each open takes `latency`
    pub fn with_latency(default: Reply, latency: Duration) -> Arc<Self> {
        Arc::new(Self::build(default, latency))
    }

    fn build(default: Reply, latency: Duration) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            latency,
        }
    }

    /// Queue replies for `url`; once used up the default applies
    pub fn script(&self, url: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(replies);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    /// Highest number of simultaneously open requests seen
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Both roles served by this transport
    pub fn transports(self: &Arc<Self>) -> Transports {
        Transports::new(self.clone(), self.clone())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, url: &str) -> TransportResult<RemoteBody> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| self.default.clone());

        self.active.fetch_sub(1, Ordering::SeqCst);
        reply.into_result()
    }
}

/// Retry settings with millisecond backoff and no jitter
pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new(max_attempts)
        .with_delays(Duration::from_millis(1), Duration::from_millis(4))
        .with_jitter(0.0)
}

/// Pool settings without politeness delay
pub fn fast_pool() -> PoolConfig {
    PoolConfig {
        politeness_delay: Duration::ZERO,
        grace_period: Duration::from_millis(200),
        ..PoolConfig::default()
    }
}

/// Executor over `transport` with fast retry and pool settings
pub fn executor(transport: &Arc<ScriptedTransport>, max_attempts: u32) -> DownloadExecutor {
    DownloadExecutor::new()
        .with_transports(transport.transports())
        .with_retry_config(fast_retry(max_attempts))
        .with_pool_config(fast_pool())
}

/// The 1971 monthly precipitation request, classified against a fixed reference date
pub fn ppt_1971_request(root: &Path) -> RetrievalRequest {
    RetrievalRequest::new(
        date(1971, 1, 1),
        date(1971, 12, 31),
        vec![Variable::Ppt],
        TemporalResolution::Monthly,
        root,
    )
    .with_reference_date(date(2024, 6, 15))
}

/// Serve fixed responses by path on a loopback port: `(path, status, body)`
pub async fn spawn_http_server(routes: Vec<(&'static str, u16, Vec<u8>)>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = Arc::new(routes);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    let Ok(n) = socket.read(&mut buf).await else {
                        return;
                    };
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }

                let head = String::from_utf8_lossy(&request);
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, payload) = routes
                    .iter()
                    .find(|(p, _, _)| *p == path)
                    .map(|(_, s, b)| (*s, b.clone()))
                    .unwrap_or((404, b"not found".to_vec()));

                let header = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/zip\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    payload.len()
                );
                let _ = socket.write_all(header.as_bytes()).await;
                let _ = socket.write_all(&payload).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}
