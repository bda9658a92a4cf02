//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use failover_proxy::config::ProxyConfig;
use failover_proxy::failover::FailoverController;
use failover_proxy::observability::{AccessEvent, AccessLog, Stats};
use failover_proxy::{DriverRegistry, HttpServer, Shutdown};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A request as seen by a mock backend.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    /// Header names lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Requests received by a mock backend, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<RecordedRequest>>>);

impl Recorder {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Read one HTTP/1.1 request (headers plus Content-Length body).
async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(n, _)| n == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(RecordedRequest {
        method,
        target,
        headers,
        body,
    })
}

/// Start a mock backend on a free port; every request is recorded and
/// answered with whatever `respond` returns (status line, body).
pub async fn start_programmable_backend<F, Fut>(respond: F) -> (SocketAddr, Recorder)
where
    F: Fn(RecordedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (&'static str, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    serve_programmable(listener, respond).await
}

/// Same as [`start_programmable_backend`] on an already bound listener.
pub async fn serve_programmable<F, Fut>(listener: TcpListener, respond: F) -> (SocketAddr, Recorder)
where
    F: Fn(RecordedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (&'static str, String)> + Send + 'static,
{
    let addr = listener.local_addr().unwrap();
    let recorder = Recorder::default();
    let respond = Arc::new(respond);

    let log = recorder.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let respond = respond.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };
                let is_head = request.method == "HEAD";
                log.0.lock().unwrap().push(request.clone());

                let (status, body) = respond(request).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    if is_head { "" } else { body.as_str() }
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, recorder)
}

/// Start a simple mock backend that returns a fixed 200 response.
pub async fn start_mock_backend(body: &'static str) -> (SocketAddr, Recorder) {
    start_programmable_backend(move |_| async move { ("200 OK", body.to_string()) }).await
}

/// Accepts connections and never answers.
pub async fn start_silent_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// Serves a single connection: announces a longer body than it sends, then
/// closes. Later connections are refused.
pub async fn start_truncating_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        drop(listener);
        if read_request(&mut socket).await.is_none() {
            return;
        }
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nonly ten b")
            .await;
        let _ = socket.shutdown().await;
    });
    addr
}

/// A local address nothing listens on.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn http_url(addr: SocketAddr) -> String {
    format!("http://{}/", addr)
}

/// Access log that keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryAccessLog(Mutex<Vec<AccessEvent>>);

impl MemoryAccessLog {
    pub fn events(&self) -> Vec<AccessEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl AccessLog for MemoryAccessLog {
    fn record(&self, event: &AccessEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

/// A running proxy and the handles tests inspect.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub controller: Arc<FailoverController>,
    pub stats: Arc<Stats>,
    pub access: Arc<MemoryAccessLog>,
    pub shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        let _ = self.shutdown.trigger();
    }
}

/// Parse `toml`, build the proxy and serve it on a free port.
pub async fn start_proxy(toml: &str) -> TestProxy {
    let config = failover_proxy::config::parse_config(toml).unwrap();
    start_proxy_with(config).await
}

pub async fn start_proxy_with(config: ProxyConfig) -> TestProxy {
    let shutdown = Shutdown::new();
    let access = Arc::new(MemoryAccessLog::default());
    let server = HttpServer::with_access_log(
        config,
        &DriverRegistry::with_defaults(),
        &shutdown,
        access.clone(),
    )
    .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let controller = server.controller().clone();
    let stats = server.stats().clone();

    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestProxy {
        addr,
        controller,
        stats,
        access,
        shutdown,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll `condition` every 10ms for up to five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}
