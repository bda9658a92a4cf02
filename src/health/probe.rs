//! Backend probes.
//!
//! # Responsibilities
//! - Decide whether a down server answers HTTP again
//! - Any HTTP response counts as alive, whatever its status

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::time;

use crate::load_balancer::ServerTarget;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to build probe request: {0}")]
    Build(#[from] axum::http::Error),

    #[error("probe connection failed: {0}")]
    Connect(#[from] hyper_util::client::legacy::Error),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
}

/// Checks a single server once.
#[async_trait]
pub trait Probe: Send + Sync + fmt::Debug {
    async fn probe(&self, target: &ServerTarget) -> Result<(), ProbeError>;
}

/// `HEAD <prefix>` with the backend host in the Host header.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client, timeout }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, target: &ServerTarget) -> Result<(), ProbeError> {
        let uri = format!(
            "http://{}:{}{}",
            target.host, target.port, target.prefix
        );
        let request = Request::builder()
            .method(Method::HEAD)
            .uri(uri)
            .header(header::HOST, target.host.as_str())
            .header(header::USER_AGENT, "failover-proxy-health-check")
            .body(Body::empty())?;

        match time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                tracing::debug!(
                    backend = %target.authority(),
                    status = %response.status(),
                    "Probe answered"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(ProbeError::Connect(e)),
            Err(_) => Err(ProbeError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn target(port: u16, prefix: &str) -> ServerTarget {
        ServerTarget {
            proto: Protocol::Http,
            host: "127.0.0.1".into(),
            port,
            prefix: prefix.into(),
        }
    }

    #[tokio::test]
    async fn any_status_is_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let probe = HttpProbe::new(Duration::from_secs(1));
        probe.probe(&target(port, "/status")).await.unwrap();

        let head = server.await.unwrap();
        assert!(head.starts_with("HEAD /status HTTP/1.1\r\n"), "{}", head);
        assert!(head.to_ascii_lowercase().contains("host: 127.0.0.1\r\n"), "{}", head);
    }

    #[tokio::test]
    async fn refused_connection_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = HttpProbe::new(Duration::from_secs(1))
            .probe(&target(port, "/"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Connect(_)));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _hold = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            time::sleep(Duration::from_secs(5)).await;
        });

        let err = HttpProbe::new(Duration::from_millis(100))
            .probe(&target(port, "/"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(_)));
    }
}
