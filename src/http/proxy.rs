//! Upstream forwarding.
//!
//! # Responsibilities
//! - Build the outbound request (prefix + original path, headers, hook)
//! - Wait for upstream response headers under the proxy timeout
//! - Stream the upstream body to the client through [`TrackedStream`]
//!
//! # Design Decisions
//! - The timeout covers connect and response headers only; once headers are
//!   in, the body streams for as long as it takes
//! - Errors here always mean nothing was sent to the client, so the caller
//!   may retry elsewhere

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, request::Parts, HeaderValue, Method, Request, Response, Version};
use futures_util::StreamExt;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time;

use crate::http::request::PreProxyHook;
use crate::http::response::{mark_origin, FROM_PROXY};
use crate::http::stream::{ProxyCompletion, TrackedStream};
use crate::load_balancer::ServerTarget;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to build upstream request: {0}")]
    Build(#[from] axum::http::Error),

    #[error("upstream {backend} failed: {source}")]
    Connect {
        backend: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    #[error("upstream {backend} sent no response within {timeout:?}")]
    Timeout { backend: String, timeout: Duration },
}

/// A response whose headers arrived; the body is still streaming.
#[derive(Debug)]
pub struct PendingResponse {
    pub response: Response<Body>,
    /// Resolves once the body stream has ended, failed, or been dropped.
    pub completion: oneshot::Receiver<ProxyCompletion>,
}

/// Outbound URI: `http://host:port` + prefix + original path and query.
pub fn upstream_uri(parts: &Parts, target: &ServerTarget) -> String {
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!(
        "http://{}:{}{}{}",
        target.host,
        target.port,
        target.base_path(),
        path
    )
}

/// Responses that never carry a body, whatever their headers say.
fn is_bodiless(method: &Method, status: axum::http::StatusCode) -> bool {
    method == Method::HEAD
        || status.is_informational()
        || status == axum::http::StatusCode::NO_CONTENT
        || status == axum::http::StatusCode::NOT_MODIFIED
}

#[derive(Debug, Clone)]
pub struct ProxyEngine {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
    hook: Arc<dyn PreProxyHook>,
}

impl ProxyEngine {
    pub fn new(timeout: Duration, hook: Arc<dyn PreProxyHook>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            timeout,
            hook,
        }
    }

    /// Send the request described by `parts` and `body` to `target`.
    ///
    /// With `capture`, the completed answer (status, headers, body) comes
    /// back in the completion record for caching.
    pub async fn forward(
        &self,
        parts: &Parts,
        body: Bytes,
        target: &ServerTarget,
        capture: bool,
    ) -> Result<PendingResponse, ProxyError> {
        let mut request = Request::builder()
            .method(parts.method.clone())
            .uri(upstream_uri(parts, target))
            .version(Version::HTTP_11)
            .body(Body::from(body))?;
        *request.headers_mut() = parts.headers.clone();
        request
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        self.hook.apply(&mut request, target);

        let response: Response<Incoming> = match time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => {
                return Err(ProxyError::Connect {
                    backend: target.authority(),
                    source,
                })
            }
            Err(_) => {
                return Err(ProxyError::Timeout {
                    backend: target.authority(),
                    timeout: self.timeout,
                })
            }
        };

        let (mut head, incoming) = response.into_parts();
        let expected = if is_bodiless(&parts.method, head.status) {
            Some(0)
        } else {
            head.headers
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
        };
        let captured = capture.then(|| head.headers.clone());

        let (tx, rx) = oneshot::channel();
        let stream = TrackedStream::new(
            incoming.into_data_stream().boxed(),
            head.status,
            expected,
            captured,
            tx,
        );
        mark_origin(&mut head.headers, FROM_PROXY);

        Ok(PendingResponse {
            response: Response::from_parts(head, Body::from_stream(stream)),
            completion: rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use crate::http::request::NoopHook;
    use crate::http::response::X_CACHE;
    use crate::http::stream::StreamEnd;
    use axum::http::StatusCode;
    use axum::Router;
    use tokio::net::TcpListener;

    fn target(port: u16, prefix: &str) -> ServerTarget {
        ServerTarget {
            proto: Protocol::Http,
            host: "127.0.0.1".into(),
            port,
            prefix: prefix.into(),
        }
    }

    fn parts(method: Method, uri: &str) -> Parts {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-client", "yes")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    /// Echoes method, URI, and two request headers in the body.
    async fn echo_server() -> u16 {
        let app = Router::new().fallback(|request: Request<Body>| async move {
            let headers = request.headers();
            format!(
                "{} {} {} {}",
                request.method(),
                request.uri(),
                headers
                    .get("x-client")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-"),
                headers
                    .get(header::CONNECTION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-"),
            )
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        port
    }

    #[test]
    fn uri_joins_prefix_and_path() {
        let p = parts(Method::GET, "/a/b?c=1");
        assert_eq!(upstream_uri(&p, &target(81, "/")), "http://127.0.0.1:81/a/b?c=1");
        assert_eq!(
            upstream_uri(&p, &target(81, "/api/")),
            "http://127.0.0.1:81/api/a/b?c=1"
        );
        assert_eq!(
            upstream_uri(&p, &target(81, "/api")),
            "http://127.0.0.1:81/api/a/b?c=1"
        );
    }

    #[tokio::test]
    async fn forwards_and_tracks_completion() {
        let port = echo_server().await;
        let engine = ProxyEngine::new(Duration::from_secs(2), Arc::new(NoopHook));

        let pending = engine
            .forward(
                &parts(Method::GET, "/x?y=1"),
                Bytes::new(),
                &target(port, "/base"),
                true,
            )
            .await
            .unwrap();
        assert_eq!(pending.response.status(), StatusCode::OK);
        assert_eq!(pending.response.headers()[X_CACHE], FROM_PROXY);

        let body = axum::body::to_bytes(pending.response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"GET /base/x?y=1 yes keep-alive");

        let done = pending.completion.await.unwrap();
        assert_eq!(done.end, StreamEnd::Complete);
        assert_eq!(done.transferred, body.len() as u64);
        let answer = done.answer.unwrap();
        assert_eq!(answer.body, body);
        assert!(answer.headers.get(X_CACHE).is_none());
    }

    #[tokio::test]
    async fn head_completes_without_body() {
        let port = echo_server().await;
        let engine = ProxyEngine::new(Duration::from_secs(2), Arc::new(NoopHook));

        let pending = engine
            .forward(&parts(Method::HEAD, "/"), Bytes::new(), &target(port, "/"), false)
            .await
            .unwrap();
        let done = pending.completion.await.unwrap();
        assert_eq!(done.end, StreamEnd::Complete);
        assert_eq!(done.transferred, 0);
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let engine = ProxyEngine::new(Duration::from_secs(2), Arc::new(NoopHook));
        let err = engine
            .forward(&parts(Method::GET, "/"), Bytes::new(), &target(port, "/"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Connect { .. }));
    }

    #[tokio::test]
    async fn silent_upstream_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _hold = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            time::sleep(Duration::from_secs(5)).await;
        });

        let engine = ProxyEngine::new(Duration::from_millis(100), Arc::new(NoopHook));
        let err = engine
            .forward(&parts(Method::GET, "/"), Bytes::new(), &target(port, "/"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Timeout { .. }));
    }
}
