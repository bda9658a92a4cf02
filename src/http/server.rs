//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Assemble the proxy from configuration (registry, controller, engine)
//! - Create the Axum Router with a catch-all handler
//! - Wire up middleware (tracing)
//! - Serve on a listener until shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::cache::DriverRegistry;
use crate::config::{ConfigError, ProxyConfig};
use crate::failover::FailoverController;
use crate::health::{HealthMonitor, HttpProbe};
use crate::http::dispatcher::RequestDispatcher;
use crate::http::proxy::ProxyEngine;
use crate::http::request::hook_from_config;
use crate::http::response::ErrorPages;
use crate::lifecycle::Shutdown;
use crate::load_balancer::{strategy_for, BackendRegistry};
use crate::observability::{AccessLog, Stats, TracingAccessLog};

/// HTTP server for the failover proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    dispatcher: Arc<RequestDispatcher>,
}

impl HttpServer {
    /// Build the proxy from `config`, logging access events with tracing.
    pub fn new(
        config: ProxyConfig,
        drivers: &DriverRegistry,
        shutdown: &Shutdown,
    ) -> Result<Self, ConfigError> {
        Self::with_access_log(config, drivers, shutdown, Arc::new(TracingAccessLog))
    }

    /// Build the proxy with a custom access log sink.
    pub fn with_access_log(
        config: ProxyConfig,
        drivers: &DriverRegistry,
        shutdown: &Shutdown,
        access_log: Arc<dyn AccessLog>,
    ) -> Result<Self, ConfigError> {
        let registry = Arc::new(BackendRegistry::from_config(&config, drivers)?);

        let timeouts = &config.timeouts;
        let monitor = HealthMonitor::new(
            Arc::new(HttpProbe::new(timeouts.http_test_timeout())),
            timeouts.backend_watch_interval(),
            shutdown.clone(),
        );
        let controller =
            FailoverController::new(registry, strategy_for(config.select_strategy), monitor);

        let engine = ProxyEngine::new(timeouts.http_timeout(), hook_from_config(&config.pre_proxy));
        let dispatcher = Arc::new(RequestDispatcher::new(
            controller,
            engine,
            Arc::new(Stats::new()),
            ErrorPages::from_config(&config.errors),
            access_log,
            config.listener.max_body_size,
        ));

        let router = Self::build_router(dispatcher.clone());
        Ok(Self {
            router,
            config,
            dispatcher,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(dispatcher: Arc<RequestDispatcher>) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(dispatcher)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backends = self.dispatcher.controller().registry().backends().len(),
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn controller(&self) -> &Arc<FailoverController> {
        self.dispatcher.controller()
    }

    pub fn stats(&self) -> &Arc<Stats> {
        self.dispatcher.stats()
    }

    /// The router, for serving it elsewhere.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Catch-all handler: every method and path goes through the dispatcher.
async fn proxy_handler(
    State(dispatcher): State<Arc<RequestDispatcher>>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    dispatcher.dispatch(client, request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    async fn refused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn config(ports: &[u16]) -> ProxyConfig {
        let backends = ports
            .iter()
            .map(|p| format!("\"http://127.0.0.1:{}/\"", p))
            .collect::<Vec<_>>()
            .join(", ");
        crate::config::parse_config(&format!("backends = [{}]", backends)).unwrap()
    }

    #[tokio::test]
    async fn unreachable_backends_answer_503_1() {
        let shutdown = Shutdown::new();
        let server = HttpServer::new(
            config(&[refused_port().await, refused_port().await]),
            &DriverRegistry::with_defaults(),
            &shutdown,
        )
        .unwrap();
        assert_eq!(server.controller().current().unwrap().idx, 0);

        let client: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let response = server
            .router()
            .layer(MockConnectInfo(client))
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/deep/path?x=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"HTTP error 503.1.");
        assert_eq!(server.stats().failed(), 1);
        assert!(server.controller().current().is_none());
        shutdown.trigger();
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = config(&[8080]);
        config.backends.clear();
        let err = HttpServer::new(config, &DriverRegistry::with_defaults(), &Shutdown::new())
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
