//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Define the access log record and its default sink
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - The access log is a trait so embedders can route it elsewhere

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::{Method, StatusCode, Version};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::http::response::ErrorCode;

/// Install the global subscriber. Returns false if one was already set.
pub fn init(log_level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

/// Status reported in an access event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggedStatus {
    Http(StatusCode),
    Synthetic(ErrorCode),
}

impl fmt::Display for LoggedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggedStatus::Http(status) => write!(f, "{}", status.as_u16()),
            LoggedStatus::Synthetic(code) => write!(f, "{}", code),
        }
    }
}

/// One finished (or failed) request.
#[derive(Debug, Clone)]
pub struct AccessEvent {
    pub client: SocketAddr,
    pub request_id: String,
    /// Id of the backend that answered, `None` for synthetic errors.
    pub backend: Option<String>,
    pub connected_at: SystemTime,
    pub method: Method,
    pub path: String,
    pub version: Version,
    pub status: LoggedStatus,
    pub bytes: u64,
    /// Time from request start to the first body byte.
    pub first_byte: Option<Duration>,
    pub total: Duration,
    pub extra: Option<String>,
}

impl AccessEvent {
    pub fn backend_label(&self) -> &str {
        self.backend.as_deref().unwrap_or("none")
    }
}

/// Sink for access events.
pub trait AccessLog: Send + Sync + fmt::Debug {
    fn record(&self, event: &AccessEvent);
}

/// Emits every access event as an `info` event on the `access` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAccessLog;

impl AccessLog for TracingAccessLog {
    fn record(&self, event: &AccessEvent) {
        let connected_ms = event
            .connected_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        tracing::info!(
            target: "access",
            client = %event.client.ip(),
            request_id = %event.request_id,
            backend = %event.backend_label(),
            connected_ms,
            method = %event.method,
            path = %event.path,
            version = ?event.version,
            status = %event.status,
            bytes = event.bytes,
            first_byte_ms = event.first_byte.map(|d| d.as_millis() as u64),
            total_ms = event.total.as_millis() as u64,
            extra = event.extra.as_deref(),
            "request finished"
        );
    }
}
