//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate request IDs (`<unix-millis>.<seq>`)
//! - Stamp the client address into `X-Forwarded-For`
//! - Pre-proxy hooks: last-moment changes to the outbound request
//!
//! # Design Decisions
//! - Request ID assigned as early as possible for tracing
//! - The client request is never mutated by hooks; they see the outbound copy

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request};

use crate::config::PreProxyConfig;
use crate::load_balancer::ServerTarget;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// The sequence restarts at zero when it reaches this value.
const SEQ_WRAP: u32 = 2_147_483_647;

/// Produces request IDs of the form `<unix-millis>.<seq>`.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    seq: AtomicU32,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn starting_at(seq: u32) -> Self {
        Self {
            seq: AtomicU32::new(seq),
        }
    }

    fn next_seq(&self) -> u32 {
        let step = |n: u32| Some(if n + 1 >= SEQ_WRAP { 0 } else { n + 1 });
        match self.seq.fetch_update(Ordering::Relaxed, Ordering::Relaxed, step) {
            Ok(prev) | Err(prev) => prev,
        }
    }

    pub fn next_id(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("{}.{}", millis, self.next_seq())
    }
}

/// Overwrite `X-Forwarded-For` with the client address.
pub fn set_forwarded_for(headers: &mut HeaderMap, client: IpAddr) {
    if let Ok(value) = HeaderValue::from_str(&client.to_string()) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// Runs on every outbound request right before it is sent.
pub trait PreProxyHook: Send + Sync + fmt::Debug {
    fn apply(&self, request: &mut Request<Body>, target: &ServerTarget);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl PreProxyHook for NoopHook {
    fn apply(&self, _request: &mut Request<Body>, _target: &ServerTarget) {}
}

/// Sets fixed headers and optionally points Host at the backend.
#[derive(Debug, Clone, Default)]
pub struct HeaderHook {
    headers: HeaderMap,
    rewrite_host: bool,
}

impl HeaderHook {
    pub fn new(headers: HeaderMap, rewrite_host: bool) -> Self {
        Self {
            headers,
            rewrite_host,
        }
    }
}

impl PreProxyHook for HeaderHook {
    fn apply(&self, request: &mut Request<Body>, target: &ServerTarget) {
        let headers = request.headers_mut();
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        if self.rewrite_host {
            let host = if target.port == target.proto.default_port() {
                target.host.clone()
            } else {
                target.authority()
            };
            if let Ok(value) = HeaderValue::from_str(&host) {
                headers.insert(header::HOST, value);
            }
        }
    }
}

/// Build the hook described by `[pre_proxy]`.
pub fn hook_from_config(config: &PreProxyConfig) -> Arc<dyn PreProxyHook> {
    if config.set_headers.is_empty() && !config.rewrite_host {
        return Arc::new(NoopHook);
    }

    let mut headers = HeaderMap::new();
    for (name, value) in &config.set_headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Ignoring invalid pre-proxy header"),
        }
    }
    Arc::new(HeaderHook::new(headers, config.rewrite_host))
}
