//! Per-request failover state.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use axum::body::Bytes;

use crate::load_balancer::Backend;

/// Everything the dispatcher needs to retry one request on other backends.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub client: SocketAddr,
    pub connected_at: SystemTime,
    pub started: Instant,
    /// Backend assigned to this request. May differ from the global one
    /// after a jump.
    pub current: Option<Arc<Backend>>,
    /// Buffered client body, replayed on every attempt.
    pub body: Bytes,
    jumped: HashSet<usize>,
}

impl RequestContext {
    pub fn new(
        request_id: String,
        client: SocketAddr,
        current: Option<Arc<Backend>>,
        body: Bytes,
    ) -> Self {
        Self {
            request_id,
            client,
            connected_at: SystemTime::now(),
            started: Instant::now(),
            current,
            body,
            jumped: HashSet::new(),
        }
    }

    /// Exclude `idx` from the rest of this request.
    pub fn mark_jumped(&mut self, idx: usize) {
        self.jumped.insert(idx);
    }

    pub fn has_jumped(&self, idx: usize) -> bool {
        self.jumped.contains(&idx)
    }

    pub fn jumped_count(&self) -> usize {
        self.jumped.len()
    }
}
