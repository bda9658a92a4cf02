//! Metrics collection and exposition.
//!
//! # Metrics
//! - `failover_proxy_failover_total` (counter): answers served by a backend
//!   other than the default
//! - `failover_proxy_cache_hits_total` (counter): answers served from cache
//! - `failover_proxy_failed_total` (counter): synthetic errors and mid-stream
//!   failures
//! - `failover_proxy_backend_up` (gauge): 1=up, 0=down, per backend id

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_backend_status(backend: &str, up: bool) {
    gauge!("failover_proxy_backend_up", "backend" => backend.to_string())
        .set(if up { 1.0 } else { 0.0 });
}

/// Process-lifetime request counters.
#[derive(Debug, Default)]
pub struct Stats {
    failover: AtomicU64,
    cache: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub failover: u64,
    pub cache: u64,
    pub failed: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failover(&self) {
        self.failover.fetch_add(1, Ordering::Relaxed);
        counter!("failover_proxy_failover_total").increment(1);
    }

    pub fn record_cache(&self) {
        self.cache.fetch_add(1, Ordering::Relaxed);
        counter!("failover_proxy_cache_hits_total").increment(1);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        counter!("failover_proxy_failed_total").increment(1);
    }

    pub fn failover(&self) -> u64 {
        self.failover.load(Ordering::Relaxed)
    }

    pub fn cache(&self) -> u64 {
        self.cache.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            failover: self.failover(),
            cache: self.cache(),
            failed: self.failed(),
        }
    }
}
