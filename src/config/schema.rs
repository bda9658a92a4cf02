//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from TOML files, and
//! every table rejects unknown fields.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::Expiry;

/// Root configuration for the failover proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// Ordered backend list. The position of an entry is its `idx`.
    pub backends: Vec<BackendEntry>,

    /// Strategy used to elect a backend among the healthy candidates.
    pub select_strategy: StrategyKind,

    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Settings for the `"cache"` shorthand in `backends`.
    pub cache: Option<CacheConfig>,

    /// Timing of the proxy and of the health watcher.
    pub timeouts: TimeoutConfig,

    /// Changes applied to every outbound request.
    pub pre_proxy: PreProxyConfig,

    /// Overrides for synthetic error responses, keyed by code (e.g. "503.1").
    pub errors: BTreeMap<String, ErrorPageConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest client request body buffered for replay, in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

/// One entry of the `backends` list.
///
/// ```toml
/// backends = [
///     "http://10.0.0.1:8080/",
///     "cache",
///     { host = "10.0.0.2", port = 8080, prefix = "/api" },
///     { type = "cache", path = "/var/cache/other", expire = "never" },
/// ]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BackendEntry {
    /// A server URL, or the literal `"cache"`.
    Url(String),
    /// An explicit table.
    Spec(BackendSpec),
}

/// Explicit backend definition.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackendSpec {
    /// Inferred when absent: `host` means server, `path` means cache.
    #[serde(rename = "type")]
    pub kind: Option<BackendType>,

    pub host: Option<String>,
    pub proto: Option<Protocol>,
    pub port: Option<u16>,
    pub prefix: Option<String>,

    pub path: Option<String>,
    pub driver: Option<String>,
    pub expire: Option<Expiry>,
    pub key: Option<KeyStrategy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Server,
    Cache,
}

/// Upstream protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of the request forms the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    /// Path and query string.
    #[default]
    Url,
    /// Path only.
    Path,
}

/// Backend election strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// First healthy candidate in configuration order.
    #[default]
    First,
    /// Uniformly random healthy candidate.
    Random,
}

/// The `[cache]` table used by the `"cache"` backend shorthand.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Registered driver name.
    pub driver: String,

    /// Storage location (a directory for the `fs` driver).
    pub path: Option<String>,

    /// Entry lifetime in milliseconds, or "never".
    pub expire: Expiry,

    pub key: KeyStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            driver: crate::cache::fs::DRIVER_NAME.to_string(),
            path: None,
            expire: Expiry::default(),
            key: KeyStrategy::default(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Delay between two probes of a down backend.
    pub backend_watch_interval_ms: u64,

    /// Timeout of a single health probe.
    pub http_test_timeout_ms: u64,

    /// Time allowed for a backend to start answering a proxied request.
    pub http_timeout_ms: u64,
}

impl TimeoutConfig {
    pub fn backend_watch_interval(&self) -> Duration {
        Duration::from_millis(self.backend_watch_interval_ms)
    }

    pub fn http_test_timeout(&self) -> Duration {
        Duration::from_millis(self.http_test_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            backend_watch_interval_ms: 1000,
            http_test_timeout_ms: 1000,
            http_timeout_ms: 5000,
        }
    }
}

/// Changes applied to outbound requests just before they are sent.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreProxyConfig {
    /// Headers inserted (or overwritten) on every outbound request.
    pub set_headers: BTreeMap<String, String>,

    /// Replace the client's Host header with the backend's host and port.
    pub rewrite_host: bool,
}

/// Override for one synthetic error response.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ErrorPageConfig {
    pub headers: BTreeMap<String, String>,

    /// Response body. Falls back to "HTTP error <code>." when absent.
    pub document: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
