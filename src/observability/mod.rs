//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (structured fields: backend, idx, request_id, error)
//!     → logging.rs (subscriber setup, one access event per request)
//!     → metrics.rs (failover/cache/failed counters, backend status gauges)
//!
//! Consumers:
//!     → stdout via tracing-subscriber's fmt layer
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows from the dispatcher into every event of a request
//! - Counters are plain atomics mirrored to the `metrics` facade, so they can
//!   be read in-process without an exporter installed

pub mod logging;
pub mod metrics;

pub use self::logging::{AccessEvent, AccessLog, LoggedStatus, TracingAccessLog};
pub use self::metrics::{Stats, StatsSnapshot};
