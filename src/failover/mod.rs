//! Failover subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     select_default → registry.mark_default → global current
//!
//! Backend failure (connect error, timeout, mid-stream error):
//!     mark_down → HealthMonitor::watch (servers)
//!               → switch_global → strategy over the Up set
//!     request retried on the new global backend, or jump()s
//!
//! Cache miss:
//!     jump → strategy over {Up, not yet tried for this request}
//!
//! Recovery (probe success, successful answer):
//!     mark_up → switch_global
//! ```
//!
//! # Design Decisions
//! - Global state changes only through mark_up/mark_down; jump is per request
//! - Status transitions are single compare-exchanges, so both marks are
//!   idempotent and a backend gets at most one watcher

pub mod context;
pub mod controller;

pub use context::RequestContext;
pub use controller::FailoverController;
