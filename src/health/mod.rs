//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Backend marked Down (failover controller)
//!     → active.rs (claim watcher slot, spawn watch loop)
//!     → probe.rs (HEAD prefix, per-probe timeout)
//!     → failure: sleep watch interval, probe again
//!     → success: controller.mark_up → global switch
//! ```
//!
//! # Design Decisions
//! - Only down backends are probed; up backends are judged by live traffic
//! - Any HTTP answer is a success; no thresholds, no backoff

pub mod active;
pub mod probe;

pub use active::HealthMonitor;
pub use probe::{HttpProbe, Probe, ProbeError};
