//! Backend model and selection subsystem.
//!
//! # Data Flow
//! ```text
//! ProxyConfig.backends
//!     → registry.rs (resolve entries, bind cache drivers, share status entries)
//!     → Vec<Arc<Backend>> in configuration order
//!
//! Election (global switch or per-request jump):
//!     Up candidates in idx order
//!     → SelectStrategy::choose
//!         - first.rs (first candidate)
//!         - random.rs (uniformly random candidate)
//!     → elected backend, or none
//! ```
//!
//! # Design Decisions
//! - Strategies are stateless functions over the ordered candidate list
//! - Callers filter candidates; strategies never look at health
//! - Status lives in an atomic entry shared by backends with equal ids

pub mod backend;
pub mod first;
pub mod random;
pub mod registry;

use std::fmt;
use std::sync::Arc;

pub use backend::{Backend, BackendKind, CacheTarget, HealthCell, ServerTarget, Status};
pub use first::FirstAvailable;
pub use random::RandomChoice;
pub use registry::BackendRegistry;

use crate::config::StrategyKind;

/// Picks one backend out of the candidates it is given.
pub trait SelectStrategy: Send + Sync + fmt::Debug {
    /// Must return one of `candidates`, or `None` when it is empty.
    fn choose(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}

/// Build the strategy selected in configuration.
pub fn strategy_for(kind: StrategyKind) -> Arc<dyn SelectStrategy> {
    match kind {
        StrategyKind::First => Arc::new(FirstAvailable),
        StrategyKind::Random => Arc::new(RandomChoice),
    }
}
