//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, via resolve.rs)
//!     → ProxyConfig (validated, immutable)
//!     → backend registry, dispatcher, health monitor
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod resolve;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use resolve::{ResolvedBackend, CACHE_MARKER};
pub use schema::{
    BackendEntry, BackendSpec, BackendType, CacheConfig, ErrorPageConfig, KeyStrategy,
    ListenerConfig, ObservabilityConfig, PreProxyConfig, Protocol, ProxyConfig, StrategyKind,
    TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
