//! Failover HTTP reverse proxy library.

pub mod cache;
pub mod config;
pub mod failover;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;

pub use cache::DriverRegistry;
pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
