//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, catch-all route)
//!     → dispatcher.rs (request ID, X-Forwarded-For, body buffering)
//!     → current backend:
//!         cache  → CacheDriver::retrieve → response.rs (x-cache: From cache)
//!         server → proxy.rs (outbound request, request.rs hook, timeout)
//!                → stream.rs (tracked body, x-cache: From proxy)
//!     → failure before headers: failover, next backend
//!     → no backend left: response.rs synthetic 503.1
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod proxy;
pub mod request;
pub mod response;
pub mod server;
pub mod stream;

pub use dispatcher::RequestDispatcher;
pub use proxy::{PendingResponse, ProxyEngine, ProxyError};
pub use request::{HeaderHook, NoopHook, PreProxyHook, RequestIdGenerator};
pub use response::{ErrorCode, ErrorPages, FROM_CACHE, FROM_PROXY, X_CACHE};
pub use server::HttpServer;
pub use stream::{ProxyCompletion, StreamEnd};
