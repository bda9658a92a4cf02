//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single configured backend (server or cache)
//! - Track health state (Up/Down) in a status entry shared by equal ids
//! - Guarantee at most one health watcher per status entry

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crate::cache::{CacheDriver, CacheSettings};
use crate::config::Protocol;

/// Health status of a backend.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Up = 0,
    Down = 1,
}

impl From<u8> for Status {
    fn from(val: u8) -> Self {
        match val {
            1 => Status::Down,
            _ => Status::Up,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Up => f.write_str("up"),
            Status::Down => f.write_str("down"),
        }
    }
}

/// Status entry shared by every backend with the same id.
#[derive(Debug)]
pub struct HealthCell {
    status: AtomicU8,
    watching: AtomicBool,
}

impl HealthCell {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(Status::Up as u8),
            watching: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> Status {
        Status::from(self.status.load(Ordering::Acquire))
    }

    /// Move to `status`. Returns false when the entry already had it.
    pub fn transition(&self, status: Status) -> bool {
        let from = match status {
            Status::Up => Status::Down,
            Status::Down => Status::Up,
        };
        self.status
            .compare_exchange(from as u8, status as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for HealthCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Address of an upstream HTTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTarget {
    pub proto: Protocol,
    pub host: String,
    pub port: u16,
    pub prefix: String,
}

impl ServerTarget {
    /// `host:port`, as used for the Host header.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Prefix prepended to proxied paths: empty for "/", otherwise the
    /// prefix without its trailing slash.
    pub fn base_path(&self) -> &str {
        if self.prefix == "/" {
            ""
        } else {
            self.prefix.trim_end_matches('/')
        }
    }
}

/// A cache driver bound to its settings.
#[derive(Debug, Clone)]
pub struct CacheTarget {
    pub driver: Arc<dyn CacheDriver>,
    pub settings: CacheSettings,
}

#[derive(Debug, Clone)]
pub enum BackendKind {
    Server(ServerTarget),
    Cache(CacheTarget),
}

impl BackendKind {
    /// Identity of the backend. Servers: `proto://host:port/prefix`;
    /// caches: `cache@<driver identity>`.
    pub fn id(&self) -> String {
        match self {
            BackendKind::Server(s) => {
                format!("{}://{}:{}{}", s.proto, s.host, s.port, s.prefix)
            }
            BackendKind::Cache(c) => format!("cache@{}", c.driver.identify(&c.settings)),
        }
    }
}

/// A single configured backend.
#[derive(Debug)]
pub struct Backend {
    pub id: String,
    /// Position in the configured list.
    pub idx: usize,
    pub kind: BackendKind,
    health: Arc<HealthCell>,
    default: AtomicBool,
}

impl Backend {
    pub fn new(idx: usize, kind: BackendKind, health: Arc<HealthCell>) -> Self {
        Self {
            id: kind.id(),
            idx,
            kind,
            health,
            default: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> Status {
        self.health.status()
    }

    pub fn is_up(&self) -> bool {
        self.status() == Status::Up
    }

    /// Set Down. Returns true only for the call that changed the status.
    pub fn set_down(&self) -> bool {
        self.health.transition(Status::Down)
    }

    /// Set Up. Returns true only for the call that changed the status.
    pub fn set_up(&self) -> bool {
        self.health.transition(Status::Up)
    }

    pub fn is_default(&self) -> bool {
        self.default.load(Ordering::Relaxed)
    }

    pub(crate) fn flag_default(&self) {
        self.default.store(true, Ordering::Relaxed);
    }

    /// Claim the watcher slot of this status entry.
    pub fn try_begin_watch(&self) -> bool {
        self.health
            .watching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_watch(&self) {
        self.health.watching.store(false, Ordering::Release);
    }

    pub fn is_watched(&self) -> bool {
        self.health.watching.load(Ordering::Acquire)
    }

    pub fn as_server(&self) -> Option<&ServerTarget> {
        match &self.kind {
            BackendKind::Server(s) => Some(s),
            BackendKind::Cache(_) => None,
        }
    }

    pub fn as_cache(&self) -> Option<&CacheTarget> {
        match &self.kind {
            BackendKind::Cache(c) => Some(c),
            BackendKind::Server(_) => None,
        }
    }

    pub(crate) fn shares_health(&self, other: &Backend) -> bool {
        Arc::ptr_eq(&self.health, &other.health)
    }
}

#[cfg(test)]
pub(crate) fn server(idx: usize, port: u16) -> Arc<Backend> {
    Arc::new(Backend::new(
        idx,
        BackendKind::Server(ServerTarget {
            proto: Protocol::Http,
            host: "127.0.0.1".to_string(),
            port,
            prefix: "/".to_string(),
        }),
        Arc::new(HealthCell::new()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_id_and_paths() {
        let b = server(0, 8080);
        assert_eq!(b.id, "http://127.0.0.1:8080/");
        let target = b.as_server().unwrap();
        assert_eq!(target.base_path(), "");
        assert_eq!(target.authority(), "127.0.0.1:8080");

        let prefixed = ServerTarget {
            prefix: "/api/".to_string(),
            ..target.clone()
        };
        assert_eq!(prefixed.base_path(), "/api");
    }

    #[test]
    fn transitions_are_idempotent() {
        let b = server(0, 8080);
        assert!(b.is_up());
        assert!(!b.set_up());
        assert!(b.set_down());
        assert!(!b.set_down());
        assert_eq!(b.status(), Status::Down);
        assert!(b.set_up());
        assert!(b.is_up());
    }

    #[test]
    fn shared_cell_shares_status_and_watch() {
        let cell = Arc::new(HealthCell::new());
        let kind = server(0, 80).kind.clone();
        let a = Backend::new(0, kind.clone(), cell.clone());
        let b = Backend::new(1, kind, cell);

        assert!(a.set_down());
        assert_eq!(b.status(), Status::Down);
        assert!(!b.set_down());

        assert!(a.try_begin_watch());
        assert!(!b.try_begin_watch());
        assert!(b.is_watched());
        a.end_watch();
        assert!(b.try_begin_watch());
    }
}
