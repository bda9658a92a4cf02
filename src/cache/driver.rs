//! Cache driver contract and the driver registry.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::fs::{FilesystemDriver, DRIVER_NAME as FS_DRIVER};
use crate::cache::{CacheSettings, CachedAnswer};

/// Errors reported by cache drivers.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache settings: {0}")]
    InvalidSettings(String),

    #[error("cache I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache entry '{}' is not a regular file", .0.display())]
    NotAFile(PathBuf),

    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Result of a store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The entry was written.
    Stored,
    /// Another write for the same entry was in flight; this one was dropped.
    Skipped,
}

/// Pluggable cache storage.
///
/// `validate` and `identify` run once at startup while the backend registry
/// is built; `store` and `retrieve` run per request.
#[async_trait]
pub trait CacheDriver: Send + Sync + fmt::Debug {
    /// Reject unusable settings before the proxy starts.
    fn validate(&self, settings: &CacheSettings) -> Result<(), CacheError>;

    /// Stable identity of the storage, used to build the backend id.
    fn identify(&self, settings: &CacheSettings) -> String;

    async fn store(
        &self,
        key: &str,
        answer: &CachedAnswer,
        settings: &CacheSettings,
    ) -> Result<StoreOutcome, CacheError>;

    /// `Ok(None)` is a miss.
    async fn retrieve(
        &self,
        key: &str,
        settings: &CacheSettings,
    ) -> Result<Option<CachedAnswer>, CacheError>;
}

/// Named cache drivers available to the backend registry.
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn CacheDriver>>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the filesystem driver registered as `"fs"`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(FS_DRIVER, Arc::new(FilesystemDriver::new()));
        registry
    }

    /// Register a driver, returning the one it replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        driver: Arc<dyn CacheDriver>,
    ) -> Option<Arc<dyn CacheDriver>> {
        self.drivers.insert(name.into(), driver)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CacheDriver>> {
        self.drivers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_include_filesystem_driver() {
        let registry = DriverRegistry::with_defaults();
        assert!(registry.get("fs").is_some());
        assert!(registry.get("memcached").is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["fs"]);
    }

    #[test]
    fn register_replaces_existing_driver() {
        let mut registry = DriverRegistry::with_defaults();
        let previous = registry.register("fs", Arc::new(FilesystemDriver::new()));
        assert!(previous.is_some());
    }
}
