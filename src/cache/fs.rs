//! Filesystem cache driver.
//!
//! # Layout
//! ```text
//! <location>/
//!   <sha256(key) hex>.cache       complete entries
//!   <sha256(key) hex>.cache.tmp   entries being written
//! ```
//!
//! # Design Decisions
//! - Writes go to a `.tmp` sibling and are renamed into place, so readers
//!   only ever see complete files
//! - One writer per entry: a store for an entry already being written is
//!   dropped, not queued
//! - Expired entries are reported as misses and unlinked in the background

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use dashmap::DashSet;
use sha2::{Digest, Sha256};

use crate::cache::codec;
use crate::cache::driver::{CacheDriver, CacheError, StoreOutcome};
use crate::cache::{CacheSettings, CachedAnswer};

/// Name the filesystem driver is registered under.
pub const DRIVER_NAME: &str = "fs";

const ENTRY_EXTENSION: &str = "cache";
const TEMP_SUFFIX: &str = ".tmp";

/// Stores one file per cache key under the backend's directory.
#[derive(Debug, Default)]
pub struct FilesystemDriver {
    /// Final paths with a write in flight.
    writing: Arc<DashSet<PathBuf>>,
}

impl FilesystemDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the entry for `key` under `dir`.
    pub fn entry_path(dir: &Path, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        dir.join(format!("{}.{}", digest, ENTRY_EXTENSION))
    }

    fn temp_path(entry: &Path) -> PathBuf {
        let mut name = entry.as_os_str().to_owned();
        name.push(TEMP_SUFFIX);
        PathBuf::from(name)
    }

    /// Claim the right to write `entry`. `None` if someone else holds it.
    fn begin_write(&self, entry: &Path) -> Option<WriteGuard> {
        if self.writing.insert(entry.to_path_buf()) {
            Some(WriteGuard {
                writing: Arc::clone(&self.writing),
                entry: entry.to_path_buf(),
            })
        } else {
            None
        }
    }
}

/// Releases the in-flight claim when the write ends, however it ends.
struct WriteGuard {
    writing: Arc<DashSet<PathBuf>>,
    entry: PathBuf,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.writing.remove(&self.entry);
    }
}

#[async_trait]
impl CacheDriver for FilesystemDriver {
    fn validate(&self, settings: &CacheSettings) -> Result<(), CacheError> {
        if settings.location.trim().is_empty() {
            return Err(CacheError::InvalidSettings(
                "cache backend using the 'fs' driver has no path".to_string(),
            ));
        }

        let dir = settings.path();
        match std::fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(CacheError::InvalidSettings(format!(
                "cache path '{}' is not a directory",
                dir.display()
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                std::fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
                    path: dir.clone(),
                    source,
                })?;
                tracing::info!(path = %dir.display(), "Created cache directory");
                Ok(())
            }
            Err(source) => Err(CacheError::Io { path: dir, source }),
        }
    }

    fn identify(&self, settings: &CacheSettings) -> String {
        settings.location.clone()
    }

    async fn store(
        &self,
        key: &str,
        answer: &CachedAnswer,
        settings: &CacheSettings,
    ) -> Result<StoreOutcome, CacheError> {
        let entry = Self::entry_path(&settings.path(), key);
        let Some(_guard) = self.begin_write(&entry) else {
            tracing::debug!(key, path = %entry.display(), "Entry already being written, skipping");
            return Ok(StoreOutcome::Skipped);
        };

        let temp = Self::temp_path(&entry);
        if let Err(source) = tokio::fs::write(&temp, codec::encode(answer)).await {
            tracing::error!(path = %temp.display(), error = %source, "Error writing cache file");
            return Err(CacheError::Io { path: temp, source });
        }

        if let Err(source) = tokio::fs::rename(&temp, &entry).await {
            tracing::error!(
                from = %temp.display(),
                to = %entry.display(),
                error = %source,
                "Error moving cache file into place"
            );
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(CacheError::Io { path: entry, source });
        }

        tracing::debug!(key, path = %entry.display(), "Cache entry written");
        Ok(StoreOutcome::Stored)
    }

    async fn retrieve(
        &self,
        key: &str,
        settings: &CacheSettings,
    ) -> Result<Option<CachedAnswer>, CacheError> {
        let entry = Self::entry_path(&settings.path(), key);

        let meta = match tokio::fs::metadata(&entry).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(key, "Item not in cache");
                return Ok(None);
            }
            Err(source) => {
                tracing::warn!(path = %entry.display(), error = %source, "Cannot access cache file");
                return Err(CacheError::Io { path: entry, source });
            }
        };

        if !meta.is_file() {
            tracing::warn!(path = %entry.display(), "Cache entry exists but is not a file");
            return Err(CacheError::NotAFile(entry));
        }

        let modified = meta.modified().map_err(|source| CacheError::Io {
            path: entry.clone(),
            source,
        })?;
        if settings.expiry.is_expired(modified, SystemTime::now()) {
            tracing::debug!(key, path = %entry.display(), "Cache entry expired, deleting it");
            tokio::spawn(async move {
                if let Err(e) = tokio::fs::remove_file(&entry).await {
                    tracing::debug!(path = %entry.display(), error = %e, "Failed to unlink expired entry");
                }
            });
            return Ok(None);
        }

        let data = match tokio::fs::read(&entry).await {
            Ok(data) => data,
            // Unlinked between stat and read.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                tracing::error!(path = %entry.display(), error = %source, "Error reading cache file");
                return Err(CacheError::Io { path: entry, source });
            }
        };

        match codec::decode(&data) {
            Ok(answer) => Ok(Some(answer)),
            Err(e) => {
                tracing::warn!(path = %entry.display(), error = %e, "Undecodable cache entry, treating as miss");
                Ok(None)
            }
        }
    }
}
