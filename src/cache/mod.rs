//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! Cache read (cache backend is current for a request):
//!     key.rs (request → cache key)
//!     → driver.rs (CacheDriver::retrieve)
//!     → fs.rs (stat, expiry check, read)
//!     → codec.rs (decode)
//!     → answer, or miss → request jumps to the next backend
//!
//! Cache write (proxied GET completed):
//!     captured status/headers/body
//!     → every cache backend: CacheDriver::store
//!     → codec.rs (encode) → temp file → rename
//! ```
//!
//! # Design Decisions
//! - Drivers are resolved by name through an explicit [`DriverRegistry`]
//! - A decode failure is a miss, not an error
//! - Writes never affect the client response

pub mod codec;
pub mod driver;
pub mod fs;
pub mod key;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};

pub use driver::{CacheDriver, CacheError, DriverRegistry, StoreOutcome};
pub use fs::FilesystemDriver;
pub use key::{KeyGenerator, PathKey, UrlKey};

/// A response as stored in and served from a cache backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAnswer {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// How long a cache entry stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ExpiryRepr", into = "ExpiryRepr")]
pub enum Expiry {
    Never,
    After(Duration),
}

impl Expiry {
    /// True when an entry last modified at `modified` is stale at `now`.
    pub fn is_expired(&self, modified: SystemTime, now: SystemTime) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::After(ttl) => now
                .duration_since(modified)
                .map(|age| age > *ttl)
                .unwrap_or(false),
        }
    }
}

impl Default for Expiry {
    fn default() -> Self {
        Expiry::After(Duration::from_millis(600_000))
    }
}

/// Config representation: milliseconds, or the keyword `"never"`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ExpiryRepr {
    Millis(u64),
    Keyword(String),
}

impl TryFrom<ExpiryRepr> for Expiry {
    type Error = String;

    fn try_from(repr: ExpiryRepr) -> Result<Self, Self::Error> {
        match repr {
            ExpiryRepr::Millis(ms) => Ok(Expiry::After(Duration::from_millis(ms))),
            ExpiryRepr::Keyword(word) if word == "never" => Ok(Expiry::Never),
            ExpiryRepr::Keyword(word) => Err(format!(
                "invalid expiry '{}', expected milliseconds or \"never\"",
                word
            )),
        }
    }
}

impl From<Expiry> for ExpiryRepr {
    fn from(expiry: Expiry) -> Self {
        match expiry {
            Expiry::Never => ExpiryRepr::Keyword("never".to_string()),
            Expiry::After(ttl) => ExpiryRepr::Millis(ttl.as_millis() as u64),
        }
    }
}

/// Per-backend cache settings handed to the driver on every call.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Name the driver was registered under.
    pub driver: String,
    /// Storage location. A directory for the filesystem driver.
    pub location: String,
    pub expiry: Expiry,
    pub key: Arc<dyn KeyGenerator>,
}

impl CacheSettings {
    /// The location interpreted as a filesystem path.
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_compares_age_against_ttl() {
        let now = SystemTime::now();
        let ttl = Expiry::After(Duration::from_secs(10));
        assert!(!ttl.is_expired(now - Duration::from_secs(5), now));
        assert!(ttl.is_expired(now - Duration::from_secs(11), now));
        assert!(!Expiry::Never.is_expired(now - Duration::from_secs(86_400 * 365), now));
    }

    #[test]
    fn modification_in_the_future_is_not_expired() {
        let now = SystemTime::now();
        let ttl = Expiry::After(Duration::from_millis(1));
        assert!(!ttl.is_expired(now + Duration::from_secs(60), now));
    }

    #[test]
    fn expiry_deserializes_from_millis_or_never() {
        #[derive(Deserialize)]
        struct Wrapper {
            expire: Expiry,
        }

        let w: Wrapper = toml::from_str("expire = 1500").unwrap();
        assert_eq!(w.expire, Expiry::After(Duration::from_millis(1500)));

        let w: Wrapper = toml::from_str(r#"expire = "never""#).unwrap();
        assert_eq!(w.expire, Expiry::Never);

        assert!(toml::from_str::<Wrapper>(r#"expire = "soon""#).is_err());
    }
}
