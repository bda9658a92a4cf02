//! Interpretation of `backends` entries.
//!
//! Turns the three accepted spellings (URL string, `"cache"` marker, explicit
//! table) into one normalized description. Shared by validation and by the
//! backend registry so both read the list the same way.

use url::Url;

use crate::cache::Expiry;
use crate::config::schema::{
    BackendEntry, BackendSpec, BackendType, CacheConfig, KeyStrategy, Protocol,
};
use crate::config::validation::ValidationError;

/// Literal that selects the `[cache]` table.
pub const CACHE_MARKER: &str = "cache";

/// A backend entry with all defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedBackend {
    Server {
        proto: Protocol,
        host: String,
        port: u16,
        prefix: String,
    },
    Cache {
        driver: String,
        location: String,
        expiry: Expiry,
        key: KeyStrategy,
    },
}

impl BackendEntry {
    /// Normalize the entry at position `idx`.
    pub fn resolve(
        &self,
        idx: usize,
        cache: Option<&CacheConfig>,
    ) -> Result<ResolvedBackend, ValidationError> {
        match self {
            BackendEntry::Url(value) if value == CACHE_MARKER => {
                let cache = cache.ok_or(ValidationError::MissingCacheSection { idx })?;
                Ok(ResolvedBackend::Cache {
                    driver: cache.driver.clone(),
                    location: cache.path.clone().unwrap_or_default(),
                    expiry: cache.expire,
                    key: cache.key,
                })
            }
            BackendEntry::Url(value) => resolve_url(idx, value),
            BackendEntry::Spec(spec) => resolve_spec(idx, spec),
        }
    }
}

fn resolve_url(idx: usize, value: &str) -> Result<ResolvedBackend, ValidationError> {
    let invalid = || ValidationError::InvalidBackendString {
        idx,
        value: value.to_string(),
    };

    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(invalid());
    }
    let url = Url::parse(value).map_err(|_| invalid())?;
    let proto = match url.scheme() {
        "http" => Protocol::Http,
        "https" => Protocol::Https,
        _ => return Err(invalid()),
    };
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or(ValidationError::MissingHost { idx })?
        .to_string();

    Ok(ResolvedBackend::Server {
        proto,
        host,
        port: url.port().unwrap_or_else(|| proto.default_port()),
        prefix: url.path().to_string(),
    })
}

fn resolve_spec(idx: usize, spec: &BackendSpec) -> Result<ResolvedBackend, ValidationError> {
    let kind = match (spec.kind, &spec.host, &spec.path) {
        (Some(kind), _, _) => kind,
        (None, Some(_), _) => BackendType::Server,
        (None, None, Some(_)) => BackendType::Cache,
        (None, None, None) => return Err(ValidationError::UnknownKind { idx }),
    };

    match kind {
        BackendType::Server => {
            let host = spec
                .host
                .clone()
                .filter(|h| !h.trim().is_empty())
                .ok_or(ValidationError::MissingHost { idx })?;
            let proto = spec.proto.unwrap_or_default();
            let prefix = spec.prefix.clone().unwrap_or_else(|| "/".to_string());
            if !prefix.starts_with('/') {
                return Err(ValidationError::InvalidPrefix { idx, prefix });
            }
            Ok(ResolvedBackend::Server {
                proto,
                host,
                port: spec.port.unwrap_or_else(|| proto.default_port()),
                prefix,
            })
        }
        BackendType::Cache => {
            let defaults = CacheConfig::default();
            Ok(ResolvedBackend::Cache {
                driver: spec.driver.clone().unwrap_or(defaults.driver),
                location: spec.path.clone().unwrap_or_default(),
                expiry: spec.expire.unwrap_or(defaults.expire),
                key: spec.key.unwrap_or(defaults.key),
            })
        }
    }
}
