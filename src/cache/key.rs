//! Cache key generation.

use std::fmt;
use std::sync::Arc;

use axum::http::request::Parts;

use crate::config::KeyStrategy;

/// Key used when a generator produces an empty string.
pub const EMPTY_KEY: &str = "NO_HASH";

/// Derives the cache key for a request.
pub trait KeyGenerator: Send + Sync + fmt::Debug {
    fn key(&self, request: &Parts) -> String;
}

/// Path plus query string, exactly as requested.
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlKey;

impl KeyGenerator for UrlKey {
    fn key(&self, request: &Parts) -> String {
        request
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| request.uri.path().to_string())
    }
}

/// Path only; the query string does not take part in the key.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathKey;

impl KeyGenerator for PathKey {
    fn key(&self, request: &Parts) -> String {
        request.uri.path().to_string()
    }
}

/// Build the generator selected in configuration.
pub fn generator_for(strategy: KeyStrategy) -> Arc<dyn KeyGenerator> {
    match strategy {
        KeyStrategy::Url => Arc::new(UrlKey),
        KeyStrategy::Path => Arc::new(PathKey),
    }
}

/// Run a generator, substituting [`EMPTY_KEY`] for an empty result.
pub fn cache_key(generator: &dyn KeyGenerator, request: &Parts) -> String {
    let key = generator.key(request);
    if key.is_empty() {
        EMPTY_KEY.to_string()
    } else {
        key
    }
}
