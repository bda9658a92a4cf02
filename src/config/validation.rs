//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Resolve every backend entry and reject the ones that cannot be used
//! - Validate value ranges (timeouts > 0, addresses parse, headers are legal)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Cache drivers are checked later, when the backend registry is built,
//!   because driver lookup needs the driver registry

use std::net::SocketAddr;

use axum::http::{HeaderName, HeaderValue};
use thiserror::Error;

use crate::config::resolve::ResolvedBackend;
use crate::config::schema::{Protocol, ProxyConfig};
use crate::http::response::ErrorCode;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no backends configured")]
    NoBackends,

    #[error("backend {idx}: '{value}' is neither an http(s) URL nor \"cache\"")]
    InvalidBackendString { idx: usize, value: String },

    #[error("backend {idx}: server backend has no host")]
    MissingHost { idx: usize },

    #[error("backend {idx}: protocol '{proto}' is not supported")]
    UnsupportedProtocol { idx: usize, proto: Protocol },

    #[error("backend {idx}: \"cache\" used without a [cache] section")]
    MissingCacheSection { idx: usize },

    #[error("backend {idx}: cannot tell server from cache (set type, host or path)")]
    UnknownKind { idx: usize },

    #[error("backend {idx}: prefix '{prefix}' must start with '/'")]
    InvalidPrefix { idx: usize, prefix: String },

    #[error("{field}: '{value}' is not a socket address")]
    InvalidBindAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("{context}: invalid header '{name}'")]
    InvalidHeader { context: String, name: String },

    #[error("errors: '{code}' is not an error code like \"503.1\"")]
    InvalidErrorCode { code: String },
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }

    for (idx, entry) in config.backends.iter().enumerate() {
        match entry.resolve(idx, config.cache.as_ref()) {
            Ok(ResolvedBackend::Server { proto: Protocol::Https, .. }) => {
                errors.push(ValidationError::UnsupportedProtocol {
                    idx,
                    proto: Protocol::Https,
                });
            }
            Ok(_) => {}
            Err(e) => errors.push(e),
        }
    }

    check_address(
        &mut errors,
        "listener.bind_address",
        &config.listener.bind_address,
    );
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.backend_watch_interval_ms", timeouts.backend_watch_interval_ms),
        ("timeouts.http_test_timeout_ms", timeouts.http_test_timeout_ms),
        ("timeouts.http_timeout_ms", timeouts.http_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroDuration { field });
        }
    }

    check_headers(
        &mut errors,
        "pre_proxy.set_headers",
        config.pre_proxy.set_headers.iter(),
    );

    for (code, page) in &config.errors {
        if code.parse::<ErrorCode>().is_err() {
            errors.push(ValidationError::InvalidErrorCode { code: code.clone() });
        }
        check_headers(
            &mut errors,
            &format!("errors.{}.headers", code),
            page.headers.iter(),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress {
            field,
            value: value.to_string(),
        });
    }
}

fn check_headers<'a>(
    errors: &mut Vec<ValidationError>,
    context: &str,
    headers: impl Iterator<Item = (&'a String, &'a String)>,
) {
    for (name, value) in headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err()
            || HeaderValue::from_str(value).is_err()
        {
            errors.push(ValidationError::InvalidHeader {
                context: context.to_string(),
                name: name.clone(),
            });
        }
    }
}
