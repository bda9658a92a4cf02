//! Response construction.
//!
//! # Responsibilities
//! - Synthetic error codes ("503.1") and their configurable pages
//! - Mark every answer with its origin (`x-cache`)
//! - Turn cached answers back into client responses

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};

use crate::cache::CachedAnswer;
use crate::config::ErrorPageConfig;

/// Origin marker header.
pub const X_CACHE: &str = "x-cache";
pub const FROM_PROXY: &str = "From proxy";
pub const FROM_CACHE: &str = "From cache";

/// A synthetic error code: an HTTP status with an optional detail digit,
/// written `503.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    pub status: u16,
    pub detail: Option<u8>,
}

impl ErrorCode {
    /// No backend is left to serve the request.
    pub const NO_BACKEND: ErrorCode = ErrorCode {
        status: 503,
        detail: Some(1),
    };

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
    }

    /// Body used when no document is configured.
    pub fn fallback_document(&self) -> String {
        format!("HTTP error {}.", self)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail {
            Some(detail) => write!(f, "{}.{}", self.status, detail),
            None => write!(f, "{}", self.status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidErrorCode(pub String);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code '{}'", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl FromStr for ErrorCode {
    type Err = InvalidErrorCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidErrorCode(s.to_string());
        let (status, detail) = match s.split_once('.') {
            Some((status, detail)) => (status, Some(detail)),
            None => (s, None),
        };

        if status.len() != 3 || !status.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let status: u16 = status.parse().map_err(|_| invalid())?;
        if !(100..=599).contains(&status) {
            return Err(invalid());
        }
        let detail = match detail {
            Some(d) if !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()) => {
                Some(d.parse::<u8>().map_err(|_| invalid())?)
            }
            Some(_) => return Err(invalid()),
            None => None,
        };

        Ok(ErrorCode { status, detail })
    }
}

#[derive(Debug, Clone)]
struct ErrorPage {
    headers: HeaderMap,
    document: Option<Bytes>,
}

/// Configured overrides for synthetic errors.
#[derive(Debug, Clone, Default)]
pub struct ErrorPages {
    pages: HashMap<ErrorCode, ErrorPage>,
}

impl ErrorPages {
    pub fn from_config(errors: &BTreeMap<String, ErrorPageConfig>) -> Self {
        let mut pages = HashMap::new();
        for (code, page) in errors {
            let Ok(code) = code.parse::<ErrorCode>() else {
                tracing::warn!(code = %code, "Ignoring error page with invalid code");
                continue;
            };

            let mut headers = HeaderMap::new();
            for (name, value) in &page.headers {
                match (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    (Ok(name), Ok(value)) => {
                        headers.insert(name, value);
                    }
                    _ => tracing::warn!(code = %code, header = %name, "Ignoring invalid error page header"),
                }
            }

            pages.insert(
                code,
                ErrorPage {
                    headers,
                    document: page.document.clone().map(Bytes::from),
                },
            );
        }
        Self { pages }
    }

    /// Build the response for `code`. Also returns the body length.
    pub fn render(&self, code: ErrorCode) -> (Response<Body>, u64) {
        let (headers, document) = match self.pages.get(&code) {
            Some(page) => (
                page.headers.clone(),
                page.document
                    .clone()
                    .unwrap_or_else(|| Bytes::from(code.fallback_document())),
            ),
            None => {
                let mut headers = HeaderMap::new();
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                );
                (headers, Bytes::from(code.fallback_document()))
            }
        };

        let len = document.len() as u64;
        let mut response = Response::new(Body::from(document));
        *response.status_mut() = code.status_code();
        *response.headers_mut() = headers;
        (response, len)
    }
}

/// Set the origin marker on a response header map.
pub fn mark_origin(headers: &mut HeaderMap, origin: &'static str) {
    headers.insert(X_CACHE, HeaderValue::from_static(origin));
}

/// Client response for an answer served from a cache backend.
pub fn from_cache(answer: CachedAnswer) -> Response<Body> {
    let mut response = Response::new(Body::from(answer.body));
    *response.status_mut() = answer.status;
    *response.headers_mut() = answer.headers;
    mark_origin(response.headers_mut(), FROM_CACHE);
    response
}
