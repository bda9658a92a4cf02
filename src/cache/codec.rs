//! Binary encoding of cached responses.
//!
//! # Layout
//! ```text
//! [4 bytes: big-endian length H of the header block]
//! [H bytes: UTF-8 "<3-digit status>," + JSON object of headers]
//! [remaining bytes: raw response body]
//! ```
//!
//! Repeated headers are stored as a JSON array of strings, single ones as a
//! plain string. Header values are stored as latin1, one char per byte, so
//! obs-text bytes survive. Any driver that wants files compatible with the filesystem
//! driver can reuse [`encode`] and [`decode`].

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::cache::CachedAnswer;

const LENGTH_PREFIX: usize = 4;
const STATUS_DIGITS: usize = 3;

/// Errors raised while decoding a cache blob.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cache blob truncated ({0})")]
    Truncated(&'static str),

    #[error("invalid status code in cache blob")]
    InvalidStatus,

    #[error("malformed header block: {0}")]
    Headers(#[from] serde_json::Error),

    #[error("invalid header '{0}' in cache blob")]
    InvalidHeader(String),
}

/// Encode an answer into the on-disk representation.
pub fn encode(answer: &CachedAnswer) -> Vec<u8> {
    let mut block = format!("{},", answer.status.as_u16()).into_bytes();
    block.extend_from_slice(Value::Object(headers_to_json(&answer.headers)).to_string().as_bytes());

    let mut out = Vec::with_capacity(LENGTH_PREFIX + block.len() + answer.body.len());
    out.extend_from_slice(&(block.len() as u32).to_be_bytes());
    out.extend_from_slice(&block);
    out.extend_from_slice(&answer.body);
    out
}

/// Decode a blob produced by [`encode`].
pub fn decode(data: &[u8]) -> Result<CachedAnswer, CodecError> {
    let prefix: [u8; LENGTH_PREFIX] = data
        .get(..LENGTH_PREFIX)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(CodecError::Truncated("length prefix"))?;
    let head_len = u32::from_be_bytes(prefix) as usize;
    let body_start = LENGTH_PREFIX + head_len;

    let block = data
        .get(LENGTH_PREFIX..body_start)
        .ok_or(CodecError::Truncated("header block"))?;

    let status = block
        .get(..STATUS_DIGITS)
        .and_then(|digits| std::str::from_utf8(digits).ok())
        .and_then(|digits| digits.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or(CodecError::InvalidStatus)?;

    // Skip the status digits and the separating comma.
    let json = block
        .get(STATUS_DIGITS + 1..)
        .ok_or(CodecError::Truncated("header block"))?;
    let object: Map<String, Value> = serde_json::from_slice(json)?;

    Ok(CachedAnswer {
        status,
        headers: headers_from_json(object)?,
        body: Bytes::copy_from_slice(&data[body_start..]),
    })
}

fn headers_to_json(headers: &HeaderMap) -> Map<String, Value> {
    let mut object = Map::new();
    for name in headers.keys() {
        let mut values: Vec<Value> = headers
            .get_all(name)
            .iter()
            .map(|v| Value::String(v.as_bytes().iter().map(|&b| b as char).collect()))
            .collect();
        let value = if values.len() == 1 {
            values.remove(0)
        } else {
            Value::Array(values)
        };
        object.insert(name.as_str().to_string(), value);
    }
    object
}

fn headers_from_json(object: Map<String, Value>) -> Result<HeaderMap, CodecError> {
    let mut headers = HeaderMap::with_capacity(object.len());
    for (name, value) in object {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| CodecError::InvalidHeader(name.clone()))?;
        let values = match value {
            Value::String(single) => vec![single],
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    _ => Err(CodecError::InvalidHeader(name.clone())),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(CodecError::InvalidHeader(name)),
        };
        for value in values {
            let bytes = value
                .chars()
                .map(|c| u8::try_from(c).map_err(|_| CodecError::InvalidHeader(name.clone())))
                .collect::<Result<Vec<u8>, _>>()?;
            let header_value = HeaderValue::from_bytes(&bytes)
                .map_err(|_| CodecError::InvalidHeader(name.clone()))?;
            headers.append(header_name.clone(), header_value);
        }
    }
    Ok(headers)
}
