//! Response body tracking.
//!
//! Wraps the upstream body stream that is handed to the client. Counts bytes,
//! notes the first chunk, optionally keeps a copy for the cache, and reports
//! exactly one [`ProxyCompletion`] when the stream ends, fails, or is dropped.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use futures_util::Stream;
use tokio::sync::oneshot;

use crate::cache::CachedAnswer;

/// How a proxied response body ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Every byte reached the client.
    Complete,
    /// The upstream failed mid-body.
    Failed(String),
    /// The client went away before the body ended.
    Aborted,
}

/// Final record of a forwarded request.
#[derive(Debug)]
pub struct ProxyCompletion {
    pub status: StatusCode,
    pub end: StreamEnd,
    pub transferred: u64,
    /// First body chunk; `None` for an empty body.
    pub first_byte: Option<Instant>,
    pub finished: Instant,
    /// The full answer, when capture was requested and the body completed.
    pub answer: Option<CachedAnswer>,
}

struct Capture {
    headers: HeaderMap,
    body: Vec<u8>,
}

pub struct TrackedStream<S> {
    inner: S,
    status: StatusCode,
    /// Body length announced by the upstream, if any.
    expected: Option<u64>,
    transferred: u64,
    first_byte: Option<Instant>,
    capture: Option<Capture>,
    completion: Option<oneshot::Sender<ProxyCompletion>>,
}

impl<S> TrackedStream<S> {
    /// `capture` holds the response headers to store alongside the body.
    /// An `expected` length of zero completes the stream immediately.
    pub fn new(
        inner: S,
        status: StatusCode,
        expected: Option<u64>,
        capture: Option<HeaderMap>,
        completion: oneshot::Sender<ProxyCompletion>,
    ) -> Self {
        let mut stream = Self {
            inner,
            status,
            expected,
            transferred: 0,
            first_byte: None,
            capture: capture.map(|headers| Capture {
                headers,
                body: Vec::new(),
            }),
            completion: Some(completion),
        };
        if expected == Some(0) {
            stream.finish(StreamEnd::Complete);
        }
        stream
    }

    fn finish(&mut self, end: StreamEnd) {
        let Some(completion) = self.completion.take() else {
            return;
        };

        let answer = match (&end, self.capture.take()) {
            (StreamEnd::Complete, Some(capture)) => Some(CachedAnswer {
                status: self.status,
                headers: capture.headers,
                body: Bytes::from(capture.body),
            }),
            _ => None,
        };

        let _ = completion.send(ProxyCompletion {
            status: self.status,
            end,
            transferred: self.transferred,
            first_byte: self.first_byte,
            finished: Instant::now(),
            answer,
        });
    }
}

impl<S, E> Stream for TrackedStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: fmt::Display,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if this.first_byte.is_none() {
                    this.first_byte = Some(Instant::now());
                }
                this.transferred += chunk.len() as u64;
                if let Some(capture) = &mut this.capture {
                    capture.body.extend_from_slice(&chunk);
                }
                // the server may stop polling once the announced length is sent
                if this.expected == Some(this.transferred) {
                    this.finish(StreamEnd::Complete);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish(StreamEnd::Failed(e.to_string()));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(StreamEnd::Complete);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for TrackedStream<S> {
    fn drop(&mut self) {
        self.finish(StreamEnd::Aborted);
    }
}
