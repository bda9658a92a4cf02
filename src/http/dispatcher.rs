//! Per-request orchestration.
//!
//! # Responsibilities
//! - Buffer the client body so it can be replayed on another backend
//! - Walk the backends: cache lookups, proxy attempts, failover
//! - Settle each forwarded request once its body has finished streaming
//!   (access log, stats, health marks, cache writes)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::http::{request::Parts, Method, Request, Response, StatusCode};
use axum::response::IntoResponse;
use tokio::sync::oneshot;

use crate::cache::key::cache_key;
use crate::cache::{CachedAnswer, StoreOutcome};
use crate::failover::{FailoverController, RequestContext};
use crate::http::proxy::ProxyEngine;
use crate::http::request::{set_forwarded_for, RequestIdGenerator};
use crate::http::response::{self, ErrorCode, ErrorPages};
use crate::http::stream::{ProxyCompletion, StreamEnd};
use crate::load_balancer::{Backend, BackendKind, CacheTarget};
use crate::observability::{AccessEvent, AccessLog, LoggedStatus, Stats};

const BODY_TOO_LARGE: &str = "Request body too large";

#[derive(Debug)]
pub struct RequestDispatcher {
    controller: Arc<FailoverController>,
    engine: ProxyEngine,
    stats: Arc<Stats>,
    errors: ErrorPages,
    access_log: Arc<dyn AccessLog>,
    ids: RequestIdGenerator,
    max_body_size: usize,
}

impl RequestDispatcher {
    pub fn new(
        controller: Arc<FailoverController>,
        engine: ProxyEngine,
        stats: Arc<Stats>,
        errors: ErrorPages,
        access_log: Arc<dyn AccessLog>,
        max_body_size: usize,
    ) -> Self {
        Self {
            controller,
            engine,
            stats,
            errors,
            access_log,
            ids: RequestIdGenerator::new(),
            max_body_size,
        }
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn controller(&self) -> &Arc<FailoverController> {
        &self.controller
    }

    /// Serve one client request.
    pub async fn dispatch(self: &Arc<Self>, client: SocketAddr, request: Request<Body>) -> Response<Body> {
        let (mut parts, body) = request.into_parts();
        set_forwarded_for(&mut parts.headers, client.ip());

        let request_id = self.ids.next_id();
        let body = match axum::body::to_bytes(body, self.max_body_size).await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "Could not buffer request body");
                let ctx = RequestContext::new(request_id, client, None, Bytes::new());
                return self.body_too_large(&ctx, &parts);
            }
        };

        let mut ctx = RequestContext::new(request_id, client, self.controller.current(), body);
        tracing::debug!(
            request_id = %ctx.request_id,
            method = %parts.method,
            path = %parts.uri,
            "Dispatching request"
        );

        loop {
            let Some(backend) = ctx.current.clone() else {
                return self.no_backend(&ctx, &parts);
            };

            match &backend.kind {
                BackendKind::Cache(cache) => {
                    if let Some(response) = self.serve_from_cache(&ctx, &parts, &backend, cache).await {
                        return response;
                    }
                    self.controller.jump(&mut ctx);
                }
                BackendKind::Server(target) => {
                    let capture = parts.method == Method::GET && self.controller.registry().has_cache();
                    match self.engine.forward(&parts, ctx.body.clone(), target, capture).await {
                        Ok(pending) => {
                            let dispatcher = self.clone();
                            let served_by = backend.clone();
                            tokio::spawn(async move {
                                dispatcher.settle(ctx, parts, served_by, pending.completion).await;
                            });
                            return pending.response;
                        }
                        Err(e) => {
                            tracing::warn!(
                                request_id = %ctx.request_id,
                                backend = %backend.id,
                                idx = backend.idx,
                                error = %e,
                                "Proxy attempt failed, failing over"
                            );
                            self.controller.fail_over(&mut ctx);
                        }
                    }
                }
            }
        }
    }

    fn no_backend(&self, ctx: &RequestContext, parts: &Parts) -> Response<Body> {
        self.stats.record_failed();
        let code = ErrorCode::NO_BACKEND;
        let (response, bytes) = self.errors.render(code);
        tracing::warn!(request_id = %ctx.request_id, "No backend left to serve request");
        self.log(ctx, parts, None, LoggedStatus::Synthetic(code), bytes, None, None);
        response
    }

    fn body_too_large(&self, ctx: &RequestContext, parts: &Parts) -> Response<Body> {
        let mut reply = (StatusCode::PAYLOAD_TOO_LARGE, BODY_TOO_LARGE).into_response();
        response::mark_origin(reply.headers_mut(), response::FROM_PROXY);
        self.log(
            ctx,
            parts,
            None,
            LoggedStatus::Http(StatusCode::PAYLOAD_TOO_LARGE),
            BODY_TOO_LARGE.len() as u64,
            None,
            Some("request body too large".to_string()),
        );
        reply
    }

    async fn serve_from_cache(
        &self,
        ctx: &RequestContext,
        parts: &Parts,
        backend: &Backend,
        cache: &CacheTarget,
    ) -> Option<Response<Body>> {
        if parts.method != Method::GET && parts.method != Method::HEAD {
            return None;
        }

        let key = cache_key(cache.settings.key.as_ref(), parts);
        match cache.driver.retrieve(&key, &cache.settings).await {
            Ok(Some(answer)) => {
                self.stats.record_cache();
                tracing::debug!(
                    request_id = %ctx.request_id,
                    backend = %backend.id,
                    key = %key,
                    "Answering from cache"
                );
                let status = answer.status;
                let bytes = answer.body.len() as u64;
                let elapsed = ctx.started.elapsed();
                self.log(
                    ctx,
                    parts,
                    Some(&backend.id),
                    LoggedStatus::Http(status),
                    bytes,
                    Some(elapsed),
                    None,
                );
                Some(response::from_cache(answer))
            }
            Ok(None) => {
                tracing::debug!(request_id = %ctx.request_id, key = %key, "Cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    backend = %backend.id,
                    error = %e,
                    "Cache lookup failed"
                );
                None
            }
        }
    }

    /// Wait for the proxied body to finish and account for the outcome.
    async fn settle(
        self: Arc<Self>,
        ctx: RequestContext,
        parts: Parts,
        backend: Arc<Backend>,
        completion: oneshot::Receiver<ProxyCompletion>,
    ) {
        let Ok(done) = completion.await else {
            return;
        };
        let first_byte = done
            .first_byte
            .unwrap_or(done.finished)
            .saturating_duration_since(ctx.started);

        match done.end {
            StreamEnd::Complete => {
                self.log(
                    &ctx,
                    &parts,
                    Some(&backend.id),
                    LoggedStatus::Http(done.status),
                    done.transferred,
                    Some(first_byte),
                    None,
                );
                self.controller.mark_up(&backend);
                if !backend.is_default() {
                    self.stats.record_failover();
                }
                if let Some(answer) = done.answer {
                    self.store_in_caches(&ctx, &parts, &answer).await;
                }
            }
            StreamEnd::Failed(reason) => {
                self.stats.record_failed();
                tracing::warn!(
                    request_id = %ctx.request_id,
                    backend = %backend.id,
                    error = %reason,
                    "Upstream failed mid-response"
                );
                self.log(
                    &ctx,
                    &parts,
                    Some(&backend.id),
                    LoggedStatus::Http(done.status),
                    done.transferred,
                    Some(first_byte),
                    Some(format!("upstream error: {}", reason)),
                );
                self.controller.mark_down(&backend);
            }
            StreamEnd::Aborted => {
                self.log(
                    &ctx,
                    &parts,
                    Some(&backend.id),
                    LoggedStatus::Http(done.status),
                    done.transferred,
                    Some(first_byte),
                    Some("client aborted".to_string()),
                );
            }
        }
    }

    async fn store_in_caches(&self, ctx: &RequestContext, parts: &Parts, answer: &CachedAnswer) {
        for backend in self.controller.registry().cache_backends() {
            let Some(cache) = backend.as_cache() else {
                continue;
            };
            let key = cache_key(cache.settings.key.as_ref(), parts);
            match cache.driver.store(&key, answer, &cache.settings).await {
                Ok(StoreOutcome::Stored) => {
                    tracing::debug!(request_id = %ctx.request_id, backend = %backend.id, key = %key, "Stored answer")
                }
                Ok(StoreOutcome::Skipped) => {
                    tracing::debug!(request_id = %ctx.request_id, backend = %backend.id, key = %key, "Store already in flight")
                }
                Err(e) => tracing::warn!(
                    request_id = %ctx.request_id,
                    backend = %backend.id,
                    key = %key,
                    error = %e,
                    "Failed to store answer"
                ),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn log(
        &self,
        ctx: &RequestContext,
        parts: &Parts,
        backend: Option<&str>,
        status: LoggedStatus,
        bytes: u64,
        first_byte: Option<std::time::Duration>,
        extra: Option<String>,
    ) {
        self.access_log.record(&AccessEvent {
            client: ctx.client,
            request_id: ctx.request_id.clone(),
            backend: backend.map(str::to_string),
            connected_at: ctx.connected_at,
            method: parts.method.clone(),
            path: parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| parts.uri.path().to_string()),
            version: parts.version,
            status,
            bytes,
            first_byte,
            total: Instant::now().saturating_duration_since(ctx.started),
            extra,
        });
    }
}
