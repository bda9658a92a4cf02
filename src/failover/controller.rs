//! Backend election and failover.
//!
//! # Responsibilities
//! - Elect the default backend at startup
//! - Keep the global current backend equal to the strategy's pick among
//!   the Up backends
//! - Move individual requests to other backends (jump)
//! - Start health watching for backends that go down

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;

use crate::failover::context::RequestContext;
use crate::health::HealthMonitor;
use crate::load_balancer::{Backend, BackendRegistry, SelectStrategy, Status};
use crate::observability::metrics::record_backend_status;

#[derive(Debug)]
pub struct FailoverController {
    registry: Arc<BackendRegistry>,
    strategy: Arc<dyn SelectStrategy>,
    monitor: HealthMonitor,
    current: ArcSwapOption<Backend>,
    /// Held across read, choose and store of an election, so the last
    /// election always sees the latest status changes.
    election: Mutex<()>,
}

impl FailoverController {
    /// Build the controller and elect the default backend.
    pub fn new(
        registry: Arc<BackendRegistry>,
        strategy: Arc<dyn SelectStrategy>,
        monitor: HealthMonitor,
    ) -> Arc<Self> {
        let controller = Self {
            registry,
            strategy,
            monitor,
            current: ArcSwapOption::empty(),
            election: Mutex::new(()),
        };

        match controller.select_default() {
            Some(default) => {
                controller.registry.mark_default(default.idx);
                tracing::info!(backend = %default.id, idx = default.idx, "Default backend elected");
                controller.current.store(Some(default));
            }
            None => tracing::warn!("No backend is up, cannot elect a default"),
        }

        for backend in controller.registry.backends() {
            record_backend_status(&backend.id, backend.is_up());
        }

        Arc::new(controller)
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// The global current backend, if any is left.
    pub fn current(&self) -> Option<Arc<Backend>> {
        self.current.load_full()
    }

    /// The default backend if it is Up, otherwise the first Up backend.
    pub fn select_default(&self) -> Option<Arc<Backend>> {
        if let Some(default) = self.registry.default_backend() {
            if default.is_up() {
                return Some(default.clone());
            }
        }
        self.registry.backends().iter().find(|b| b.is_up()).cloned()
    }

    /// Re-elect the global current backend among the Up backends.
    pub fn switch_global(&self) -> Option<Arc<Backend>> {
        // the guard protects no data, a poisoned lock is still usable
        let _election = self.election.lock().unwrap_or_else(|e| e.into_inner());
        let candidates = self.registry.up_backends();
        let elected = self.strategy.choose(&candidates);
        let previous = self.current.swap(elected.clone());

        let previous_id = previous.as_ref().map(|b| b.id.as_str());
        let elected_id = elected.as_ref().map(|b| b.id.as_str());
        if previous_id != elected_id {
            match &elected {
                Some(backend) => tracing::info!(
                    backend = %backend.id,
                    idx = backend.idx,
                    previous = previous_id.unwrap_or("none"),
                    "Switched global backend"
                ),
                None => tracing::warn!(
                    previous = previous_id.unwrap_or("none"),
                    "All backends are down, requests will fail until one recovers"
                ),
            }
        }

        elected
    }

    /// Move `ctx` to another backend not yet tried for this request.
    /// Global state is left untouched.
    pub fn jump(&self, ctx: &mut RequestContext) -> Option<Arc<Backend>> {
        if let Some(current) = &ctx.current {
            ctx.mark_jumped(current.idx);
        }

        let candidates: Vec<_> = self
            .registry
            .up_backends()
            .into_iter()
            .filter(|b| !ctx.has_jumped(b.idx))
            .collect();
        let next = self.strategy.choose(&candidates);

        tracing::debug!(
            request_id = %ctx.request_id,
            from = ctx.current.as_ref().map(|b| b.id.as_str()).unwrap_or("none"),
            to = next.as_ref().map(|b| b.id.as_str()).unwrap_or("none"),
            "Request jumped"
        );

        ctx.current = next.clone();
        next
    }

    /// Mark `backend` Down. Only the call that changes the status starts a
    /// health watch and re-elects the global backend.
    pub fn mark_down(self: &Arc<Self>, backend: &Arc<Backend>) {
        if !backend.set_down() {
            return;
        }

        tracing::warn!(backend = %backend.id, idx = backend.idx, "Backend marked down");
        record_backend_status(&backend.id, false);

        if backend.as_server().is_some() {
            self.monitor.watch(backend.clone(), Arc::downgrade(self));
        }
        self.switch_global();
    }

    /// Mark `backend` Up and re-elect the global backend when it changed.
    pub fn mark_up(&self, backend: &Arc<Backend>) {
        if !backend.set_up() {
            return;
        }

        tracing::info!(backend = %backend.id, idx = backend.idx, "Backend marked up");
        record_backend_status(&backend.id, true);
        self.switch_global();
    }

    /// Set the status of the entry behind `id` from outside the request
    /// path. Goes through [`mark_down`](Self::mark_down) and
    /// [`mark_up`](Self::mark_up), so watching and re-election follow.
    /// Returns false for an unknown id.
    pub fn set_status(self: &Arc<Self>, id: &str, status: Status) -> bool {
        let Some(backend) = self.registry.by_id(id).cloned() else {
            return false;
        };
        match status {
            Status::Up => self.mark_up(&backend),
            Status::Down => self.mark_down(&backend),
        }
        true
    }

    /// Handle a failure of `ctx.current`: mark it down, then continue on the
    /// new global backend, or jump when that one was already tried.
    pub fn fail_over(self: &Arc<Self>, ctx: &mut RequestContext) -> Option<Arc<Backend>> {
        if let Some(failed) = ctx.current.clone() {
            ctx.mark_jumped(failed.idx);
            self.mark_down(&failed);
        }

        match self.current() {
            Some(global) if !ctx.has_jumped(global.idx) && global.is_up() => {
                ctx.current = Some(global.clone());
                Some(global)
            }
            _ => self.jump(ctx),
        }
    }
}
