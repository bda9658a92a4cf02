//! Active health checking.
//!
//! # Responsibilities
//! - Watch a down server backend until a probe succeeds
//! - Hand the recovery back to the failover controller
//!
//! # Design Decisions
//! - One watch loop per status entry, claimed with an atomic flag
//! - The loop holds only a weak controller reference and exits once the
//!   controller is gone

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time;

use crate::failover::FailoverController;
use crate::health::probe::Probe;
use crate::lifecycle::Shutdown;
use crate::load_balancer::Backend;

#[derive(Debug)]
pub struct HealthMonitor {
    probe: Arc<dyn Probe>,
    interval: Duration,
    shutdown: Shutdown,
}

impl HealthMonitor {
    pub fn new(probe: Arc<dyn Probe>, interval: Duration, shutdown: Shutdown) -> Self {
        Self {
            probe,
            interval,
            shutdown,
        }
    }

    /// Start watching `backend`. Returns false when it is not a server or
    /// its status entry already has a watcher.
    pub fn watch(&self, backend: Arc<Backend>, controller: Weak<FailoverController>) -> bool {
        if backend.as_server().is_none() || !backend.try_begin_watch() {
            return false;
        }

        tracing::info!(backend = %backend.id, idx = backend.idx, "Watching backend");

        let probe = self.probe.clone();
        let interval = self.interval;
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let Some(target) = backend.as_server() else {
                backend.end_watch();
                return;
            };

            loop {
                if backend.is_up() {
                    backend.end_watch();
                    // a mark_down may have run before the slot was released
                    if backend.is_up() || !backend.try_begin_watch() {
                        return;
                    }
                }

                match probe.probe(target).await {
                    Ok(()) => {
                        backend.end_watch();
                        tracing::info!(backend = %backend.id, "Backend is answering again");
                        if let Some(controller) = controller.upgrade() {
                            controller.mark_up(&backend);
                        }
                        return;
                    }
                    Err(e) => {
                        tracing::debug!(backend = %backend.id, error = %e, "Probe failed");
                    }
                }

                if controller.strong_count() == 0 {
                    backend.end_watch();
                    return;
                }

                tokio::select! {
                    _ = time::sleep(interval) => {}
                    _ = shutdown.recv() => {
                        tracing::debug!(backend = %backend.id, "Watch loop received shutdown signal, exiting");
                        backend.end_watch();
                        return;
                    }
                }
            }
        });

        true
    }
}
