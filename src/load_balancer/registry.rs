//! Backend registry.
//!
//! # Responsibilities
//! - Build the ordered backend list from configuration
//! - Collapse duplicate ids onto one status entry
//! - Lookups by position and id, status mutation, default bookkeeping

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::cache::key::generator_for;
use crate::cache::{CacheSettings, DriverRegistry};
use crate::config::{validate_config, ConfigError, ProxyConfig, ResolvedBackend};
use crate::load_balancer::backend::{
    Backend, BackendKind, CacheTarget, HealthCell, ServerTarget, Status,
};

/// The configured backends, in configuration order.
#[derive(Debug)]
pub struct BackendRegistry {
    backends: Vec<Arc<Backend>>,
    default_idx: OnceLock<usize>,
}

impl BackendRegistry {
    /// Build the registry from a configuration, resolving cache drivers by
    /// name in `drivers` and letting each driver validate its settings.
    pub fn from_config(
        config: &ProxyConfig,
        drivers: &DriverRegistry,
    ) -> Result<Self, ConfigError> {
        validate_config(config).map_err(ConfigError::Validation)?;

        let mut kinds = Vec::with_capacity(config.backends.len());
        for (idx, entry) in config.backends.iter().enumerate() {
            let resolved = entry
                .resolve(idx, config.cache.as_ref())
                .map_err(|e| ConfigError::Validation(vec![e]))?;

            let kind = match resolved {
                ResolvedBackend::Server {
                    proto,
                    host,
                    port,
                    prefix,
                } => BackendKind::Server(ServerTarget {
                    proto,
                    host,
                    port,
                    prefix,
                }),
                ResolvedBackend::Cache {
                    driver: name,
                    location,
                    expiry,
                    key,
                } => {
                    let driver = drivers
                        .get(&name)
                        .ok_or_else(|| ConfigError::UnknownDriver(name.clone()))?;
                    let settings = CacheSettings {
                        driver: name.clone(),
                        location,
                        expiry,
                        key: generator_for(key),
                    };
                    driver
                        .validate(&settings)
                        .map_err(|source| ConfigError::Driver {
                            driver: name,
                            idx,
                            source,
                        })?;
                    BackendKind::Cache(CacheTarget { driver, settings })
                }
            };
            kinds.push(kind);
        }

        Self::new(kinds)
    }

    /// Build a registry from already constructed backend kinds.
    pub fn new(kinds: Vec<BackendKind>) -> Result<Self, ConfigError> {
        if kinds.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        let mut cells: HashMap<String, Arc<HealthCell>> = HashMap::new();
        let backends = kinds
            .into_iter()
            .enumerate()
            .map(|(idx, kind)| {
                let cell = cells.entry(kind.id()).or_default().clone();
                let backend = Arc::new(Backend::new(idx, kind, cell));
                tracing::debug!(backend = %backend.id, idx, "Registered backend");
                backend
            })
            .collect();

        Ok(Self {
            backends,
            default_idx: OnceLock::new(),
        })
    }

    /// All backends, in idx order.
    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub fn by_idx(&self, idx: usize) -> Option<&Arc<Backend>> {
        self.backends.get(idx)
    }

    /// First backend with this id.
    pub fn by_id(&self, id: &str) -> Option<&Arc<Backend>> {
        self.backends.iter().find(|b| b.id == id)
    }

    /// Write the status cell behind `id` directly. Returns true when it
    /// changed. No health watch starts and the global backend is not
    /// re-elected; use `FailoverController::set_status` for that.
    pub fn set_status(&self, id: &str, status: Status) -> bool {
        match self.by_id(id) {
            Some(backend) => match status {
                Status::Up => backend.set_up(),
                Status::Down => backend.set_down(),
            },
            None => false,
        }
    }

    /// Up backends, in idx order.
    pub fn up_backends(&self) -> Vec<Arc<Backend>> {
        self.backends.iter().filter(|b| b.is_up()).cloned().collect()
    }

    pub fn cache_backends(&self) -> impl Iterator<Item = &Arc<Backend>> {
        self.backends.iter().filter(|b| b.as_cache().is_some())
    }

    pub fn has_cache(&self) -> bool {
        self.cache_backends().next().is_some()
    }

    /// Flag the backend at `idx` as the default. Only the first call has an
    /// effect; returns whether this call set it.
    pub fn mark_default(&self, idx: usize) -> bool {
        let Some(backend) = self.backends.get(idx) else {
            return false;
        };
        if self.default_idx.set(idx).is_ok() {
            backend.flag_default();
            true
        } else {
            false
        }
    }

    pub fn default_backend(&self) -> Option<&Arc<Backend>> {
        self.default_idx.get().and_then(|idx| self.backends.get(*idx))
    }
}
