//! Random selection strategy.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, SelectStrategy};

/// Elects a uniformly random candidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomChoice;

impl SelectStrategy for RandomChoice {
    fn choose(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        if candidates.is_empty() {
            return None;
        }
        candidates.get(fastrand::usize(..candidates.len())).cloned()
    }
}
