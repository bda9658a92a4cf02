//! First-candidate selection strategy.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, SelectStrategy};

/// Always elects the first candidate, which makes failover order follow the
/// configured backend order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstAvailable;

impl SelectStrategy for FirstAvailable {
    fn choose(&self, candidates: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        candidates.first().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::backend::server;

    #[test]
    fn test_first_available() {
        let backends = vec![server(0, 8080), server(1, 8081)];
        assert_eq!(FirstAvailable.choose(&backends).unwrap().idx, 0);
        assert_eq!(FirstAvailable.choose(&backends[1..]).unwrap().idx, 1);
        assert!(FirstAvailable.choose(&[]).is_none());
    }
}
