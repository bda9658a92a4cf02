//! Shutdown coordination.
//!
//! The server and every health watch loop hold a receiver of one broadcast
//! channel; clones of [`Shutdown`] share it.

use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Notify every subscriber. Returns how many tasks were listening.
    pub fn trigger(&self) -> usize {
        self.tx.send(()).unwrap_or(0)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_reach_every_subscriber() {
        let shutdown = Shutdown::new();
        let mut server = shutdown.subscribe();
        let mut watcher = shutdown.clone().subscribe();

        assert_eq!(shutdown.clone().trigger(), 2);
        server.recv().await.unwrap();
        watcher.recv().await.unwrap();
    }

    #[test]
    fn trigger_without_listeners_is_harmless() {
        let shutdown = Shutdown::new();
        assert_eq!(shutdown.trigger(), 0);
        drop(shutdown.subscribe());
        assert_eq!(shutdown.trigger(), 0);
    }
}
