//! Atomic configuration snapshot store.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::model::GatewayConfig;

/// Holds the currently published [`GatewayConfig`] behind an atomic
/// pointer. Readers take a cheap snapshot handle per request; writers swap
/// in a whole new snapshot. A reader observes either the old or the new
/// configuration, never a mixture.
pub struct ConfigStore {
    current: ArcSwap<GatewayConfig>,
}

impl ConfigStore {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
        }
    }

    /// Returns a handle to the current snapshot.
    pub fn current(&self) -> Arc<GatewayConfig> {
        self.current.load_full()
    }

    /// Publishes a new snapshot.
    pub fn swap(&self, config: GatewayConfig) {
        self.current.store(Arc::new(config));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_returns_published_snapshot() {
        let store = ConfigStore::new(GatewayConfig::default());
        assert_eq!(store.current().listen_addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_swap_replaces_snapshot() {
        let store = ConfigStore::new(GatewayConfig::default());
        let mut updated = GatewayConfig::default();
        updated.listen_addr = "127.0.0.1:9999".to_owned();

        store.swap(updated);
        assert_eq!(store.current().listen_addr, "127.0.0.1:9999");
    }

    #[test]
    fn test_old_handles_survive_a_swap() {
        let store = ConfigStore::new(GatewayConfig::default());
        let before = store.current();

        let mut updated = GatewayConfig::default();
        updated.listen_addr = "127.0.0.1:9999".to_owned();
        store.swap(updated);

        // A request holding the old snapshot keeps seeing it unchanged.
        assert_eq!(before.listen_addr, "0.0.0.0:8080");
        assert_eq!(store.current().listen_addr, "127.0.0.1:9999");
    }

    #[test]
    fn test_concurrent_readers_during_swaps() {
        use std::thread;

        let store = Arc::new(ConfigStore::new(GatewayConfig::default()));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let snapshot = store.current();
                    // Either snapshot is internally consistent.
                    assert!(snapshot.listen_addr.contains(':'));
                }
            }));
        }
        for i in 0..100 {
            let mut config = GatewayConfig::default();
            config.listen_addr = format!("127.0.0.1:{}", 9000 + i);
            store.swap(config);
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
