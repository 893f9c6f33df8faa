//! Table of active forwards, keyed by bind port.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::descriptor::ForwardDescriptor;
use crate::error::{Error, Result};
use crate::listener::BoundListener;
use crate::stats::ForwardStats;
use crate::worker::RelayWorker;

/// A registered forward with everything it owns.
#[derive(Debug)]
pub struct ForwardEntry {
    /// Immutable description of the forward.
    pub descriptor: Arc<ForwardDescriptor>,

    /// Open listening sockets.
    pub listeners: Vec<BoundListener>,

    /// Acceptor tasks serving the listeners.
    pub worker: RelayWorker,

    /// Traffic counters.
    pub stats: Arc<ForwardStats>,
}

impl ForwardEntry {
    /// Stop the worker, then close every listener.
    pub async fn shutdown(self) {
        self.worker.shutdown().await;
        for listener in self.listeners {
            listener.close();
        }
    }
}

/// Thread-safe forward registry.
///
/// One lock guards the whole table; callers only ever see copies.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Arc<RwLock<BTreeMap<u16, ForwardEntry>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry unless its bind port is taken.
    ///
    /// On conflict the rejected entry is handed back so the caller can shut
    /// it down.
    pub async fn register(
        &self,
        entry: ForwardEntry,
    ) -> std::result::Result<(), (Error, ForwardEntry)> {
        let port = entry.descriptor.bind_port();
        let mut entries = self.entries.write().await;

        if entries.contains_key(&port) {
            return Err((Error::AlreadyBound(port), entry));
        }
        entries.insert(port, entry);
        Ok(())
    }

    /// Remove and return the entry for `bind_port`.
    pub async fn unregister(&self, bind_port: u16) -> Result<ForwardEntry> {
        self.entries
            .write()
            .await
            .remove(&bind_port)
            .ok_or(Error::NotFound(bind_port))
    }

    /// Remove every entry.
    pub async fn drain(&self) -> Vec<ForwardEntry> {
        let mut entries = self.entries.write().await;
        std::mem::take(&mut *entries).into_values().collect()
    }

    /// Whether a forward owns `bind_port`.
    pub async fn is_bound(&self, bind_port: u16) -> bool {
        self.entries.read().await.contains_key(&bind_port)
    }

    /// Number of active forwards.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no forward is active.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Point-in-time copy of all descriptors, ordered by bind port.
    pub async fn snapshot(&self) -> Vec<Arc<ForwardDescriptor>> {
        self.entries
            .read()
            .await
            .values()
            .map(|entry| Arc::clone(&entry.descriptor))
            .collect()
    }

    /// Counters for one forward.
    pub async fn stats(&self, bind_port: u16) -> Option<Arc<ForwardStats>> {
        self.entries
            .read()
            .await
            .get(&bind_port)
            .map(|entry| Arc::clone(&entry.stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn entry(bind_port: u16, forward_port: u16) -> ForwardEntry {
        ForwardEntry {
            descriptor: Arc::new(ForwardDescriptor::new(
                vec![IpAddr::V4(Ipv4Addr::UNSPECIFIED)],
                bind_port,
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                forward_port,
            )),
            listeners: Vec::new(),
            worker: RelayWorker::idle(),
            stats: Arc::new(ForwardStats::new()),
        }
    }

    #[tokio::test]
    async fn register_rejects_duplicate_port() {
        let registry = Registry::new();
        registry.register(entry(9000, 80)).await.unwrap();

        let (err, rejected) = registry.register(entry(9000, 81)).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyBound(9000)));
        assert_eq!(rejected.descriptor.forward_port(), 81);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].forward_port(), 80);
    }

    #[tokio::test]
    async fn unregister_returns_entry_once() {
        let registry = Registry::new();
        registry.register(entry(9000, 80)).await.unwrap();
        assert!(registry.is_bound(9000).await);

        let removed = registry.unregister(9000).await.unwrap();
        assert_eq!(removed.descriptor.bind_port(), 9000);
        assert!(!registry.is_bound(9000).await);
        assert!(matches!(
            registry.unregister(9000).await,
            Err(Error::NotFound(9000))
        ));
    }

    #[tokio::test]
    async fn snapshot_is_ordered_and_detached() {
        let registry = Registry::new();
        for port in [9002, 9000, 9001] {
            registry.register(entry(port, 80)).await.unwrap();
        }

        let snapshot = registry.snapshot().await;
        registry.unregister(9001).await.unwrap();

        let ports: Vec<u16> = snapshot.iter().map(|d| d.bind_port()).collect();
        assert_eq!(ports, vec![9000, 9001, 9002]);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn drain_empties_the_table() {
        let registry = Registry::new();
        registry.register(entry(9000, 80)).await.unwrap();
        registry.register(entry(9001, 80)).await.unwrap();

        assert_eq!(registry.drain().await.len(), 2);
        assert!(registry.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registration_admits_one_winner() {
        let registry = Registry::new();
        let mut handles = Vec::new();
        for forward_port in 1..=16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.register(entry(9000, forward_port)).await.is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.len().await, 1);
    }
}
