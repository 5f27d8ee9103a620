//! Storage registry: the coordinator's cached view of volume free space
//!
//! The cached capacity is an estimate. It is decremented when a file is
//! placed and incremented when one is deleted; nothing reconciles it with
//! the volume's real free space after startup, so it can drift (and go
//! negative).
//!
//! Placement reserves capacity before any byte moves. Each reservation is
//! kept in a ledger until the client reports the transfer outcome:
//!
//! ```text
//! Reserved ──commit──▶ Committed   (capacity stays charged)
//!     └─────release──▶ Released    (capacity credited back)
//! ```

use crate::coordinator::volume_client::VolumeClient;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Cached capacity of a volume that did not answer the startup query
pub const UNKNOWN_CAPACITY: i64 = -1;

/// Capacity held for a placed file whose transfer is not yet confirmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub filename: String,
    pub address: String,
    pub size: u64,
}

#[derive(Debug, Default)]
pub struct StorageRegistry {
    /// address → cached free bytes
    nodes: RwLock<HashMap<String, i64>>,
    /// filename → pending reservation
    reservations: RwLock<HashMap<String, Reservation>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query every volume once for its free capacity.
    /// Unreachable volumes are registered with [`UNKNOWN_CAPACITY`].
    pub async fn bootstrap(addresses: &[String]) -> Self {
        let registry = Self::new();
        for addr in addresses {
            tracing::info!("Querying capacity of storage node {}", addr);
            let capacity = match VolumeClient::new(addr.clone()).query_capacity().await {
                Ok(capacity) => {
                    tracing::info!("Storage node {} has {} bytes free", addr, capacity);
                    capacity
                }
                Err(e) => {
                    tracing::warn!("Storage node {} unavailable: {}", addr, e);
                    UNKNOWN_CAPACITY
                }
            };
            registry.add(addr.clone(), capacity).await;
        }
        registry
    }

    pub async fn add(&self, address: String, capacity: i64) {
        self.nodes.write().await.insert(address, capacity);
    }

    pub async fn remove(&self, address: &str) -> Option<i64> {
        self.nodes.write().await.remove(address)
    }

    pub async fn capacity(&self, address: &str) -> Option<i64> {
        self.nodes.read().await.get(address).copied()
    }

    pub async fn snapshot(&self) -> HashMap<String, i64> {
        self.nodes.read().await.clone()
    }

    /// Pick the volume with the most cached free space, if it can hold
    /// `required` bytes. Ties go to whichever entry the map yields first.
    pub async fn select_target(&self, required: u64) -> Option<String> {
        let nodes = self.nodes.read().await;
        let (addr, free) = nodes
            .iter()
            .filter(|(_, free)| **free > 0)
            .max_by_key(|(_, free)| **free)?;

        if (*free as u64) < required {
            return None;
        }
        Some(addr.clone())
    }

    /// Add `delta` to a volume's cached capacity. No lower bound.
    pub async fn adjust(&self, address: &str, delta: i64) {
        let mut nodes = self.nodes.write().await;
        match nodes.get_mut(address) {
            Some(free) => *free += delta,
            None => tracing::warn!(
                "Capacity adjustment of {} for unregistered node {}",
                delta,
                address
            ),
        }
    }

    /// Charge `size` bytes to `address` on behalf of `filename`
    pub async fn reserve(&self, filename: &str, address: &str, size: u64) {
        self.adjust(address, -(size as i64)).await;
        self.reservations.write().await.insert(
            filename.to_string(),
            Reservation {
                filename: filename.to_string(),
                address: address.to_string(),
                size,
            },
        );
    }

    /// Transfer confirmed: keep the charge, drop the ledger entry
    pub async fn commit(&self, filename: &str) -> Option<Reservation> {
        self.reservations.write().await.remove(filename)
    }

    /// Transfer failed: drop the ledger entry and credit the capacity back
    pub async fn release(&self, filename: &str) -> Option<Reservation> {
        let reservation = self.reservations.write().await.remove(filename)?;
        self.adjust(&reservation.address, reservation.size as i64)
            .await;
        Some(reservation)
    }

    /// Drop a ledger entry without touching capacity
    pub async fn forget(&self, filename: &str) -> Option<Reservation> {
        self.reservations.write().await.remove(filename)
    }

    pub async fn pending(&self) -> Vec<Reservation> {
        self.reservations.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry(nodes: &[(&str, i64)]) -> StorageRegistry {
        let registry = StorageRegistry::new();
        for (addr, cap) in nodes {
            registry.add(addr.to_string(), *cap).await;
        }
        registry
    }

    #[tokio::test]
    async fn test_add_remove_snapshot() {
        let registry = registry(&[("n1", 500), ("n2", UNKNOWN_CAPACITY)]).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["n1"], 500);
        assert_eq!(snapshot["n2"], UNKNOWN_CAPACITY);

        // Re-adding replaces the cached value
        registry.add("n2".to_string(), 800).await;
        assert_eq!(registry.capacity("n2").await, Some(800));

        assert_eq!(registry.remove("n2").await, Some(800));
        assert_eq!(registry.remove("n2").await, None);
        assert_eq!(registry.select_target(600).await, None);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot.contains_key("n2"));
    }

    #[tokio::test]
    async fn test_select_largest() {
        let registry = registry(&[("n1", 500), ("n2", 2000), ("n3", 1000)]).await;
        assert_eq!(registry.select_target(100).await.as_deref(), Some("n2"));
        assert_eq!(registry.select_target(2000).await.as_deref(), Some("n2"));
    }

    #[tokio::test]
    async fn test_select_none_when_largest_too_small() {
        let registry = registry(&[("n1", 500), ("n2", 1000)]).await;
        assert_eq!(registry.select_target(2000).await, None);
    }

    #[tokio::test]
    async fn test_unknown_and_empty_nodes_never_selected() {
        let registry = registry(&[("n1", UNKNOWN_CAPACITY), ("n2", 0)]).await;
        assert_eq!(registry.select_target(0).await, None);

        let empty = StorageRegistry::new();
        assert_eq!(empty.select_target(0).await, None);
    }

    #[tokio::test]
    async fn test_adjust_has_no_lower_bound() {
        let registry = registry(&[("n1", 100)]).await;
        registry.adjust("n1", -150).await;
        assert_eq!(registry.capacity("n1").await, Some(-50));

        // Unregistered nodes are ignored
        registry.adjust("ghost", 10).await;
        assert_eq!(registry.capacity("ghost").await, None);
    }

    #[tokio::test]
    async fn test_reserve_commit() {
        let registry = registry(&[("n1", 1000)]).await;
        registry.reserve("a.txt", "n1", 300).await;
        assert_eq!(registry.capacity("n1").await, Some(700));
        assert_eq!(registry.pending().await.len(), 1);

        let committed = registry.commit("a.txt").await.unwrap();
        assert_eq!(committed.size, 300);
        assert_eq!(registry.capacity("n1").await, Some(700));
        assert!(registry.pending().await.is_empty());
        assert!(registry.commit("a.txt").await.is_none());
    }

    #[tokio::test]
    async fn test_reserve_release() {
        let registry = registry(&[("n1", 1000)]).await;
        registry.reserve("a.txt", "n1", 300).await;

        registry.release("a.txt").await.unwrap();
        assert_eq!(registry.capacity("n1").await, Some(1000));
        assert!(registry.release("a.txt").await.is_none());
        assert_eq!(registry.capacity("n1").await, Some(1000));
    }

    #[tokio::test]
    async fn test_bootstrap_marks_unreachable_nodes_unknown() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let registry = StorageRegistry::bootstrap(&[addr.clone()]).await;
        assert_eq!(registry.capacity(&addr).await, Some(UNKNOWN_CAPACITY));
        assert_eq!(registry.select_target(1).await, None);
    }
}
