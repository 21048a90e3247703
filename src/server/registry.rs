//! Registry of connected producers.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;

use crate::net::SeqPacketConn;
use crate::stats::DaemonStats;

/// Identifier the daemon assigns to each accepted connection
pub type ClientId = u64;

/// One accepted producer connection
#[derive(Debug)]
pub struct ClientConn {
    /// The connection itself
    pub conn: SeqPacketConn,
    /// Peer socket path, when the producer bound one (almost never)
    pub peer: Option<String>,
}

/// Bookkeeping for every open producer connection
///
/// The connected-clients gauge is mutated here and nowhere else, so it
/// cannot disagree with the set of registered connections.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: BTreeMap<ClientId, ClientConn>,
    next_id: ClientId,
    stats: Arc<DaemonStats>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new(stats: Arc<DaemonStats>) -> Self {
        Self {
            clients: BTreeMap::new(),
            next_id: 0,
            stats,
        }
    }

    /// Register a connection and return its assigned id.
    pub fn insert(&mut self, conn: SeqPacketConn, peer: Option<String>) -> ClientId {
        let id = self.next_id;
        self.next_id += 1;
        self.clients.insert(id, ClientConn { conn, peer });
        self.stats.clients.inc();
        id
    }

    /// Remove a connection.
    pub fn remove(&mut self, id: ClientId) -> Option<ClientConn> {
        let removed = self.clients.remove(&id);
        if removed.is_some() {
            self.stats.clients.dec();
        }
        removed
    }

    /// Remove the lowest-id connection. The shutdown sweep empties the
    /// registry through this, keeping the gauge accurate client by client.
    pub fn pop_first(&mut self) -> Option<(ClientId, ClientConn)> {
        let popped = self.clients.pop_first();
        if popped.is_some() {
            self.stats.clients.dec();
        }
        popped
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether any producers are connected.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Iterate over all connections in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ClientId, &ClientConn)> {
        self.clients.iter().map(|(id, client)| (*id, client))
    }

    /// Iterate over all connections starting after `after`, wrapping around
    /// so every client is visited once.
    ///
    /// The readiness scan resumes after the client served last, so one busy
    /// producer cannot starve the rest.
    pub fn scan_from(&self, after: ClientId) -> impl Iterator<Item = (ClientId, &ClientConn)> {
        self.clients
            .range((Excluded(after), Unbounded))
            .chain(self.clients.range(..=after))
            .map(|(id, client)| (*id, client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> SeqPacketConn {
        let (conn, _peer) = SeqPacketConn::pair().unwrap();
        conn
    }

    #[tokio::test]
    async fn test_insert_and_remove_track_gauge() {
        let stats = DaemonStats::shared();
        let mut registry = ClientRegistry::new(stats.clone());

        let a = registry.insert(test_conn(), None);
        let b = registry.insert(test_conn(), None);
        assert_eq!(registry.len(), 2);
        assert_eq!(stats.snapshot().clients, 2);

        assert!(registry.remove(a).is_some());
        assert_eq!(stats.snapshot().clients, 1);

        // Removing an unknown id must not skew the gauge.
        assert!(registry.remove(a).is_none());
        assert_eq!(stats.snapshot().clients, 1);

        assert!(registry.remove(b).is_some());
        assert!(registry.is_empty());
        assert_eq!(stats.snapshot().clients, 0);
    }

    #[tokio::test]
    async fn test_ids_are_never_reused() {
        let stats = DaemonStats::shared();
        let mut registry = ClientRegistry::new(stats);

        let a = registry.insert(test_conn(), None);
        registry.remove(a);
        let b = registry.insert(test_conn(), None);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_scan_from_wraps_around() {
        let stats = DaemonStats::shared();
        let mut registry = ClientRegistry::new(stats);

        let a = registry.insert(test_conn(), None);
        let b = registry.insert(test_conn(), None);
        let c = registry.insert(test_conn(), None);

        let order: Vec<ClientId> = registry.scan_from(b).map(|(id, _)| id).collect();
        assert_eq!(order, vec![c, a, b]);

        let order: Vec<ClientId> = registry.scan_from(c).map(|(id, _)| id).collect();
        assert_eq!(order, vec![a, b, c]);
    }

    #[tokio::test]
    async fn test_pop_first_empties_in_order() {
        let stats = DaemonStats::shared();
        let mut registry = ClientRegistry::new(stats.clone());

        let a = registry.insert(test_conn(), None);
        let b = registry.insert(test_conn(), None);

        assert_eq!(registry.pop_first().map(|(id, _)| id), Some(a));
        assert_eq!(registry.pop_first().map(|(id, _)| id), Some(b));
        assert!(registry.pop_first().is_none());
        assert_eq!(stats.snapshot().clients, 0);
    }
}
