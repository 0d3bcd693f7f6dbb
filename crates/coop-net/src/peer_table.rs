//! Host-side mapping between peer ids, connection handles and endpoints.
//!
//! Three maps are kept in step: handle → id, id → handle, and endpoint → id.
//! The endpoint map outlives connection handles so a peer whose handle was
//! recreated (socket rebind) is recognised again without a new handshake.

use std::collections::HashMap;

use crate::peer::{ConnectionHandle, PeerId};

/// Error returned when the table is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection limit of {0} peers reached")]
pub struct ConnectionLimitReached(pub usize);

/// Bidirectional peer registry with a capacity limit.
#[derive(Debug)]
pub struct PeerTable {
    by_handle: HashMap<ConnectionHandle, PeerId>,
    by_id: HashMap<PeerId, ConnectionHandle>,
    by_endpoint: HashMap<String, PeerId>,
    max_peers: usize,
}

impl PeerTable {
    /// Create an empty table admitting at most `max_peers` peers.
    pub fn new(max_peers: usize) -> Self {
        Self {
            by_handle: HashMap::new(),
            by_id: HashMap::new(),
            by_endpoint: HashMap::new(),
            max_peers,
        }
    }

    /// Whether another peer can be admitted.
    pub fn has_capacity(&self) -> bool {
        self.by_endpoint.len() < self.max_peers
    }

    /// Register a newly connected peer.
    pub fn insert(
        &mut self,
        id: PeerId,
        handle: ConnectionHandle,
        endpoint: &str,
    ) -> Result<(), ConnectionLimitReached> {
        if !self.has_capacity() {
            return Err(ConnectionLimitReached(self.max_peers));
        }
        self.by_handle.insert(handle, id);
        self.by_id.insert(id, handle);
        self.by_endpoint.insert(endpoint.to_string(), id);
        Ok(())
    }

    /// Re-associate `handle` with the peer previously seen at `endpoint`.
    ///
    /// Idempotent: a handle already mapped returns its id unchanged, and
    /// repeated calls never add records. Returns `None` for endpoints never
    /// registered.
    pub fn recover(&mut self, endpoint: &str, handle: ConnectionHandle) -> Option<PeerId> {
        if let Some(id) = self.by_handle.get(&handle) {
            return Some(*id);
        }
        let id = *self.by_endpoint.get(endpoint)?;
        if let Some(stale) = self.by_id.insert(id, handle) {
            self.by_handle.remove(&stale);
        }
        self.by_handle.insert(handle, id);
        tracing::debug!(peer = %id, endpoint, "Recovered peer mapping");
        Some(id)
    }

    /// Forget every handle but keep endpoint identities, so peers can be
    /// recovered after the socket is recreated.
    pub fn detach_handles(&mut self) {
        self.by_handle.clear();
        self.by_id.clear();
    }

    /// Remove a peer entirely. Returns its handle if it had one.
    pub fn remove(&mut self, id: PeerId) -> Option<ConnectionHandle> {
        self.by_endpoint.retain(|_, v| *v != id);
        let handle = self.by_id.remove(&id)?;
        self.by_handle.remove(&handle);
        Some(handle)
    }

    pub fn id_for_handle(&self, handle: ConnectionHandle) -> Option<PeerId> {
        self.by_handle.get(&handle).copied()
    }

    pub fn handle_for_id(&self, id: PeerId) -> Option<ConnectionHandle> {
        self.by_id.get(&id).copied()
    }

    pub fn id_for_endpoint(&self, endpoint: &str) -> Option<PeerId> {
        self.by_endpoint.get(endpoint).copied()
    }

    /// Ids of every registered peer, in ascending order.
    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.by_endpoint.values().copied().collect();
        ids.sort();
        ids
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.by_endpoint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_endpoint.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u64) -> ConnectionHandle {
        ConnectionHandle(n)
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut table = PeerTable::new(8);
        table.insert(PeerId(1), h(10), "1.2.3.4:5000").unwrap();
        assert_eq!(table.id_for_handle(h(10)), Some(PeerId(1)));
        assert_eq!(table.handle_for_id(PeerId(1)), Some(h(10)));
        assert_eq!(table.id_for_endpoint("1.2.3.4:5000"), Some(PeerId(1)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_capacity_enforced() {
        let mut table = PeerTable::new(2);
        table.insert(PeerId(1), h(1), "a").unwrap();
        table.insert(PeerId(2), h(2), "b").unwrap();
        assert_eq!(
            table.insert(PeerId(3), h(3), "c"),
            Err(ConnectionLimitReached(2))
        );
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_recover_after_handle_recreated() {
        let mut table = PeerTable::new(8);
        table.insert(PeerId(4), h(1), "10.0.0.2:9000").unwrap();
        table.detach_handles();
        assert_eq!(table.handle_for_id(PeerId(4)), None);

        assert_eq!(table.recover("10.0.0.2:9000", h(77)), Some(PeerId(4)));
        assert_eq!(table.handle_for_id(PeerId(4)), Some(h(77)));
        assert_eq!(table.id_for_handle(h(77)), Some(PeerId(4)));
    }

    #[test]
    fn test_recover_is_idempotent() {
        let mut table = PeerTable::new(8);
        table.insert(PeerId(1), h(1), "ep").unwrap();
        table.detach_handles();

        for _ in 0..3 {
            assert_eq!(table.recover("ep", h(2)), Some(PeerId(1)));
        }
        assert_eq!(table.len(), 1);
        assert_eq!(table.ids(), vec![PeerId(1)]);
    }

    #[test]
    fn test_recover_replaces_stale_handle() {
        let mut table = PeerTable::new(8);
        table.insert(PeerId(1), h(1), "ep").unwrap();
        assert_eq!(table.recover("ep", h(2)), Some(PeerId(1)));
        assert_eq!(table.id_for_handle(h(1)), None);
        assert_eq!(table.id_for_handle(h(2)), Some(PeerId(1)));
    }

    #[test]
    fn test_recover_unknown_endpoint() {
        let mut table = PeerTable::new(8);
        assert_eq!(table.recover("nowhere", h(1)), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_clears_all_maps() {
        let mut table = PeerTable::new(8);
        table.insert(PeerId(1), h(1), "ep").unwrap();
        assert_eq!(table.remove(PeerId(1)), Some(h(1)));
        assert_eq!(table.id_for_endpoint("ep"), None);
        assert_eq!(table.id_for_handle(h(1)), None);
        assert!(table.has_capacity());
    }
}
