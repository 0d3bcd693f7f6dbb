//! Peer identity types shared by every transport.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Session-level identity of a participant.
///
/// The host is always [`PeerId::HOST`]. Clients are numbered by the host in
/// connection order starting at 1. A client that has not completed the id
/// handshake holds [`PeerId::UNASSIGNED`], never `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl PeerId {
    /// The host, as addressed by clients and as the host's own local id.
    pub const HOST: PeerId = PeerId(0);
    /// No id has been assigned yet.
    pub const UNASSIGNED: PeerId = PeerId(u64::MAX);

    /// Whether this is the host id.
    pub fn is_host(self) -> bool {
        self == Self::HOST
    }

    /// Whether this id has been assigned.
    pub fn is_assigned(self) -> bool {
        self != Self::UNASSIGNED
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_assigned() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("unassigned")
        }
    }
}

/// Transport-level identity of one connection incarnation.
///
/// Handles are recreated when the transport rebinds its socket; the
/// [`PeerId`] behind them survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u64);

/// Delivery class for an outgoing or incoming payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Retransmitted until acknowledged, delivered in order.
    Reliable,
    /// Fire-and-forget.
    Unreliable,
}

/// Atomic generator for host-issued peer ids, starting at 1.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return the next unique [`PeerId`].
    pub fn next_id(&self) -> PeerId {
        PeerId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocates [`ConnectionHandle`]s. The upper half carries the socket
/// generation so handles from before a rebind never collide with new ones.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    generation: u32,
    next: u32,
}

impl HandleAllocator {
    /// Allocate a fresh handle in the current generation.
    pub fn allocate(&mut self) -> ConnectionHandle {
        self.next = self.next.wrapping_add(1);
        ConnectionHandle((u64::from(self.generation) << 32) | u64::from(self.next))
    }

    /// Start a new generation; previously issued handles become stale.
    pub fn next_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let ids = IdGenerator::new();
        assert_eq!(ids.next_id(), PeerId(1));
        assert_eq!(ids.next_id(), PeerId(2));
        assert_eq!(ids.next_id(), PeerId(3));
    }

    #[test]
    fn test_unassigned_is_distinct_from_host() {
        assert_ne!(PeerId::UNASSIGNED, PeerId::HOST);
        assert!(PeerId::HOST.is_assigned());
        assert!(!PeerId::UNASSIGNED.is_assigned());
        assert_eq!(PeerId::UNASSIGNED.to_string(), "unassigned");
        assert_eq!(PeerId(4).to_string(), "4");
    }

    #[test]
    fn test_handles_differ_across_generations() {
        let mut handles = HandleAllocator::default();
        let first = handles.allocate();
        handles.next_generation();
        let second = handles.allocate();
        assert_ne!(first, second);
    }
}
