//! Run start gate: the host may start only when it and every connected peer
//! have picked a character.

use coop_net::PeerId;

pub const ALL_READY: &str = "All players ready.";
pub const WAITING_FOR_PLAYERS: &str = "Waiting for players...";

/// Snapshot of readiness on the host.
#[derive(Debug, Clone)]
pub struct ReadyGate {
    host_ready: bool,
    peers: Vec<(PeerId, bool)>,
}

impl ReadyGate {
    pub fn new(host_ready: bool, peers: impl IntoIterator<Item = (PeerId, bool)>) -> Self {
        let mut peers: Vec<_> = peers.into_iter().collect();
        peers.sort_by_key(|(id, _)| *id);
        Self { host_ready, peers }
    }

    pub fn is_open(&self) -> bool {
        self.host_ready && self.peers.iter().all(|(_, ready)| *ready)
    }

    /// Names of everyone not yet ready, host first, then peers by id.
    pub fn waiting(&self) -> Vec<String> {
        let host = (!self.host_ready).then(|| "host".to_string());
        host.into_iter()
            .chain(
                self.peers
                    .iter()
                    .filter(|(_, ready)| !ready)
                    .map(|(id, _)| format!("peer {id}")),
            )
            .collect()
    }

    pub fn description(&self) -> String {
        if self.is_open() {
            return ALL_READY.to_string();
        }
        let waiting = self.waiting();
        if waiting.is_empty() {
            WAITING_FOR_PLAYERS.to_string()
        } else {
            format!("Waiting for {}", waiting.join(", "))
        }
    }

    /// `(ready, total)` counting the host.
    pub fn counts(&self) -> (usize, usize) {
        let ready = usize::from(self.host_ready) + self.peers.iter().filter(|(_, r)| *r).count();
        (ready, self.peers.len() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_alone_and_ready_is_open() {
        let gate = ReadyGate::new(true, []);
        assert!(gate.is_open());
        assert_eq!(gate.description(), ALL_READY);
        assert_eq!(gate.counts(), (1, 1));
    }

    #[test]
    fn test_names_exactly_the_unready() {
        let gate = ReadyGate::new(true, [(PeerId(3), true), (PeerId(2), false), (PeerId(1), true)]);
        assert!(!gate.is_open());
        assert_eq!(gate.description(), "Waiting for peer 2");
        assert_eq!(gate.counts(), (3, 4));
    }

    #[test]
    fn test_host_listed_first() {
        let gate = ReadyGate::new(false, [(PeerId(2), false), (PeerId(1), false)]);
        assert_eq!(gate.waiting(), vec!["host", "peer 1", "peer 2"]);
        assert_eq!(gate.description(), "Waiting for host, peer 1, peer 2");
    }

    #[test]
    fn test_unready_peer_closes_gate() {
        let gate = ReadyGate::new(true, [(PeerId(1), false)]);
        assert!(!gate.is_open());
    }
}
