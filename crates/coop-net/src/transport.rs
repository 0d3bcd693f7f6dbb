//! Transport abstraction: datagram delivery between one host and its clients.
//!
//! A [`Transport`] moves opaque byte buffers and reports peer lifecycle
//! changes. Events are raised from [`Transport::poll`] on the caller's thread.
//! When no [`TransportListener`] is attached they are buffered and delivered
//! by the first `poll` after one is attached again.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::peer::{ConnectionHandle, Delivery, PeerId};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Something that happened on the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A peer finished connecting.
    PeerConnected {
        peer: PeerId,
        handle: ConnectionHandle,
    },
    /// A peer disconnected, timed out, or a connection attempt failed.
    PeerDisconnected { peer: PeerId },
    /// A payload arrived.
    DataReceived {
        peer: PeerId,
        bytes: Vec<u8>,
        delivery: Delivery,
    },
}

impl TransportEvent {
    /// Invoke the matching listener callback.
    pub fn dispatch_to(&self, listener: &dyn TransportListener) {
        match self {
            TransportEvent::PeerConnected { peer, handle } => {
                listener.on_peer_connected(*peer, *handle)
            }
            TransportEvent::PeerDisconnected { peer } => listener.on_peer_disconnected(*peer),
            TransportEvent::DataReceived {
                peer,
                bytes,
                delivery,
            } => listener.on_data_received(*peer, bytes, *delivery),
        }
    }
}

/// Receives transport events. Implementations must be cheap and non-blocking;
/// the session's listener only enqueues work.
pub trait TransportListener: Send + Sync {
    fn on_peer_connected(&self, peer: PeerId, handle: ConnectionHandle);
    fn on_peer_disconnected(&self, peer: PeerId);
    fn on_data_received(&self, peer: PeerId, bytes: &[u8], delivery: Delivery);
}

/// Blanket implementation for closures taking the whole event.
impl<F> TransportListener for F
where
    F: Fn(TransportEvent) + Send + Sync,
{
    fn on_peer_connected(&self, peer: PeerId, handle: ConnectionHandle) {
        self(TransportEvent::PeerConnected { peer, handle });
    }

    fn on_peer_disconnected(&self, peer: PeerId) {
        self(TransportEvent::PeerDisconnected { peer });
    }

    fn on_data_received(&self, peer: PeerId, bytes: &[u8], delivery: Delivery) {
        self(TransportEvent::DataReceived {
            peer,
            bytes: bytes.to_vec(),
            delivery,
        });
    }
}

/// Holds the attached listener and the events waiting for one.
#[derive(Default)]
pub struct EventDispatcher {
    pending: VecDeque<TransportEvent>,
    listener: Option<Arc<dyn TransportListener>>,
}

impl EventDispatcher {
    /// Queue an event for the next [`flush`](Self::flush).
    pub fn push(&mut self, event: TransportEvent) {
        self.pending.push_back(event);
    }

    /// Attach or detach the listener.
    pub fn set_listener(&mut self, listener: Option<Arc<dyn TransportListener>>) {
        self.listener = listener;
    }

    /// Whether a listener is attached.
    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// Deliver queued events in order. Without a listener, nothing is
    /// delivered and the queue is kept. Returns the number delivered.
    pub fn flush(&mut self) -> usize {
        let Some(listener) = self.listener.clone() else {
            return 0;
        };
        let mut delivered = 0;
        while let Some(event) = self.pending.pop_front() {
            event.dispatch_to(listener.as_ref());
            delivered += 1;
        }
        delivered
    }

    /// Number of undelivered events.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Errors surfaced by transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport was already started.
    #[error("transport already running")]
    AlreadyRunning,

    /// The transport has not been started or was shut down.
    #[error("transport not running")]
    NotRunning,

    /// No connection exists for the target peer.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// The host address could not be resolved.
    #[error("cannot resolve host address {0}")]
    Resolve(String),

    /// No host is listening on the requested loopback port.
    #[error("no loopback host on port {0}")]
    NoHost(u16),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A datagram transport for one host and up to `max_peers` clients.
pub trait Transport: Send {
    /// Short implementation name for status output.
    fn name(&self) -> &'static str;

    /// Start accepting clients on `port`; connections must present `shared_key`.
    fn start_host(&mut self, port: u16, shared_key: &str) -> Result<(), TransportError>;

    /// Connect to a host. `host_hint` is an optional identity for transports
    /// that address hosts by something other than an address.
    fn start_client(
        &mut self,
        address: &str,
        port: u16,
        shared_key: &str,
        host_hint: &str,
    ) -> Result<(), TransportError>;

    /// Drain pending I/O and raise queued events. Never blocks.
    fn poll(&mut self);

    /// Send to every connected peer (the host, on a client).
    fn send_to_all(&mut self, bytes: &[u8], delivery: Delivery);

    /// Send to one peer.
    fn send_to(&mut self, peer: PeerId, bytes: &[u8], delivery: Delivery)
    -> Result<(), TransportError>;

    /// Attach (`Some`) or detach (`None`) the event listener.
    fn set_listener(&mut self, listener: Option<Arc<dyn TransportListener>>);

    /// Whether this transport was started as host.
    fn is_server(&self) -> bool;

    /// Whether the transport is started and not shut down.
    fn is_running(&self) -> bool;

    /// Number of currently connected peers.
    fn connected_count(&self) -> usize;

    /// Current connection handle for `peer`, if connected.
    fn connection_handle(&self, peer: PeerId) -> Option<ConnectionHandle>;

    /// Close every connection and stop. Safe to call more than once.
    fn shutdown(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording() -> (Arc<Mutex<Vec<TransportEvent>>>, Arc<dyn TransportListener>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let listener: Arc<dyn TransportListener> =
            Arc::new(move |e: TransportEvent| sink.lock().unwrap().push(e));
        (log, listener)
    }

    #[test]
    fn test_events_buffer_until_listener_attached() {
        let mut dispatcher = EventDispatcher::default();
        dispatcher.push(TransportEvent::PeerDisconnected { peer: PeerId(1) });
        dispatcher.push(TransportEvent::PeerDisconnected { peer: PeerId(2) });
        assert_eq!(dispatcher.flush(), 0);
        assert_eq!(dispatcher.pending(), 2);

        let (log, listener) = recording();
        dispatcher.set_listener(Some(listener));
        assert_eq!(dispatcher.flush(), 2);

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                TransportEvent::PeerDisconnected { peer: PeerId(1) },
                TransportEvent::PeerDisconnected { peer: PeerId(2) },
            ]
        );
    }

    #[test]
    fn test_detach_keeps_later_events() {
        let (log, listener) = recording();
        let mut dispatcher = EventDispatcher::default();
        dispatcher.set_listener(Some(Arc::clone(&listener)));
        dispatcher.set_listener(None);
        dispatcher.push(TransportEvent::DataReceived {
            peer: PeerId::HOST,
            bytes: vec![1, 2],
            delivery: Delivery::Reliable,
        });
        dispatcher.flush();
        assert!(log.lock().unwrap().is_empty());

        dispatcher.set_listener(Some(listener));
        dispatcher.flush();
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_closure_listener_receives_bytes() {
        let (log, listener) = recording();
        listener.on_data_received(PeerId(3), &[9, 8], Delivery::Unreliable);
        assert_eq!(
            log.lock().unwrap()[0],
            TransportEvent::DataReceived {
                peer: PeerId(3),
                bytes: vec![9, 8],
                delivery: Delivery::Unreliable,
            }
        );
    }
}
