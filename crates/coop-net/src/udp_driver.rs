//! Socket-free state machine behind [`UdpTransport`](crate::udp::UdpTransport).
//!
//! The driver consumes datagrams, commands and clock ticks, and produces
//! outgoing datagrams (in its outbox) plus transport events (on a channel).
//! Keeping it free of I/O lets connection handling be tested directly.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use coop_config::NetworkConfig;
use crossbeam_channel::Sender;

use crate::datagram::{Packet, ReliableChannel};
use crate::peer::{ConnectionHandle, Delivery, HandleAllocator, IdGenerator, PeerId};
use crate::peer_table::PeerTable;
use crate::transport::TransportEvent;

/// Messages from the socket task to the transport front-end.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    /// Forwarded to the listener.
    Event(TransportEvent),
    /// A peer's connection handle was recreated; no listener callback.
    HandleChanged {
        peer: PeerId,
        handle: ConnectionHandle,
    },
}

/// Destination of an outgoing payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendTarget {
    All,
    Peer(PeerId),
}

/// Timing and capacity settings for the UDP link.
#[derive(Debug, Clone)]
pub struct UdpSettings {
    /// Maximum connected clients on the host. Default: 8.
    pub max_peers: usize,
    /// Silence after which a link is dropped. Default: 15 s.
    pub disconnect_timeout: Duration,
    /// Keepalive ping interval. Default: 2 s.
    pub ping_interval: Duration,
    /// Reliable resend interval. Default: 100 ms.
    pub resend_interval: Duration,
    /// Interval between connect requests while connecting. Default: 500 ms.
    pub connect_retry_interval: Duration,
    /// Log each packet at debug instead of trace.
    pub verbose: bool,
}

impl Default for UdpSettings {
    fn default() -> Self {
        Self {
            max_peers: 8,
            disconnect_timeout: Duration::from_millis(15_000),
            ping_interval: Duration::from_millis(2_000),
            resend_interval: Duration::from_millis(100),
            connect_retry_interval: Duration::from_millis(500),
            verbose: false,
        }
    }
}

impl UdpSettings {
    /// Build settings from the network configuration.
    pub fn from_config(config: &NetworkConfig, verbose: bool) -> Self {
        Self {
            max_peers: config.max_peers,
            disconnect_timeout: Duration::from_millis(config.disconnect_timeout_ms),
            ping_interval: Duration::from_millis(config.ping_interval_ms),
            verbose,
            ..Default::default()
        }
    }
}

enum Mode {
    Host {
        key: String,
        ids: IdGenerator,
    },
    Client {
        host_addr: SocketAddr,
        key: String,
        state: ClientState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Connecting {
        started: Instant,
        last_request: Option<Instant>,
    },
    Connected,
    Closed,
}

struct Link {
    addr: SocketAddr,
    channel: ReliableChannel,
    last_heard: Instant,
    last_ping: Instant,
}

impl Link {
    fn new(addr: SocketAddr, now: Instant) -> Self {
        Self {
            addr,
            channel: ReliableChannel::default(),
            last_heard: now,
            last_ping: now,
        }
    }
}

/// Connection state for one UDP socket, host or client side.
pub(crate) struct UdpDriver {
    mode: Mode,
    settings: UdpSettings,
    peers: PeerTable,
    links: HashMap<PeerId, Link>,
    handles: HandleAllocator,
    outbox: Vec<(SocketAddr, Vec<u8>)>,
    events: Sender<Inbound>,
}

impl UdpDriver {
    /// A host accepting clients that present `key`.
    pub fn host(key: &str, settings: UdpSettings, events: Sender<Inbound>) -> Self {
        Self::with_mode(
            Mode::Host {
                key: key.to_string(),
                ids: IdGenerator::new(),
            },
            settings,
            events,
        )
    }

    /// A client connecting to `host_addr`.
    pub fn client(
        host_addr: SocketAddr,
        key: &str,
        settings: UdpSettings,
        events: Sender<Inbound>,
        now: Instant,
    ) -> Self {
        Self::with_mode(
            Mode::Client {
                host_addr,
                key: key.to_string(),
                state: ClientState::Connecting {
                    started: now,
                    last_request: None,
                },
            },
            settings,
            events,
        )
    }

    fn with_mode(mode: Mode, settings: UdpSettings, events: Sender<Inbound>) -> Self {
        Self {
            mode,
            peers: PeerTable::new(settings.max_peers),
            settings,
            links: HashMap::new(),
            handles: HandleAllocator::default(),
            outbox: Vec::new(),
            events,
        }
    }

    /// Datagrams produced since the last call.
    pub fn take_outbox(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        std::mem::take(&mut self.outbox)
    }

    /// Number of live links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    // -----------------------------------------------------------------------
    // Input
    // -----------------------------------------------------------------------

    /// Process one received datagram.
    pub fn handle_datagram(&mut self, from: SocketAddr, bytes: &[u8], now: Instant) {
        let packet = match Packet::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!(%from, "Discarding undecodable datagram: {e}");
                return;
            }
        };
        self.log_packet("recv", from, bytes.len());

        match self.mode {
            Mode::Host { .. } => self.host_packet(from, packet, now),
            Mode::Client { .. } => self.client_packet(from, packet, now),
        }
    }

    fn host_packet(&mut self, from: SocketAddr, packet: Packet, now: Instant) {
        if let Packet::ConnectRequest { key } = packet {
            self.admit(from, &key, now);
            return;
        }

        let endpoint = from.to_string();
        let Some(peer) = self.peers.id_for_endpoint(&endpoint) else {
            tracing::trace!(%from, "Dropping packet from unregistered endpoint");
            return;
        };
        self.ensure_handle(peer, &endpoint);
        self.link_packet(peer, packet, now);
    }

    fn admit(&mut self, from: SocketAddr, key: &str, now: Instant) {
        let endpoint = from.to_string();

        if let Some(peer) = self.peers.id_for_endpoint(&endpoint) {
            // Our accept was lost; repeat it without a second connect event.
            self.ensure_handle(peer, &endpoint);
            self.queue(from, &Packet::ConnectAccept);
            return;
        }

        let Mode::Host {
            key: expected,
            ids,
        } = &self.mode
        else {
            return;
        };

        if key != expected {
            tracing::warn!(%from, "Rejecting connection: invalid key");
            self.queue(
                from,
                &Packet::ConnectReject {
                    reason: "invalid key".to_string(),
                },
            );
            return;
        }

        if !self.peers.has_capacity() {
            tracing::warn!(%from, "Rejecting connection: server full");
            self.queue(
                from,
                &Packet::ConnectReject {
                    reason: "server full".to_string(),
                },
            );
            return;
        }

        let peer = ids.next_id();
        let handle = self.handles.allocate();
        if let Err(e) = self.peers.insert(peer, handle, &endpoint) {
            tracing::warn!(%from, "Rejecting connection: {e}");
            return;
        }
        self.links.insert(peer, Link::new(from, now));
        self.queue(from, &Packet::ConnectAccept);

        tracing::info!(peer = %peer, %from, "Peer connected");
        self.emit(Inbound::Event(TransportEvent::PeerConnected { peer, handle }));
    }

    fn client_packet(&mut self, from: SocketAddr, packet: Packet, now: Instant) {
        let Mode::Client {
            host_addr, state, ..
        } = &mut self.mode
        else {
            return;
        };
        if from != *host_addr {
            tracing::trace!(%from, "Dropping packet from unexpected endpoint");
            return;
        }

        match (packet, *state) {
            (Packet::ConnectAccept, ClientState::Connecting { .. }) => {
                *state = ClientState::Connected;
                let handle = self.handles.allocate();
                if let Err(e) = self.peers.insert(PeerId::HOST, handle, &from.to_string()) {
                    tracing::warn!("Cannot register host: {e}");
                    return;
                }
                self.links.insert(PeerId::HOST, Link::new(from, now));
                tracing::info!(%from, "Connected to host");
                self.emit(Inbound::Event(TransportEvent::PeerConnected {
                    peer: PeerId::HOST,
                    handle,
                }));
            }
            (Packet::ConnectReject { reason }, ClientState::Connecting { .. }) => {
                *state = ClientState::Closed;
                tracing::warn!(%from, reason = %reason, "Host rejected connection");
                self.emit(Inbound::Event(TransportEvent::PeerDisconnected {
                    peer: PeerId::HOST,
                }));
            }
            (packet, ClientState::Connected) => {
                self.ensure_handle(PeerId::HOST, &from.to_string());
                self.link_packet(PeerId::HOST, packet, now);
            }
            _ => {}
        }
    }

    fn link_packet(&mut self, peer: PeerId, packet: Packet, now: Instant) {
        let Some(link) = self.links.get_mut(&peer) else {
            return;
        };
        link.last_heard = now;
        let addr = link.addr;

        match packet {
            Packet::Ping => self.queue(addr, &Packet::Pong),
            Packet::Unreliable { payload } => {
                self.emit(Inbound::Event(TransportEvent::DataReceived {
                    peer,
                    bytes: payload,
                    delivery: Delivery::Unreliable,
                }));
            }
            Packet::Reliable { seq, payload } => {
                let ready = link.channel.receive(seq, payload);
                self.queue(addr, &Packet::Ack { seq });
                for bytes in ready {
                    self.emit(Inbound::Event(TransportEvent::DataReceived {
                        peer,
                        bytes,
                        delivery: Delivery::Reliable,
                    }));
                }
            }
            Packet::Ack { seq } => link.channel.acknowledge(seq),
            Packet::Disconnect => self.drop_peer(peer, "closed by remote"),
            Packet::Pong
            | Packet::ConnectRequest { .. }
            | Packet::ConnectAccept
            | Packet::ConnectReject { .. } => {}
        }
    }

    /// Recreate a missing handle for a known endpoint.
    fn ensure_handle(&mut self, peer: PeerId, endpoint: &str) {
        if self.peers.handle_for_id(peer).is_some() {
            return;
        }
        let handle = self.handles.allocate();
        if self.peers.recover(endpoint, handle).is_some() {
            self.emit(Inbound::HandleChanged { peer, handle });
        }
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    /// Queue a payload for one peer or all peers.
    pub fn send(&mut self, target: SendTarget, payload: &[u8], delivery: Delivery, now: Instant) {
        let targets: Vec<PeerId> = match target {
            SendTarget::All => self.links.keys().copied().collect(),
            SendTarget::Peer(peer) => vec![peer],
        };

        for peer in targets {
            let Some(link) = self.links.get_mut(&peer) else {
                tracing::debug!(peer = %peer, "Send to unknown peer dropped");
                continue;
            };
            let packet = match delivery {
                Delivery::Reliable => link.channel.send(payload.to_vec(), now),
                Delivery::Unreliable => Packet::Unreliable {
                    payload: payload.to_vec(),
                },
            };
            let addr = link.addr;
            self.queue(addr, &packet);
        }
    }

    /// Periodic work: connect retries, keepalive, resends and timeouts.
    pub fn maintain(&mut self, now: Instant) {
        self.maintain_connecting(now);

        let mut timed_out = Vec::new();
        let mut out = Vec::new();
        for (peer, link) in &mut self.links {
            if now.duration_since(link.last_heard) >= self.settings.disconnect_timeout {
                timed_out.push(*peer);
                continue;
            }
            if now.duration_since(link.last_ping) >= self.settings.ping_interval {
                link.last_ping = now;
                out.push((link.addr, Packet::Ping));
            }
            for packet in link.channel.due_resends(now, self.settings.resend_interval) {
                out.push((link.addr, packet));
            }
        }

        for (addr, packet) in out {
            self.queue(addr, &packet);
        }
        for peer in timed_out {
            self.drop_peer(peer, "timed out");
        }
    }

    fn maintain_connecting(&mut self, now: Instant) {
        let Mode::Client {
            host_addr,
            key,
            state,
        } = &mut self.mode
        else {
            return;
        };
        let ClientState::Connecting {
            started,
            last_request,
        } = *state
        else {
            return;
        };

        if now.duration_since(started) >= self.settings.disconnect_timeout {
            *state = ClientState::Closed;
            tracing::warn!(host = %host_addr, "Connection attempt timed out");
            self.emit(Inbound::Event(TransportEvent::PeerDisconnected {
                peer: PeerId::HOST,
            }));
            return;
        }

        let due = last_request
            .is_none_or(|last| now.duration_since(last) >= self.settings.connect_retry_interval);
        if due {
            *state = ClientState::Connecting {
                started,
                last_request: Some(now),
            };
            let request = Packet::ConnectRequest { key: key.clone() };
            let addr = *host_addr;
            self.queue(addr, &request);
        }
    }

    /// Forget connection handles after the socket was recreated.
    pub fn rebind(&mut self) {
        self.handles.next_generation();
        self.peers.detach_handles();
    }

    /// Say goodbye to every peer without raising events.
    pub fn disconnect_all(&mut self) {
        let addrs: Vec<SocketAddr> = self.links.values().map(|l| l.addr).collect();
        for addr in addrs {
            self.queue(addr, &Packet::Disconnect);
        }
        self.links.clear();
        for peer in self.peers.ids() {
            self.peers.remove(peer);
        }
        if let Mode::Client { state, .. } = &mut self.mode {
            *state = ClientState::Closed;
        }
    }

    /// Drop every link, raising a disconnect for each.
    pub fn fail_all(&mut self, reason: &str) {
        let peers: Vec<PeerId> = self.links.keys().copied().collect();
        for peer in peers {
            self.drop_peer(peer, reason);
        }
    }

    fn drop_peer(&mut self, peer: PeerId, reason: &str) {
        if self.links.remove(&peer).is_none() {
            return;
        }
        self.peers.remove(peer);
        if let Mode::Client { state, .. } = &mut self.mode {
            *state = ClientState::Closed;
        }
        tracing::info!(peer = %peer, reason, "Peer disconnected");
        self.emit(Inbound::Event(TransportEvent::PeerDisconnected { peer }));
    }

    fn queue(&mut self, addr: SocketAddr, packet: &Packet) {
        let bytes = packet.encode();
        self.log_packet("send", addr, bytes.len());
        self.outbox.push((addr, bytes));
    }

    fn emit(&self, inbound: Inbound) {
        // The front-end may already be gone during shutdown.
        let _ = self.events.send(inbound);
    }

    fn log_packet(&self, direction: &str, addr: SocketAddr, len: usize) {
        if self.settings.verbose {
            tracing::debug!(%addr, bytes = len, "{direction}");
        } else {
            tracing::trace!(%addr, bytes = len, "{direction}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn host(max_peers: usize) -> (UdpDriver, Receiver<Inbound>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let settings = UdpSettings {
            max_peers,
            ..Default::default()
        };
        (UdpDriver::host("key", settings, tx), rx)
    }

    fn connect(driver: &mut UdpDriver, from: SocketAddr, key: &str, now: Instant) {
        let request = Packet::ConnectRequest {
            key: key.to_string(),
        };
        driver.handle_datagram(from, &request.encode(), now);
    }

    fn events(rx: &Receiver<Inbound>) -> Vec<Inbound> {
        rx.try_iter().collect()
    }

    fn last_packet(driver: &mut UdpDriver) -> Packet {
        let (_, bytes) = driver.take_outbox().pop().unwrap();
        Packet::decode(&bytes).unwrap()
    }

    #[test]
    fn test_host_assigns_ids_from_one() {
        let (mut driver, rx) = host(8);
        let now = Instant::now();
        connect(&mut driver, addr(5001), "key", now);
        connect(&mut driver, addr(5002), "key", now);

        let peers: Vec<PeerId> = events(&rx)
            .into_iter()
            .filter_map(|e| match e {
                Inbound::Event(TransportEvent::PeerConnected { peer, .. }) => Some(peer),
                _ => None,
            })
            .collect();
        assert_eq!(peers, vec![PeerId(1), PeerId(2)]);
    }

    #[test]
    fn test_wrong_key_rejected() {
        let (mut driver, rx) = host(8);
        connect(&mut driver, addr(5001), "nope", Instant::now());
        assert!(matches!(
            last_packet(&mut driver),
            Packet::ConnectReject { .. }
        ));
        assert!(events(&rx).is_empty());
        assert_eq!(driver.link_count(), 0);
    }

    #[test]
    fn test_capacity_rejects_extra_peer() {
        let (mut driver, rx) = host(1);
        let now = Instant::now();
        connect(&mut driver, addr(5001), "key", now);
        driver.take_outbox();
        connect(&mut driver, addr(5002), "key", now);
        assert_eq!(
            last_packet(&mut driver),
            Packet::ConnectReject {
                reason: "server full".to_string()
            }
        );
        assert_eq!(events(&rx).len(), 1);
    }

    #[test]
    fn test_duplicate_request_is_idempotent() {
        let (mut driver, rx) = host(8);
        let now = Instant::now();
        connect(&mut driver, addr(5001), "key", now);
        connect(&mut driver, addr(5001), "key", now);
        assert_eq!(events(&rx).len(), 1);
        assert_eq!(driver.link_count(), 1);
    }

    #[test]
    fn test_unregistered_endpoint_dropped() {
        let (mut driver, rx) = host(8);
        let packet = Packet::Unreliable {
            payload: vec![0x04],
        };
        driver.handle_datagram(addr(6000), &packet.encode(), Instant::now());
        assert!(events(&rx).is_empty());
        assert!(driver.take_outbox().is_empty());
    }

    #[test]
    fn test_reliable_payload_acked_and_delivered() {
        let (mut driver, rx) = host(8);
        let now = Instant::now();
        connect(&mut driver, addr(5001), "key", now);
        events(&rx);
        driver.take_outbox();

        let packet = Packet::Reliable {
            seq: 0,
            payload: vec![0x06, 1, 0, 0, 0, 0, 0, 0, 0],
        };
        driver.handle_datagram(addr(5001), &packet.encode(), now);

        assert_eq!(last_packet(&mut driver), Packet::Ack { seq: 0 });
        assert_eq!(
            events(&rx),
            vec![Inbound::Event(TransportEvent::DataReceived {
                peer: PeerId(1),
                bytes: vec![0x06, 1, 0, 0, 0, 0, 0, 0, 0],
                delivery: Delivery::Reliable,
            })]
        );
    }

    #[test]
    fn test_rebind_recovers_identity_without_connect_event() {
        let (mut driver, rx) = host(8);
        let now = Instant::now();
        connect(&mut driver, addr(5001), "key", now);
        let first_handle = match events(&rx).pop() {
            Some(Inbound::Event(TransportEvent::PeerConnected { handle, .. })) => handle,
            other => panic!("unexpected {other:?}"),
        };

        driver.rebind();
        let ping = Packet::Ping.encode();
        driver.handle_datagram(addr(5001), &ping, now);
        driver.handle_datagram(addr(5001), &ping, now);

        let seen = events(&rx);
        assert_eq!(seen.len(), 1);
        match &seen[0] {
            Inbound::HandleChanged { peer, handle } => {
                assert_eq!(*peer, PeerId(1));
                assert_ne!(*handle, first_handle);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_timeout_disconnects_peer() {
        let (mut driver, rx) = host(8);
        let now = Instant::now();
        connect(&mut driver, addr(5001), "key", now);
        events(&rx);

        driver.maintain(now + Duration::from_secs(16));
        assert_eq!(
            events(&rx),
            vec![Inbound::Event(TransportEvent::PeerDisconnected {
                peer: PeerId(1)
            })]
        );
        assert_eq!(driver.link_count(), 0);
    }

    #[test]
    fn test_client_handshake_and_reject() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let now = Instant::now();
        let mut client = UdpDriver::client(addr(7000), "key", UdpSettings::default(), tx, now);

        client.maintain(now);
        assert!(matches!(
            last_packet(&mut client),
            Packet::ConnectRequest { .. }
        ));

        let reject = Packet::ConnectReject {
            reason: "server full".to_string(),
        };
        client.handle_datagram(addr(7000), &reject.encode(), now);
        assert_eq!(
            events(&rx),
            vec![Inbound::Event(TransportEvent::PeerDisconnected {
                peer: PeerId::HOST
            })]
        );
    }

    #[test]
    fn test_client_connects_to_host_as_zero() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let now = Instant::now();
        let mut client = UdpDriver::client(addr(7000), "key", UdpSettings::default(), tx, now);
        client.handle_datagram(addr(7000), &Packet::ConnectAccept.encode(), now);

        match events(&rx).as_slice() {
            [Inbound::Event(TransportEvent::PeerConnected { peer, .. })] => {
                assert_eq!(*peer, PeerId::HOST)
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
