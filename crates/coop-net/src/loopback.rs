//! In-process transport for tests and single-machine demos.
//!
//! A [`LoopbackHub`] stands in for the network: hosts register on a port and
//! clients connect through the hub. Admission follows the same rules as UDP
//! (shared key, capacity, ids from 1) and every event surfaces on the next
//! [`poll`](Transport::poll) of the receiving transport. Both delivery classes
//! are delivered in order.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::peer::{ConnectionHandle, Delivery, HandleAllocator, IdGenerator, PeerId};
use crate::transport::{
    EventDispatcher, Transport, TransportError, TransportEvent, TransportListener,
};

type EndpointId = u64;

struct HostSlot {
    endpoint: EndpointId,
    key: String,
    max_peers: usize,
    ids: IdGenerator,
    /// Client endpoint for each peer id issued by this host.
    clients: HashMap<PeerId, EndpointId>,
}

#[derive(Default)]
struct Endpoint {
    inbox: VecDeque<TransportEvent>,
    /// Peers this endpoint is connected to, with the handle it knows them by.
    links: HashMap<PeerId, ConnectionHandle>,
    /// For clients: the host port and the id the host issued.
    upstream: Option<(u16, PeerId)>,
}

#[derive(Default)]
struct HubState {
    hosts: HashMap<u16, HostSlot>,
    endpoints: HashMap<EndpointId, Endpoint>,
    next_endpoint: EndpointId,
    handles: HandleAllocator,
    dropped_unreliable: usize,
    drop_unreliable: bool,
}

/// Shared in-memory network.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport attached to this hub, admitting at most `max_peers`
    /// clients when started as host.
    pub fn transport(&self, max_peers: usize) -> LoopbackTransport {
        let endpoint = {
            let mut state = self.lock();
            state.next_endpoint += 1;
            let id = state.next_endpoint;
            state.endpoints.insert(id, Endpoint::default());
            id
        };
        LoopbackTransport {
            hub: self.clone(),
            endpoint,
            max_peers,
            role: None,
            dispatcher: EventDispatcher::default(),
        }
    }

    /// Drop every unreliable payload from now on, to simulate packet loss.
    pub fn set_drop_unreliable(&self, drop: bool) {
        self.lock().drop_unreliable = drop;
    }

    /// Number of unreliable payloads dropped so far.
    pub fn dropped_unreliable(&self) -> usize {
        self.lock().dropped_unreliable
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HubState {
    fn deliver(&mut self, to: EndpointId, event: TransportEvent) {
        if let Some(endpoint) = self.endpoints.get_mut(&to) {
            endpoint.inbox.push_back(event);
        }
    }

    fn send(&mut self, from: EndpointId, peer: PeerId, bytes: &[u8], delivery: Delivery) -> bool {
        let Some((target, sender_id)) = self.route(from, peer) else {
            return false;
        };
        if delivery == Delivery::Unreliable && self.drop_unreliable {
            self.dropped_unreliable += 1;
            return true;
        }
        self.deliver(
            target,
            TransportEvent::DataReceived {
                peer: sender_id,
                bytes: bytes.to_vec(),
                delivery,
            },
        );
        true
    }

    /// Resolve the endpoint behind `peer` as seen from `from`, and the id
    /// `from` has on that endpoint.
    fn route(&self, from: EndpointId, peer: PeerId) -> Option<(EndpointId, PeerId)> {
        let endpoint = self.endpoints.get(&from)?;
        endpoint.links.get(&peer)?;
        match endpoint.upstream {
            Some((port, my_id)) => {
                let host = self.hosts.get(&port)?;
                Some((host.endpoint, my_id))
            }
            None => {
                let port = self.host_port(from)?;
                let client = *self.hosts.get(&port)?.clients.get(&peer)?;
                Some((client, PeerId::HOST))
            }
        }
    }

    fn host_port(&self, endpoint: EndpointId) -> Option<u16> {
        self.hosts
            .iter()
            .find(|(_, slot)| slot.endpoint == endpoint)
            .map(|(port, _)| *port)
    }

    /// Sever the link between a host endpoint and one of its clients,
    /// notifying both sides except `quiet`.
    fn sever(&mut self, port: u16, peer: PeerId, quiet: EndpointId) {
        let Some(host) = self.hosts.get_mut(&port) else {
            return;
        };
        let host_endpoint = host.endpoint;
        let Some(client) = host.clients.remove(&peer) else {
            return;
        };

        if let Some(endpoint) = self.endpoints.get_mut(&host_endpoint) {
            endpoint.links.remove(&peer);
        }
        if let Some(endpoint) = self.endpoints.get_mut(&client) {
            endpoint.links.remove(&PeerId::HOST);
            endpoint.upstream = None;
        }
        if host_endpoint != quiet {
            self.deliver(host_endpoint, TransportEvent::PeerDisconnected { peer });
        }
        if client != quiet {
            self.deliver(client, TransportEvent::PeerDisconnected { peer: PeerId::HOST });
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopbackRole {
    Host(u16),
    Client,
}

/// A transport endpoint on a [`LoopbackHub`].
pub struct LoopbackTransport {
    hub: LoopbackHub,
    endpoint: EndpointId,
    max_peers: usize,
    role: Option<LoopbackRole>,
    dispatcher: EventDispatcher,
}

impl LoopbackTransport {
    fn connect(&self, port: u16, shared_key: &str) -> Result<(), TransportError> {
        let mut guard = self.hub.lock();
        let state = &mut *guard;
        let me = self.endpoint;

        let verdict = match state.hosts.get(&port) {
            None => return Err(TransportError::NoHost(port)),
            Some(host) if host.key != shared_key => Err("invalid key"),
            Some(host) if host.clients.len() >= host.max_peers => Err("server full"),
            Some(_) => Ok(()),
        };
        if let Err(reason) = verdict {
            tracing::warn!(port, reason, "Loopback host rejected connection");
            state.deliver(me, TransportEvent::PeerDisconnected { peer: PeerId::HOST });
            return Ok(());
        }

        let handle_for_host = state.handles.allocate();
        let handle_for_client = state.handles.allocate();
        let Some(host) = state.hosts.get_mut(&port) else {
            return Err(TransportError::NoHost(port));
        };
        let peer = host.ids.next_id();
        host.clients.insert(peer, me);
        let host_endpoint = host.endpoint;

        if let Some(endpoint) = state.endpoints.get_mut(&host_endpoint) {
            endpoint.links.insert(peer, handle_for_host);
        }
        if let Some(endpoint) = state.endpoints.get_mut(&me) {
            endpoint.links.insert(PeerId::HOST, handle_for_client);
            endpoint.upstream = Some((port, peer));
        }
        state.deliver(
            host_endpoint,
            TransportEvent::PeerConnected {
                peer,
                handle: handle_for_host,
            },
        );
        state.deliver(
            me,
            TransportEvent::PeerConnected {
                peer: PeerId::HOST,
                handle: handle_for_client,
            },
        );
        tracing::info!(port, peer = %peer, "Loopback client connected");
        Ok(())
    }
}

impl Transport for LoopbackTransport {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn start_host(&mut self, port: u16, shared_key: &str) -> Result<(), TransportError> {
        if self.role.is_some() {
            return Err(TransportError::AlreadyRunning);
        }
        let mut state = self.hub.lock();
        if state.hosts.contains_key(&port) {
            return Err(TransportError::AlreadyRunning);
        }
        state.hosts.insert(
            port,
            HostSlot {
                endpoint: self.endpoint,
                key: shared_key.to_string(),
                max_peers: self.max_peers,
                ids: IdGenerator::new(),
                clients: HashMap::new(),
            },
        );
        drop(state);

        self.role = Some(LoopbackRole::Host(port));
        tracing::info!(port, "Loopback host started");
        Ok(())
    }

    fn start_client(
        &mut self,
        _address: &str,
        port: u16,
        shared_key: &str,
        _host_hint: &str,
    ) -> Result<(), TransportError> {
        if self.role.is_some() {
            return Err(TransportError::AlreadyRunning);
        }
        self.connect(port, shared_key)?;
        self.role = Some(LoopbackRole::Client);
        Ok(())
    }

    fn poll(&mut self) {
        let events: Vec<TransportEvent> = {
            let mut state = self.hub.lock();
            match state.endpoints.get_mut(&self.endpoint) {
                Some(endpoint) => endpoint.inbox.drain(..).collect(),
                None => Vec::new(),
            }
        };
        for event in events {
            self.dispatcher.push(event);
        }
        self.dispatcher.flush();
    }

    fn send_to_all(&mut self, bytes: &[u8], delivery: Delivery) {
        let mut state = self.hub.lock();
        let peers: Vec<PeerId> = state
            .endpoints
            .get(&self.endpoint)
            .map(|e| e.links.keys().copied().collect())
            .unwrap_or_default();
        for peer in peers {
            state.send(self.endpoint, peer, bytes, delivery);
        }
    }

    fn send_to(
        &mut self,
        peer: PeerId,
        bytes: &[u8],
        delivery: Delivery,
    ) -> Result<(), TransportError> {
        if self.role.is_none() {
            return Err(TransportError::NotRunning);
        }
        if self.hub.lock().send(self.endpoint, peer, bytes, delivery) {
            Ok(())
        } else {
            Err(TransportError::UnknownPeer(peer))
        }
    }

    fn set_listener(&mut self, listener: Option<Arc<dyn TransportListener>>) {
        self.dispatcher.set_listener(listener);
    }

    fn is_server(&self) -> bool {
        matches!(self.role, Some(LoopbackRole::Host(_)))
    }

    fn is_running(&self) -> bool {
        self.role.is_some()
    }

    fn connected_count(&self) -> usize {
        self.hub
            .lock()
            .endpoints
            .get(&self.endpoint)
            .map_or(0, |e| e.links.len())
    }

    fn connection_handle(&self, peer: PeerId) -> Option<ConnectionHandle> {
        self.hub
            .lock()
            .endpoints
            .get(&self.endpoint)
            .and_then(|e| e.links.get(&peer).copied())
    }

    fn shutdown(&mut self) {
        let Some(role) = self.role.take() else {
            return;
        };
        let mut state = self.hub.lock();
        match role {
            LoopbackRole::Host(port) => {
                let peers: Vec<PeerId> = state
                    .hosts
                    .get(&port)
                    .map(|h| h.clients.keys().copied().collect())
                    .unwrap_or_default();
                for peer in peers {
                    state.sever(port, peer, self.endpoint);
                }
                state.hosts.remove(&port);
            }
            LoopbackRole::Client => {
                let upstream = state
                    .endpoints
                    .get(&self.endpoint)
                    .and_then(|e| e.upstream);
                if let Some((port, peer)) = upstream {
                    state.sever(port, peer, self.endpoint);
                }
            }
        }
        if let Some(endpoint) = state.endpoints.get_mut(&self.endpoint) {
            endpoint.inbox.clear();
            endpoint.links.clear();
        }
        tracing::info!("Loopback transport shut down");
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.shutdown();
        self.hub.lock().endpoints.remove(&self.endpoint);
    }
}
