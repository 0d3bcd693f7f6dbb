//! The session coordinator.
//!
//! [`SessionCore`] owns one transport and drives the whole co-op session from
//! a single thread:
//!
//! - **Handshake.** The host assigns each new client an id, the client echoes
//!   it back with `AckId`, and only then is the connection's identity
//!   confirmed. Until then the identity map holds [`PeerId::UNASSIGNED`].
//! - **Replication.** Local pose and appearance go out through
//!   [`publish_pose`](SessionCore::publish_pose) and
//!   [`publish_appearance`](SessionCore::publish_appearance). The host relays
//!   every client's updates to all other clients and replays cached
//!   appearances to late joiners.
//! - **Run start.** The host may start a run once everyone has picked a
//!   character; the seed travels in `StartRun` and is stored before the scene
//!   load is requested.
//!
//! Transport callbacks only enqueue closures. All state changes happen in
//! [`tick`](SessionCore::tick), which polls the transport, drains the queue
//! with a per-action failure boundary, then rebuilds avatars whose appearance
//! changed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use coop_config::{Config, NetworkConfig, Role, SessionConfig};
use coop_net::{
    ConnectionHandle, Delivery, NetMessage, PeerId, ProtocolError, ReconnectConfig,
    ReconnectState, Transport, TransportError, TransportEvent, TransportListener,
};

use crate::appearance::AppearanceDescriptor;
use crate::avatar::AvatarFactory;
use crate::error::SessionError;
use crate::pose::{Pose, ReplicationTimer};
use crate::queue::{self, ActionQueue, ActionSender, DrainReport};
use crate::readiness::ReadyGate;
use crate::replication::{RemotePeer, relay_targets};
use crate::scene::SceneLoader;
use crate::seed::{self, SEED_UNSET, SeedSlot};

// ---------------------------------------------------------------------------
// Peer records
// ---------------------------------------------------------------------------

/// Where a connection is in the id handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// Client side: connected to the host, no id yet.
    AwaitingAssign,
    /// Host side: id sent, waiting for the echo.
    AwaitingAck,
    Confirmed,
}

/// A directly connected participant.
///
/// The host keeps one record per client; a client keeps one for the host.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: PeerId,
    pub connection: ConnectionHandle,
    /// Cleared when the transport no longer knows the connection, ahead of
    /// the disconnect event that removes the record.
    pub connected: bool,
    /// Has picked a character.
    pub ready: bool,
    pub handshake: Handshake,
}

// ---------------------------------------------------------------------------
// Session core
// ---------------------------------------------------------------------------

pub struct SessionCore {
    network: NetworkConfig,
    session: SessionConfig,
    transport: Box<dyn Transport>,
    avatars: Box<dyn AvatarFactory>,
    scenes: Box<dyn SceneLoader>,
    seeds: Arc<SeedSlot>,
    queue: ActionQueue<SessionCore>,
    attached: bool,
    disposed: bool,

    local_id: PeerId,
    local_ready: bool,
    local_appearance: Option<AppearanceDescriptor>,
    /// Payload last broadcast for the local player.
    sent_payload: Option<String>,
    /// Payload published before an id was assigned.
    pending_appearance: Option<String>,
    pose_timer: ReplicationTimer,

    peers: BTreeMap<PeerId, PeerRecord>,
    identities: HashMap<ConnectionHandle, PeerId>,
    remotes: BTreeMap<PeerId, RemotePeer>,

    current_scene: String,
    reconnect: ReconnectState,
    now: Instant,
}

impl SessionCore {
    pub fn new(
        config: &Config,
        transport: Box<dyn Transport>,
        avatars: Box<dyn AvatarFactory>,
        scenes: Box<dyn SceneLoader>,
    ) -> Self {
        let local_id = match config.network.role {
            Role::Host => PeerId::HOST,
            Role::Client => PeerId::UNASSIGNED,
        };
        Self {
            network: config.network.clone(),
            session: config.session.clone(),
            transport,
            avatars,
            scenes,
            seeds: SeedSlot::global(),
            queue: ActionQueue::new(),
            attached: false,
            disposed: false,
            local_id,
            local_ready: false,
            local_appearance: None,
            sent_payload: None,
            pending_appearance: None,
            pose_timer: ReplicationTimer::new(config.session.pose_rate_hz),
            peers: BTreeMap::new(),
            identities: HashMap::new(),
            remotes: BTreeMap::new(),
            current_scene: String::new(),
            reconnect: ReconnectState::new(ReconnectConfig::default()),
            now: Instant::now(),
        }
    }

    /// Use `seeds` instead of the process-wide slot.
    pub fn with_seed_slot(mut self, seeds: Arc<SeedSlot>) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn with_reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect = ReconnectState::new(config);
        self
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Attach to the transport and start hosting or connecting per the
    /// configured role.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.disposed {
            return Err(SessionError::Disposed);
        }
        self.attach();
        match self.network.role {
            Role::Host => {
                self.transport
                    .start_host(self.network.port, &self.network.shared_key)?;
                tracing::info!(
                    port = self.network.port,
                    transport = self.transport.name(),
                    "Hosting session"
                );
            }
            Role::Client => self.connect()?,
        }
        Ok(())
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        self.transport.start_client(
            &self.network.host_address,
            self.network.port,
            &self.network.shared_key,
            &self.network.host_identity_hint,
        )?;
        tracing::info!(
            address = %self.network.host_address,
            port = self.network.port,
            transport = self.transport.name(),
            "Connecting to host"
        );
        Ok(())
    }

    /// Route transport events into the action queue. Idempotent.
    pub fn attach(&mut self) {
        if self.attached || self.disposed {
            return;
        }
        let sender = self.queue.sender();
        let listener: Arc<dyn TransportListener> =
            Arc::new(move |event: TransportEvent| enqueue_event(&sender, event));
        self.transport.set_listener(Some(listener));
        self.attached = true;
        tracing::debug!("Session attached to transport");
    }

    /// Stop receiving events. The transport buffers them until the next
    /// [`attach`](Self::attach).
    pub fn detach(&mut self) {
        if !self.attached {
            return;
        }
        self.transport.set_listener(None);
        self.attached = false;
        tracing::debug!("Session detached from transport");
    }

    /// Tear the session down. With `full`, the transport is shut down too;
    /// otherwise it is only detached. Safe to call more than once.
    pub fn dispose(&mut self, full: bool) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.attached = false;

        let transport = &mut self.transport;
        let detached = panic::catch_unwind(AssertUnwindSafe(|| transport.set_listener(None)));
        if detached.is_err() {
            tracing::warn!("Transport detach panicked");
        }
        if full {
            self.shutdown_transport();
        }

        for remote in std::mem::take(&mut self.remotes).into_values() {
            if let Some(handle) = remote.avatar {
                self.avatars.destroy(handle);
            }
        }
        let discarded = self.queue.take_batch().len();
        self.peers.clear();
        self.identities.clear();
        tracing::info!(full, discarded, "Session disposed");
    }

    // -- Tick ---------------------------------------------------------------

    pub fn tick(&mut self) -> DrainReport {
        self.tick_at(Instant::now())
    }

    /// Advance the session: reconnect if due, poll the transport, run
    /// deferred actions, then rebuild avatars.
    pub fn tick_at(&mut self, now: Instant) -> DrainReport {
        if self.disposed {
            return DrainReport::default();
        }
        self.now = now;
        self.maintain_reconnect(now);
        self.transport.poll();
        let batch = self.queue.take_batch();
        let report = queue::drain(self, batch);
        self.reconcile_avatars();
        report
    }

    fn maintain_reconnect(&mut self, now: Instant) {
        if self.is_host() || !self.reconnect.due(now) {
            return;
        }
        tracing::info!(attempt = self.reconnect.attempts(), "Reconnecting to host");
        if !self.shutdown_transport() {
            self.reconnect.schedule(now);
            return;
        }
        if let Err(e) = self.connect() {
            tracing::warn!(error = %e, "Reconnect attempt failed");
            self.reconnect.schedule(now);
        }
    }

    /// Shut the transport down, containing a panic inside it. Returns
    /// whether it completed.
    fn shutdown_transport(&mut self) -> bool {
        let transport = &mut self.transport;
        let result = panic::catch_unwind(AssertUnwindSafe(|| transport.shutdown()));
        if result.is_err() {
            tracing::warn!(transport = self.transport.name(), "Transport shutdown panicked");
        }
        result.is_ok()
    }

    // -- Transport events ---------------------------------------------------

    fn handle_peer_connected(
        &mut self,
        peer: PeerId,
        handle: ConnectionHandle,
    ) -> Result<(), SessionError> {
        if self.is_host() {
            self.admit_client(peer, handle)
        } else {
            self.peers.insert(
                PeerId::HOST,
                PeerRecord {
                    id: PeerId::HOST,
                    connection: handle,
                    connected: true,
                    ready: false,
                    handshake: Handshake::AwaitingAssign,
                },
            );
            self.identities.insert(handle, PeerId::HOST);
            self.reconnect.reset();
            tracing::info!("Connected to host, awaiting id");
            Ok(())
        }
    }

    fn admit_client(&mut self, peer: PeerId, handle: ConnectionHandle) -> Result<(), SessionError> {
        self.peers.insert(
            peer,
            PeerRecord {
                id: peer,
                connection: handle,
                connected: true,
                ready: false,
                handshake: Handshake::AwaitingAck,
            },
        );
        self.identities.insert(handle, PeerId::UNASSIGNED);
        self.remotes.entry(peer).or_default();
        tracing::info!(peer = %peer, "Client connected, assigning id");

        self.send_to(peer, &NetMessage::AssignId { peer })?;
        self.replay_appearances(peer);
        self.pose_timer.force();
        Ok(())
    }

    /// Send every cached appearance to a newly connected client.
    fn replay_appearances(&mut self, to: PeerId) {
        let mut cached: Vec<(PeerId, String)> = Vec::new();
        if let Some(payload) = &self.sent_payload {
            cached.push((self.local_id, payload.clone()));
        }
        cached.extend(
            self.remotes
                .iter()
                .filter(|(id, _)| **id != to)
                .filter_map(|(id, remote)| remote.payload.clone().map(|p| (*id, p))),
        );

        let count = cached.len();
        for (sender, payload) in cached {
            if let Err(e) = self.send_to(to, &NetMessage::Appearance { sender, payload }) {
                tracing::warn!(to = %to, sender = %sender, error = %e, "Appearance replay failed");
            }
        }
        tracing::debug!(to = %to, count, "Replayed cached appearances");
    }

    fn handle_peer_disconnected(&mut self, peer: PeerId) -> Result<(), SessionError> {
        if self.is_host() {
            self.drop_peer(peer);
        } else {
            self.lose_host();
        }
        Ok(())
    }

    fn drop_peer(&mut self, peer: PeerId) {
        if let Some(record) = self.peers.remove(&peer) {
            self.identities.remove(&record.connection);
        }
        if let Some(handle) = self.remotes.remove(&peer).and_then(|r| r.avatar) {
            self.avatars.destroy(handle);
        }
        tracing::info!(peer = %peer, "Peer left");
    }

    fn lose_host(&mut self) {
        let was_connected = self.peers.contains_key(&PeerId::HOST);
        self.peers.clear();
        self.identities.clear();
        for remote in std::mem::take(&mut self.remotes).into_values() {
            if let Some(handle) = remote.avatar {
                self.avatars.destroy(handle);
            }
        }
        self.local_id = PeerId::UNASSIGNED;
        // Resend the current look once a new id arrives.
        if let Some(payload) = self.sent_payload.take() {
            self.pending_appearance.get_or_insert(payload);
        }

        if was_connected {
            tracing::warn!("Lost connection to host");
        } else {
            tracing::warn!("Host refused or did not answer the connection");
        }
        if self.network.auto_reconnect && !self.disposed {
            self.reconnect.schedule(self.now);
        }
    }

    fn handle_data(
        &mut self,
        from: PeerId,
        bytes: &[u8],
        delivery: Delivery,
    ) -> Result<(), SessionError> {
        let message = match NetMessage::decode(bytes) {
            Ok(message) => message,
            Err(ProtocolError::UnknownTag(tag)) => {
                tracing::warn!(from = %from, tag, "Discarding message with unknown tag");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        tracing::trace!(from = %from, tag = message.tag(), ?delivery, "Message received");

        match message {
            NetMessage::AssignId { peer } => self.on_assign_id(from, peer),
            NetMessage::AckId { peer } => self.on_ack_id(from, peer),
            NetMessage::StartRun { seed, scene } => self.on_start_run(from, seed, &scene),
            NetMessage::PawnTransform {
                sender,
                position,
                rotation,
            } => self.on_pawn_transform(from, sender, position, rotation),
            NetMessage::Appearance { sender, payload } => self.on_appearance(from, sender, payload),
        }
    }

    // -- Handshake ----------------------------------------------------------

    fn on_assign_id(&mut self, from: PeerId, id: PeerId) -> Result<(), SessionError> {
        if self.is_host() || !from.is_host() {
            tracing::warn!(from = %from, "Ignoring AssignId from a non-host");
            return Ok(());
        }
        if id.is_host() || !id.is_assigned() {
            tracing::warn!(id = %id, "Ignoring invalid assigned id");
            return Ok(());
        }

        self.local_id = id;
        if let Some(host) = self.peers.get_mut(&PeerId::HOST) {
            host.handshake = Handshake::Confirmed;
        }
        tracing::info!(peer = %id, "Assigned peer id");

        self.send_to(PeerId::HOST, &NetMessage::AckId { peer: id })?;
        if let Some(payload) = self.pending_appearance.take() {
            self.broadcast_appearance(payload)?;
        }
        self.pose_timer.force();
        Ok(())
    }

    fn on_ack_id(&mut self, from: PeerId, id: PeerId) -> Result<(), SessionError> {
        if !self.is_host() {
            return Ok(());
        }
        let Some(record) = self.peers.get_mut(&from) else {
            tracing::warn!(from = %from, "AckId from unknown peer");
            return Ok(());
        };
        if id != from {
            tracing::warn!(expected = %from, got = %id, "AckId does not match assigned id");
            return Ok(());
        }

        let Some(current) = self.transport.connection_handle(from) else {
            record.connected = false;
            tracing::warn!(peer = %from, "AckId from a connection that is already gone");
            return Ok(());
        };
        if current != record.connection {
            self.identities.remove(&record.connection);
            record.connection = current;
        }
        self.identities.insert(current, from);
        record.handshake = Handshake::Confirmed;
        tracing::info!(peer = %from, "Handshake complete");
        Ok(())
    }

    // -- Run start ----------------------------------------------------------

    fn on_start_run(&mut self, from: PeerId, seed: i32, scene: &str) -> Result<(), SessionError> {
        if self.is_host() {
            tracing::debug!(from = %from, "Host ignores StartRun");
            return Ok(());
        }
        if !from.is_host() {
            tracing::warn!(from = %from, "Ignoring StartRun from a non-host");
            return Ok(());
        }
        if seed == SEED_UNSET {
            tracing::warn!(scene, "Ignoring StartRun without a seed");
            return Ok(());
        }
        self.seeds.set_base(seed);
        tracing::info!(seed, scene, "Run starting");
        self.scenes.request_scene_load(scene, seed);
        Ok(())
    }

    /// Start a run in the configured start scene with a fresh seed.
    pub fn start_run(&mut self) -> Result<i32, SessionError> {
        let scene = self.session.start_scene.clone();
        self.start_run_with(seed::draw_seed(), &scene)
    }

    /// Start a run with an explicit seed. [`SEED_UNSET`] draws a fresh one.
    pub fn start_run_with(&mut self, seed: i32, scene: &str) -> Result<i32, SessionError> {
        if self.disposed {
            return Err(SessionError::Disposed);
        }
        if !self.is_host() {
            return Err(SessionError::NotHost);
        }
        if !self.can_start_run() {
            return Err(SessionError::NotReady(self.ready_status_description()));
        }
        let seed = if seed == SEED_UNSET {
            seed::draw_seed()
        } else {
            seed
        };

        self.send_all(&NetMessage::StartRun {
            seed,
            scene: scene.to_string(),
        })?;
        self.seeds.set_base(seed);
        tracing::info!(seed, scene, "Starting run");
        self.scenes.request_scene_load(scene, seed);
        Ok(seed)
    }

    /// Report that a scene finished loading. Loading the menu scene only
    /// records it; any other scene rebuilds every remote avatar.
    pub fn on_scene_loaded(&mut self, scene: &str) {
        if self.disposed {
            return;
        }
        self.current_scene = scene.to_string();
        if self.in_menu() {
            tracing::debug!(scene, "Menu scene loaded, nothing to rebuild");
            return;
        }
        for remote in self.remotes.values_mut() {
            remote.invalidate_avatar();
        }
        if self.is_host() {
            self.pose_timer.force();
        }
        self.reconcile_avatars();
        tracing::info!(scene, remotes = self.remotes.len(), "Scene loaded");
    }

    // -- Replication --------------------------------------------------------

    /// Broadcast the local pose, rate limited. Returns whether it was sent.
    /// Clients without an id send nothing.
    pub fn publish_pose(&mut self, pose: Pose, now: Instant) -> Result<bool, SessionError> {
        if self.disposed {
            return Err(SessionError::Disposed);
        }
        if !self.local_id.is_assigned() || !self.pose_timer.fire(now) {
            return Ok(false);
        }
        let (position, rotation) = pose.to_wire();
        self.send_all(&NetMessage::PawnTransform {
            sender: self.local_id,
            position,
            rotation,
        })?;
        Ok(true)
    }

    /// Set the local player's appearance and broadcast it if it changed.
    ///
    /// Before a client has an id the record is held and sent right after
    /// `AssignId`. Records with no mesh and no character are ignored.
    pub fn publish_appearance(&mut self, appearance: AppearanceDescriptor) -> Result<(), SessionError> {
        if self.disposed {
            return Err(SessionError::Disposed);
        }
        if appearance.is_placeholder() {
            tracing::debug!("Ignoring placeholder appearance");
            return Ok(());
        }
        self.local_ready = appearance.has_character();
        let payload = appearance.serialize();
        self.local_appearance = Some(appearance);

        if self.sent_payload.as_deref() == Some(payload.as_str()) {
            return Ok(());
        }
        if self.local_id.is_assigned() {
            self.broadcast_appearance(payload)
        } else {
            tracing::debug!("Holding appearance until an id is assigned");
            self.pending_appearance = Some(payload);
            Ok(())
        }
    }

    fn broadcast_appearance(&mut self, payload: String) -> Result<(), SessionError> {
        self.send_all(&NetMessage::Appearance {
            sender: self.local_id,
            payload: payload.clone(),
        })?;
        self.sent_payload = Some(payload);
        tracing::debug!(peer = %self.local_id, "Appearance broadcast");
        Ok(())
    }

    /// The id a message is attributed to. The host trusts the connection,
    /// not the claimed sender; clients trust the host's relay.
    fn attribute(&self, from: PeerId, claimed: PeerId) -> PeerId {
        if !self.is_host() {
            return claimed;
        }
        if claimed != from {
            tracing::debug!(claimed = %claimed, actual = %from, "Sender id mismatch, using connection identity");
        }
        from
    }

    fn on_pawn_transform(
        &mut self,
        from: PeerId,
        claimed: PeerId,
        position: [f32; 3],
        rotation: [f32; 4],
    ) -> Result<(), SessionError> {
        let sender = self.attribute(from, claimed);
        if sender == self.local_id {
            return Ok(());
        }
        if self.is_host() && !self.peers.contains_key(&sender) {
            tracing::debug!(sender = %sender, "Pose from unknown peer");
            return Ok(());
        }
        let Some(pose) = Pose::from_wire(position, rotation) else {
            tracing::debug!(sender = %sender, "Dropping non-finite pose");
            return Ok(());
        };

        if self.is_host() {
            self.relay(
                sender,
                &NetMessage::PawnTransform {
                    sender,
                    position,
                    rotation,
                },
            )?;
        }

        let pose = pose.flattened();
        let remote = self.remotes.entry(sender).or_default();
        remote.pose = Some(pose);
        if let Some(handle) = remote.avatar {
            self.avatars.apply_pose(handle, &pose);
        }
        Ok(())
    }

    fn on_appearance(
        &mut self,
        from: PeerId,
        claimed: PeerId,
        payload: String,
    ) -> Result<(), SessionError> {
        let sender = self.attribute(from, claimed);
        if sender == self.local_id {
            return Ok(());
        }
        let appearance = AppearanceDescriptor::deserialize(&payload)?;

        if self.is_host() {
            let Some(record) = self.peers.get_mut(&sender) else {
                tracing::debug!(sender = %sender, "Appearance from unknown peer");
                return Ok(());
            };
            record.ready = appearance.has_character();
            self.relay(
                sender,
                &NetMessage::Appearance {
                    sender,
                    payload: payload.clone(),
                },
            )?;
        }

        tracing::debug!(
            sender = %sender,
            character = appearance.character_id,
            skin = %appearance.skin_name,
            "Appearance received"
        );
        self.remotes
            .entry(sender)
            .or_default()
            .record_appearance(appearance, payload);
        Ok(())
    }

    /// Forward a client's message to every other client.
    fn relay(&mut self, sender: PeerId, message: &NetMessage) -> Result<(), SessionError> {
        let bytes = message.encode()?;
        let delivery = message.delivery();
        for target in relay_targets(sender, self.peers.keys().copied()) {
            if let Err(e) = self.transport.send_to(target, &bytes, delivery) {
                tracing::debug!(target = %target, error = %e, "Relay failed");
            }
        }
        Ok(())
    }

    /// Build, replace or skip avatars for every remote with a pending
    /// appearance. Factory failures keep the previous avatar.
    fn reconcile_avatars(&mut self) {
        if self.in_menu() {
            return;
        }
        for (peer, remote) in self.remotes.iter_mut() {
            let Some(appearance) = remote.pending_build().cloned() else {
                continue;
            };
            let spawn = remote.spawn_pose();
            match self
                .avatars
                .create_or_update(*peer, &appearance, spawn.position, spawn.rotation)
            {
                Ok(handle) => {
                    if let Some(old) = remote.avatar.replace(handle)
                        && old != handle
                    {
                        self.avatars.destroy(old);
                    }
                    tracing::debug!(peer = %peer, character = appearance.character_id, "Avatar built");
                    remote.applied = Some(appearance);
                    remote.needs_replacement = false;
                    remote.rejected = None;
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, error = %e, "Avatar build failed, keeping previous");
                    remote.rejected = Some((appearance.character_id, appearance.skin_name));
                }
            }
        }
    }

    // -- Sending ------------------------------------------------------------

    fn send_to(&mut self, peer: PeerId, message: &NetMessage) -> Result<(), SessionError> {
        let bytes = message.encode()?;
        self.transport.send_to(peer, &bytes, message.delivery())?;
        Ok(())
    }

    fn send_all(&mut self, message: &NetMessage) -> Result<(), SessionError> {
        let bytes = message.encode()?;
        self.transport.send_to_all(&bytes, message.delivery());
        Ok(())
    }

    // -- Readiness and status -----------------------------------------------

    fn ready_gate(&self) -> ReadyGate {
        ReadyGate::new(
            self.local_ready,
            self.peers
                .values()
                .filter(|record| record.connected)
                .map(|record| (record.id, record.ready)),
        )
    }

    /// Host only: the local player and every connected peer are ready.
    pub fn can_start_run(&self) -> bool {
        self.is_host() && self.ready_gate().is_open()
    }

    /// Host only; empty on clients.
    pub fn ready_status_description(&self) -> String {
        if !self.is_host() {
            return String::new();
        }
        self.ready_gate().description()
    }

    pub fn start_run_available(&self) -> bool {
        !self.disposed && self.can_start_run()
    }

    /// Ready participants, including the local one.
    pub fn ready_peers(&self) -> BTreeSet<PeerId> {
        let local = (self.local_ready && self.local_id.is_assigned()).then_some(self.local_id);
        local
            .into_iter()
            .chain(
                self.peers
                    .values()
                    .filter(|r| r.connected && r.ready)
                    .map(|r| r.id),
            )
            .collect()
    }

    /// Status lines for an on-screen overlay or the console.
    pub fn overlay_lines(&self) -> Vec<String> {
        let role = if self.is_host() { "Host" } else { "Client" };
        let scene = if self.current_scene.is_empty() {
            "-"
        } else {
            self.current_scene.as_str()
        };
        let mut lines = vec![
            format!("Co-op session v{} ({role})", env!("CARGO_PKG_VERSION")),
            format!("Transport: {}", self.transport.name()),
            format!("Scene: {scene}"),
            format!("Peers: {}", self.transport.connected_count()),
        ];
        if self.is_host() {
            let (ready, total) = self.ready_gate().counts();
            lines.push(format!("Ready: {ready}/{total}"));
        } else {
            let ready = if self.local_ready { "yes" } else { "no" };
            lines.push(format!("Local ready: {ready}"));
        }
        lines
    }

    // -- Accessors ----------------------------------------------------------

    pub fn role(&self) -> Role {
        self.network.role
    }

    pub fn is_host(&self) -> bool {
        self.network.role == Role::Host
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn is_local_ready(&self) -> bool {
        self.local_ready
    }

    pub fn local_appearance(&self) -> Option<&AppearanceDescriptor> {
        self.local_appearance.as_ref()
    }

    pub fn pending_appearance(&self) -> Option<&str> {
        self.pending_appearance.as_deref()
    }

    pub fn peer(&self, id: PeerId) -> Option<&PeerRecord> {
        self.peers.get(&id)
    }

    /// Directly connected peers, by id.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    /// Confirmed identity behind a connection; [`PeerId::UNASSIGNED`] while
    /// its handshake is open.
    pub fn identity_of(&self, handle: ConnectionHandle) -> Option<PeerId> {
        self.identities.get(&handle).copied()
    }

    pub fn remote(&self, id: PeerId) -> Option<&RemotePeer> {
        self.remotes.get(&id)
    }

    pub fn remote_ids(&self) -> Vec<PeerId> {
        self.remotes.keys().copied().collect()
    }

    pub fn current_scene(&self) -> &str {
        &self.current_scene
    }

    fn in_menu(&self) -> bool {
        self.current_scene == self.session.menu_scene
    }

    pub fn run_seed(&self) -> Option<i32> {
        self.seeds.base()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_pending()
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }
}

impl Drop for SessionCore {
    fn drop(&mut self) {
        self.dispose(true);
    }
}

/// Turn a transport event into a deferred action.
fn enqueue_event(sender: &ActionSender<SessionCore>, event: TransportEvent) {
    let queued = match event {
        TransportEvent::PeerConnected { peer, handle } => {
            sender.push(move |core| core.handle_peer_connected(peer, handle))
        }
        TransportEvent::PeerDisconnected { peer } => {
            sender.push(move |core| core.handle_peer_disconnected(peer))
        }
        TransportEvent::DataReceived {
            peer,
            bytes,
            delivery,
        } => sender.push(move |core| core.handle_data(peer, &bytes, delivery)),
    };
    if !queued {
        tracing::debug!("Session gone, dropping transport event");
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
