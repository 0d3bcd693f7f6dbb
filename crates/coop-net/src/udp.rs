//! UDP transport: a background tokio task owns the socket and the
//! [`UdpDriver`]; the front-end forwards sends to it and drains its events
//! on [`poll`](Transport::poll).
//!
//! When created outside a tokio runtime the transport builds its own
//! single-worker runtime; inside one it spawns onto the current runtime.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::peer::{ConnectionHandle, Delivery, PeerId};
use crate::platform::{self, SocketConfig};
use crate::transport::{
    EventDispatcher, Transport, TransportError, TransportEvent, TransportListener,
};
use crate::udp_driver::{Inbound, SendTarget, UdpDriver, UdpSettings};

/// Largest datagram accepted.
const MAX_DATAGRAM: usize = 64 * 1024;

/// How often the socket task runs keepalive, resend and timeout checks.
const MAINTENANCE_INTERVAL: Duration = Duration::from_millis(20);

/// How long shutdown waits for the goodbye datagrams to leave.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

enum Command {
    Send {
        target: SendTarget,
        payload: Vec<u8>,
        delivery: Delivery,
    },
    Rebind,
}

enum Exit {
    Rebind,
    Shutdown,
}

struct Worker {
    commands: mpsc::UnboundedSender<Command>,
    shutdown_tx: watch::Sender<bool>,
    events: crossbeam_channel::Receiver<Inbound>,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

/// UDP transport with reliable-ordered and unreliable delivery.
pub struct UdpTransport {
    settings: UdpSettings,
    socket_config: SocketConfig,
    runtime: Option<Runtime>,
    worker: Option<Worker>,
    dispatcher: EventDispatcher,
    connected: HashMap<PeerId, ConnectionHandle>,
    is_server: bool,
}

impl UdpTransport {
    pub fn new(settings: UdpSettings) -> Self {
        Self {
            settings,
            socket_config: SocketConfig::default(),
            runtime: None,
            worker: None,
            dispatcher: EventDispatcher::default(),
            connected: HashMap::new(),
            is_server: false,
        }
    }

    /// Local socket address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.worker.as_ref().map(|w| w.local_addr)
    }

    /// Recreate the socket on the same local address, e.g. after the host
    /// application was suspended. Peers keep their ids.
    pub fn rebind(&mut self) -> Result<(), TransportError> {
        let worker = self.worker.as_ref().ok_or(TransportError::NotRunning)?;
        worker
            .commands
            .send(Command::Rebind)
            .map_err(|_| TransportError::NotRunning)
    }

    fn runtime_handle(&mut self) -> Result<Handle, TransportError> {
        if let Ok(handle) = Handle::try_current() {
            return Ok(handle);
        }
        if self.runtime.is_none() {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("coop-net-udp")
                .enable_all()
                .build()?;
            self.runtime = Some(runtime);
        }
        match &self.runtime {
            Some(runtime) => Ok(runtime.handle().clone()),
            None => Err(TransportError::NotRunning),
        }
    }

    fn spawn(
        &mut self,
        handle: &Handle,
        socket: UdpSocket,
        driver: UdpDriver,
        events: crossbeam_channel::Receiver<Inbound>,
    ) -> Result<(), TransportError> {
        let local_addr = socket.local_addr()?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let socket_config = self.socket_config.clone();

        let task = handle.spawn(run_socket_task(
            socket,
            local_addr,
            socket_config,
            driver,
            command_rx,
            shutdown_rx,
        ));

        self.worker = Some(Worker {
            commands,
            shutdown_tx,
            events,
            local_addr,
            task,
        });
        Ok(())
    }

    fn track(&mut self, event: &TransportEvent) {
        match event {
            TransportEvent::PeerConnected { peer, handle } => {
                self.connected.insert(*peer, *handle);
            }
            TransportEvent::PeerDisconnected { peer } => {
                self.connected.remove(peer);
            }
            TransportEvent::DataReceived { .. } => {}
        }
    }

    fn command(&self, command: Command) -> Result<(), TransportError> {
        let worker = self.worker.as_ref().ok_or(TransportError::NotRunning)?;
        worker
            .commands
            .send(command)
            .map_err(|_| TransportError::NotRunning)
    }
}

impl Transport for UdpTransport {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn start_host(&mut self, port: u16, shared_key: &str) -> Result<(), TransportError> {
        if self.worker.is_some() {
            return Err(TransportError::AlreadyRunning);
        }
        let handle = self.runtime_handle()?;
        let socket = {
            let _guard = handle.enter();
            platform::bind_udp(platform::ipv4_bind_address(port), &self.socket_config)?
        };

        let (tx, rx) = crossbeam_channel::unbounded();
        let driver = UdpDriver::host(shared_key, self.settings.clone(), tx);
        self.spawn(&handle, socket, driver, rx)?;
        self.is_server = true;

        tracing::info!(addr = ?self.local_addr(), "UDP host listening");
        Ok(())
    }

    fn start_client(
        &mut self,
        address: &str,
        port: u16,
        shared_key: &str,
        _host_hint: &str,
    ) -> Result<(), TransportError> {
        if self.worker.is_some() {
            return Err(TransportError::AlreadyRunning);
        }
        let host_addr = (address, port)
            .to_socket_addrs()
            .map_err(|_| TransportError::Resolve(address.to_string()))?
            .next()
            .ok_or_else(|| TransportError::Resolve(address.to_string()))?;

        let handle = self.runtime_handle()?;
        let socket = {
            let _guard = handle.enter();
            platform::bind_udp(platform::client_bind_address(host_addr), &self.socket_config)?
        };

        let (tx, rx) = crossbeam_channel::unbounded();
        let driver = UdpDriver::client(
            host_addr,
            shared_key,
            self.settings.clone(),
            tx,
            Instant::now(),
        );
        self.spawn(&handle, socket, driver, rx)?;
        self.is_server = false;

        tracing::info!(host = %host_addr, "UDP client connecting");
        Ok(())
    }

    fn poll(&mut self) {
        let drained: Vec<Inbound> = match &self.worker {
            Some(worker) => worker.events.try_iter().collect(),
            None => Vec::new(),
        };
        for inbound in drained {
            match inbound {
                Inbound::Event(event) => {
                    self.track(&event);
                    self.dispatcher.push(event);
                }
                Inbound::HandleChanged { peer, handle } => {
                    self.connected.insert(peer, handle);
                }
            }
        }
        self.dispatcher.flush();
    }

    fn send_to_all(&mut self, bytes: &[u8], delivery: Delivery) {
        let command = Command::Send {
            target: SendTarget::All,
            payload: bytes.to_vec(),
            delivery,
        };
        if let Err(e) = self.command(command) {
            tracing::debug!("Broadcast dropped: {e}");
        }
    }

    fn send_to(
        &mut self,
        peer: PeerId,
        bytes: &[u8],
        delivery: Delivery,
    ) -> Result<(), TransportError> {
        if !self.connected.contains_key(&peer) {
            return Err(TransportError::UnknownPeer(peer));
        }
        self.command(Command::Send {
            target: SendTarget::Peer(peer),
            payload: bytes.to_vec(),
            delivery,
        })
    }

    fn set_listener(&mut self, listener: Option<Arc<dyn TransportListener>>) {
        self.dispatcher.set_listener(listener);
    }

    fn is_server(&self) -> bool {
        self.is_server
    }

    fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.commands.is_closed())
    }

    fn connected_count(&self) -> usize {
        self.connected.len()
    }

    fn connection_handle(&self, peer: PeerId) -> Option<ConnectionHandle> {
        self.connected.get(&peer).copied()
    }

    fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = worker.shutdown_tx.send(true);
        self.connected.clear();

        if let Some(runtime) = self.runtime.take() {
            let task = worker.task;
            // The timer needs the runtime's reactor, so build it inside.
            let _ = runtime.block_on(async { tokio::time::timeout(SHUTDOWN_GRACE, task).await });
            runtime.shutdown_background();
        }
        tracing::info!("UDP transport shut down");
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Socket task
// ---------------------------------------------------------------------------

async fn run_socket_task(
    socket: UdpSocket,
    local_addr: SocketAddr,
    socket_config: SocketConfig,
    mut driver: UdpDriver,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut socket = Some(socket);

    while let Some(active) = socket.take() {
        match serve(active, &mut driver, &mut commands, &mut shutdown_rx).await {
            Exit::Shutdown => break,
            Exit::Rebind => {
                driver.rebind();
                match platform::bind_udp(local_addr, &socket_config) {
                    Ok(fresh) => {
                        tracing::info!(%local_addr, "UDP socket rebound");
                        socket = Some(fresh);
                    }
                    Err(e) => {
                        tracing::error!(%local_addr, "UDP rebind failed: {e}");
                        driver.fail_all("socket lost");
                    }
                }
            }
        }
    }
    tracing::debug!("UDP socket task finished");
}

async fn serve(
    socket: UdpSocket,
    driver: &mut UdpDriver,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Exit {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let exit = tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, from)) => driver.handle_datagram(from, &buf[..n], Instant::now()),
                    // ICMP port-unreachable surfaces here on some platforms.
                    Err(e) => tracing::trace!("UDP receive error: {e}"),
                }
                None
            }
            command = commands.recv() => match command {
                Some(Command::Send { target, payload, delivery }) => {
                    driver.send(target, &payload, delivery, Instant::now());
                    None
                }
                Some(Command::Rebind) => Some(Exit::Rebind),
                None => {
                    driver.disconnect_all();
                    Some(Exit::Shutdown)
                }
            },
            _ = ticker.tick() => {
                driver.maintain(Instant::now());
                None
            }
            _ = shutdown_rx.changed() => {
                driver.disconnect_all();
                Some(Exit::Shutdown)
            }
        };

        for (addr, bytes) in driver.take_outbox() {
            if let Err(e) = socket.send_to(&bytes, addr).await {
                tracing::debug!(%addr, "UDP send failed: {e}");
            }
        }

        if let Some(exit) = exit {
            return exit;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(transport: &mut UdpTransport) -> Arc<Mutex<Vec<TransportEvent>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        transport.set_listener(Some(Arc::new(move |e: TransportEvent| {
            sink.lock().unwrap().push(e)
        })));
        log
    }

    async fn pump_until(
        transports: &mut [&mut UdpTransport],
        mut done: impl FnMut() -> bool,
    ) -> bool {
        for _ in 0..200 {
            for t in transports.iter_mut() {
                t.poll();
            }
            if done() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_client_connects_and_exchanges_reliable_data() {
        let mut host = UdpTransport::new(UdpSettings::default());
        host.start_host(0, "key").unwrap();
        let port = host.local_addr().unwrap().port();
        let host_log = recorder(&mut host);

        let mut client = UdpTransport::new(UdpSettings::default());
        client.start_client("127.0.0.1", port, "key", "").unwrap();
        let client_log = recorder(&mut client);

        let connected = pump_until(&mut [&mut host, &mut client], || {
            client_log.lock().unwrap().iter().any(|e| {
                matches!(e, TransportEvent::PeerConnected { peer, .. } if *peer == PeerId::HOST)
            })
        })
        .await;
        assert!(connected, "client should connect");
        assert_eq!(host.connected_count(), 1);
        assert!(host.connection_handle(PeerId(1)).is_some());

        client
            .send_to(PeerId::HOST, &[0x06, 1, 0, 0, 0, 0, 0, 0, 0], Delivery::Reliable)
            .unwrap();
        let received = pump_until(&mut [&mut host, &mut client], || {
            host_log.lock().unwrap().iter().any(|e| {
                matches!(e, TransportEvent::DataReceived { peer, delivery: Delivery::Reliable, .. } if *peer == PeerId(1))
            })
        })
        .await;
        assert!(received, "host should receive the reliable payload");

        host.shutdown();
        client.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wrong_key_reports_disconnect() {
        let mut host = UdpTransport::new(UdpSettings::default());
        host.start_host(0, "key").unwrap();
        let port = host.local_addr().unwrap().port();

        let mut client = UdpTransport::new(UdpSettings::default());
        client.start_client("127.0.0.1", port, "wrong", "").unwrap();
        let client_log = recorder(&mut client);

        let rejected = pump_until(&mut [&mut host, &mut client], || {
            client_log
                .lock()
                .unwrap()
                .contains(&TransportEvent::PeerDisconnected { peer: PeerId::HOST })
        })
        .await;
        assert!(rejected);
        assert_eq!(host.connected_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_is_idempotent() {
        let mut host = UdpTransport::new(UdpSettings::default());
        host.start_host(0, "key").unwrap();
        host.shutdown();
        host.shutdown();
        assert!(!host.is_running());
        assert!(matches!(
            host.send_to(PeerId(1), &[1], Delivery::Reliable),
            Err(TransportError::UnknownPeer(_))
        ));
    }

    #[test]
    fn test_owned_runtime_outside_tokio() {
        let mut host = UdpTransport::new(UdpSettings::default());
        host.start_host(0, "key").unwrap();
        assert!(host.is_running());
        assert!(host.local_addr().is_some());
        host.shutdown();
        assert!(!host.is_running());
    }

    #[test]
    fn test_restart_after_shutdown_outside_tokio() {
        // Bound but never answers.
        let silent = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();

        let mut client = UdpTransport::new(UdpSettings::default());
        client.start_client("127.0.0.1", port, "key", "").unwrap();
        client.shutdown();
        client.start_client("127.0.0.1", port, "key", "").unwrap();
        assert!(client.is_running());
        drop(client);
    }
}
