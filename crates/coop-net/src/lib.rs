//! Session networking: peer identity, the five-message wire protocol, and
//! datagram transports (UDP and in-process loopback) behind one trait.

pub mod codec;
pub mod datagram;
pub mod loopback;
pub mod peer;
pub mod peer_table;
pub mod platform;
pub mod protocol;
pub mod reconnection;
pub mod transport;
pub mod udp;
mod udp_driver;

use coop_config::{NetworkConfig, TransportKind};

pub use loopback::{LoopbackHub, LoopbackTransport};
pub use peer::{ConnectionHandle, Delivery, PeerId};
pub use peer_table::{ConnectionLimitReached, PeerTable};
pub use protocol::{NetMessage, ProtocolError};
pub use reconnection::{ReconnectConfig, ReconnectState};
pub use transport::{EventDispatcher, Transport, TransportError, TransportEvent, TransportListener};
pub use udp::UdpTransport;
pub use udp_driver::UdpSettings;

/// Build the transport selected in the configuration.
///
/// Loopback transports attach to `hub`; a fresh hub is used when none is given,
/// which only makes sense for a host talking to itself.
pub fn create_transport(
    config: &NetworkConfig,
    verbose: bool,
    hub: Option<&LoopbackHub>,
) -> Box<dyn Transport> {
    match config.transport {
        TransportKind::Udp => Box::new(UdpTransport::new(UdpSettings::from_config(config, verbose))),
        TransportKind::Loopback => {
            let hub = hub.cloned().unwrap_or_default();
            Box::new(hub.transport(config.max_peers))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_selects_transport() {
        let mut config = NetworkConfig::default();
        assert_eq!(create_transport(&config, false, None).name(), "udp");

        config.transport = TransportKind::Loopback;
        let hub = LoopbackHub::new();
        let transport = create_transport(&config, false, Some(&hub));
        assert_eq!(transport.name(), "loopback");
        assert!(!transport.is_running());
    }
}
