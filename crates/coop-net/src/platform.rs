//! Cross-platform UDP socket configuration.
//!
//! Sockets are created through `socket2` so buffer sizes and `SO_REUSEADDR`
//! can be set before binding, then handed to tokio.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Socket options applied to every UDP socket.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Enable `SO_REUSEADDR`. Default: true on Linux/macOS, false on Windows.
    pub reuse_addr: bool,
    /// Receive buffer size in bytes. Default: 256 KiB.
    pub recv_buffer_size: usize,
    /// Send buffer size in bytes. Default: 256 KiB.
    pub send_buffer_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            reuse_addr: !cfg!(target_os = "windows"),
            recv_buffer_size: 256 * 1024,
            send_buffer_size: 256 * 1024,
        }
    }
}

/// Create, configure and bind a UDP socket.
///
/// Must be called from within a tokio runtime context.
pub fn bind_udp(addr: SocketAddr, config: &SocketConfig) -> std::io::Result<UdpSocket> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    if config.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    // Kernels may clamp these; a refusal is not fatal.
    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_size) {
        tracing::debug!("Could not set receive buffer size: {e}");
    }
    if let Err(e) = socket.set_send_buffer_size(config.send_buffer_size) {
        tracing::debug!("Could not set send buffer size: {e}");
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

/// Host bind address: all IPv4 interfaces.
pub fn ipv4_bind_address(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}

/// Ephemeral client bind address in the same family as `remote`.
pub fn client_bind_address(remote: SocketAddr) -> SocketAddr {
    let ip = if remote.is_ipv6() {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    };
    SocketAddr::new(ip, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let socket = bind_udp("127.0.0.1:0".parse().unwrap(), &SocketConfig::default()).unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_datagram_roundtrip() {
        let config = SocketConfig::default();
        let a = bind_udp("127.0.0.1:0".parse().unwrap(), &config).unwrap();
        let b = bind_udp("127.0.0.1:0".parse().unwrap(), &config).unwrap();

        a.send_to(b"ping", b.local_addr().unwrap()).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[test]
    fn test_client_bind_matches_family() {
        let v4 = client_bind_address("10.0.0.1:28960".parse().unwrap());
        assert!(v4.is_ipv4());
        assert_eq!(v4.port(), 0);
        let v6 = client_bind_address("[::1]:28960".parse().unwrap());
        assert!(v6.is_ipv6());
    }

    #[test]
    fn test_reuse_addr_platform_default() {
        let config = SocketConfig::default();
        assert_eq!(config.reuse_addr, !cfg!(target_os = "windows"));
    }
}
