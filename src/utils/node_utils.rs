use crate::{P2PError, Result};
use log::{debug, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use tokio::net::{TcpListener, TcpSocket, UdpSocket};

/// Any routable address works here; connecting a datagram socket sends nothing.
const ROUTE_PROBE_ADDR: &str = "8.8.8.8:80";

pub struct NodeUtils;

impl NodeUtils {
    /// Create a UDP socket with SO_REUSEADDR (and SO_REUSEPORT on Unix if available)
    /// and SO_BROADCAST enabled.
    pub fn create_reusable_udp_socket(addr: SocketAddr) -> Result<UdpSocket> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| P2PError::NetworkError(format!("Failed to create socket: {}", e)))?;

        socket
            .set_reuse_address(true)
            .map_err(|e| P2PError::NetworkError(format!("Failed to set reuse_address: {}", e)))?;

        #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
        {
            if let Err(e) = socket.set_reuse_port(true) {
                warn!("Could not set SO_REUSEPORT (not critical): {}", e);
            }
        }

        if addr.is_ipv4() {
            socket
                .set_broadcast(true)
                .map_err(|e| P2PError::NetworkError(format!("Failed to set broadcast: {}", e)))?;
        }

        socket
            .bind(&addr.into())
            .map_err(|e| P2PError::NetworkError(format!("Failed to bind to {}: {}", addr, e)))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| P2PError::NetworkError(format!("Failed to set nonblocking: {}", e)))?;

        let std_socket: StdUdpSocket = socket.into();
        UdpSocket::from_std(std_socket).map_err(|e| {
            P2PError::NetworkError(format!("Failed to convert to tokio socket: {}", e))
        })
    }

    /// Bind a stream acceptor with SO_REUSEADDR so short-lived reply acceptors can
    /// be reopened on the same port back to back.
    pub fn create_reusable_tcp_listener(addr: SocketAddr) -> Result<TcpListener> {
        let socket = Self::tcp_socket_for(addr)?;
        socket
            .set_reuseaddr(true)
            .map_err(|e| P2PError::NetworkError(format!("Failed to set reuseaddr: {}", e)))?;
        socket
            .bind(addr)
            .map_err(|e| P2PError::NetworkError(format!("Failed to bind to {}: {}", addr, e)))?;
        socket
            .listen(64)
            .map_err(|e| P2PError::NetworkError(format!("Failed to listen on {}: {}", addr, e)))
    }

    /// A fresh stream socket for the address family of `addr`.
    pub fn tcp_socket_for(addr: SocketAddr) -> Result<TcpSocket> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        };
        socket.map_err(|e| P2PError::NetworkError(format!("Failed to create socket: {}", e)))
    }

    /// Best guess at this host's address on the local segment.
    ///
    /// Falls back to loopback when the host has no route out.
    pub fn detect_local_ip() -> IpAddr {
        let probe = StdUdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .and_then(|socket| socket.connect(ROUTE_PROBE_ADDR).map(|_| socket))
            .and_then(|socket| socket.local_addr());

        match probe {
            Ok(addr) if !addr.ip().is_unspecified() => {
                debug!("Detected local address {}", addr.ip());
                addr.ip()
            }
            Ok(_) | Err(_) => {
                warn!("Could not detect a local address, using loopback");
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            }
        }
    }

    /// Default broadcast target: the identity with its last octet set to 255.
    pub fn broadcast_for(identity: IpAddr) -> Result<IpAddr> {
        match identity {
            IpAddr::V4(v4) => {
                let mut octets = v4.octets();
                octets[3] = 255;
                Ok(IpAddr::V4(Ipv4Addr::from(octets)))
            }
            IpAddr::V6(_) => Err(P2PError::ConfigError(format!(
                "No broadcast address for IPv6 identity {}; set one explicitly",
                identity
            ))),
        }
    }
}
