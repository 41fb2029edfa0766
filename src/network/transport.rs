use log::debug;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::utils::{NodeUtils, P2PError, Result};

/// Socket plumbing shared by the control and data channels.
pub struct Transport;

impl Transport {
    pub async fn connect(addr: SocketAddr, limit: Duration) -> Result<TcpStream> {
        let stream = timeout(limit, TcpStream::connect(addr))
            .await
            .map_err(|_| P2PError::Timeout(format!("connecting to {}", addr)))?
            .map_err(|e| {
                P2PError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
            })?;

        debug!("Connected to {}", addr);
        Ok(stream)
    }

    /// Connect from a specific local address so the remote side sees our identity
    /// as the source.
    pub async fn connect_from(local: IpAddr, addr: SocketAddr, limit: Duration) -> Result<TcpStream> {
        let socket = NodeUtils::tcp_socket_for(addr)?;
        socket
            .bind(SocketAddr::new(local, 0))
            .map_err(|e| P2PError::NetworkError(format!("Failed to bind to {}: {}", local, e)))?;

        timeout(limit, socket.connect(addr))
            .await
            .map_err(|_| P2PError::Timeout(format!("connecting to {}", addr)))?
            .map_err(|e| {
                P2PError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
            })
    }

    pub fn listen(addr: SocketAddr) -> Result<TcpListener> {
        let listener = NodeUtils::create_reusable_tcp_listener(addr)?;
        debug!("Listening on {}", addr);
        Ok(listener)
    }

    /// Fire one request datagram from `local` (ephemeral port) to `dest`.
    pub async fn send_datagram(local: IpAddr, dest: SocketAddr, payload: &[u8]) -> Result<()> {
        let socket = NodeUtils::create_reusable_udp_socket(SocketAddr::new(local, 0))?;
        socket.send_to(payload, dest).await.map_err(|e| {
            P2PError::NetworkError(format!("Failed to send datagram to {}: {}", dest, e))
        })?;
        debug!("Sent {} byte datagram to {}", payload.len(), dest);
        Ok(())
    }

    /// Write a whole reply and close the connection; the close marks its end.
    pub async fn send_reply(stream: &mut TcpStream, data: &[u8]) -> Result<()> {
        stream.write_all(data).await?;
        stream.flush().await?;
        stream.shutdown().await?;
        Ok(())
    }

    /// Wait for the one inbound reply connection and read it to EOF, all within
    /// `limit`.
    pub async fn receive_reply(listener: &TcpListener, limit: Duration) -> Result<(IpAddr, Vec<u8>)> {
        let exchange = async {
            let (mut stream, peer) = listener.accept().await?;
            let mut buffer = Vec::new();
            stream.read_to_end(&mut buffer).await?;
            Ok::<_, P2PError>((peer.ip(), buffer))
        };

        timeout(limit, exchange)
            .await
            .map_err(|_| P2PError::Timeout(format!("no reply within {:?}", limit)))?
    }
}
