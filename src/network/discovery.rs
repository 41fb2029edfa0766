use log::{debug, info};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::core::protocol::{ControlMessage, REGISTERED};
use crate::core::{Config, FileListing, PeerIdentity};
use crate::network::Transport;
use crate::utils::{P2PError, Result};

/// Requesting side of the control channel.
///
/// Every exchange opens a transient reply acceptor on the control port, sends one
/// request datagram and waits a bounded time for the index to connect back.
pub struct Discovery {
    identity: PeerIdentity,
    listen_ip: IpAddr,
    control_port: u16,
    broadcast_ip: IpAddr,
    ack_timeout: Duration,
    reply_timeout: Duration,
}

impl Discovery {
    pub fn new(identity: PeerIdentity, config: &Config) -> Result<Self> {
        Ok(Self {
            identity,
            listen_ip: config.listen_ip(),
            control_port: config.control_port,
            broadcast_ip: config.resolve_broadcast(identity.ip())?,
            ack_timeout: config.ack_timeout(),
            reply_timeout: config.reply_timeout(),
        })
    }

    pub fn broadcast_ip(&self) -> IpAddr {
        self.broadcast_ip
    }

    /// Broadcast our listing. `Some(index)` when an index acknowledged within the
    /// ack bound, `None` when nobody answered.
    pub async fn register(&self, listing: &FileListing) -> Result<Option<PeerIdentity>> {
        info!(
            "Broadcasting registration to {} ({} files)",
            self.broadcast_ip,
            listing.len()
        );
        self.register_at(self.broadcast_ip, listing).await
    }

    /// Same exchange sent straight to a known index.
    pub async fn register_with(
        &self,
        index: PeerIdentity,
        listing: &FileListing,
    ) -> Result<Option<PeerIdentity>> {
        self.register_at(index.ip(), listing).await
    }

    async fn register_at(&self, dest: IpAddr, listing: &FileListing) -> Result<Option<PeerIdentity>> {
        let message = ControlMessage::Register(listing.clone());
        match self.exchange(dest, &message, self.ack_timeout).await {
            Ok((index, reply)) => {
                let ack = String::from_utf8_lossy(&reply);
                if ack.trim() != REGISTERED {
                    return Err(P2PError::InvalidResponse(format!(
                        "expected {} from {}, got {:?}",
                        REGISTERED, index, ack
                    )));
                }
                info!("{} from index {}", REGISTERED, index);
                Ok(Some(index))
            }
            Err(P2PError::Timeout(_)) => {
                debug!("No registration ack within {:?}", self.ack_timeout);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// The index's full registry snapshot.
    pub async fn retrieve(&self, index: PeerIdentity) -> Result<String> {
        let (_, reply) = self
            .exchange(index.ip(), &ControlMessage::Retrieve, self.reply_timeout)
            .await?;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    /// One peer's listing as the index knows it; empty when the index has no entry.
    pub async fn lookup(&self, index: PeerIdentity, target: PeerIdentity) -> Result<FileListing> {
        let (_, reply) = self
            .exchange(index.ip(), &ControlMessage::Lookup(target), self.reply_timeout)
            .await?;
        Ok(FileListing::decode(&String::from_utf8_lossy(&reply)))
    }

    /// Best-effort; the index never acknowledges.
    pub async fn unregister(&self, index: PeerIdentity) -> Result<()> {
        info!("Unregistering from index {}", index);
        self.send(index.ip(), &ControlMessage::Unregister).await
    }

    async fn send(&self, dest: IpAddr, message: &ControlMessage) -> Result<()> {
        Transport::send_datagram(
            self.identity.ip(),
            SocketAddr::new(dest, self.control_port),
            &message.encode(),
        )
        .await
    }

    async fn exchange(
        &self,
        dest: IpAddr,
        message: &ControlMessage,
        limit: Duration,
    ) -> Result<(PeerIdentity, Vec<u8>)> {
        // Acceptor first, so a fast index cannot answer before we listen.
        let acceptor = Transport::listen(SocketAddr::new(self.listen_ip, self.control_port))?;
        self.send(dest, message).await?;

        let (from, reply) = Transport::receive_reply(&acceptor, limit).await?;
        debug!(
            "{} reply from {}: {} bytes",
            message.kind(),
            from,
            reply.len()
        );
        Ok((PeerIdentity(from), reply))
    }
}
