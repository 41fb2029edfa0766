use log::{debug, error, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::protocol::{ControlMessage, MAX_DATAGRAM, REGISTERED};
use crate::core::{FileListing, PeerIdentity, Registry};
use crate::network::Transport;
use crate::utils::{MetricsCollector, NodeUtils, P2PError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Stopped,
    Listening,
}

/// Why a receive loop handed its registry back.
#[derive(Debug)]
enum StopReason {
    Paused,
    Fault(String),
}

/// Where and how the index answers requesters.
#[derive(Clone)]
struct Responder {
    identity: IpAddr,
    reply_port: u16,
    connect_timeout: Duration,
}

impl Responder {
    async fn reply(&self, to: IpAddr, data: &[u8]) -> Result<()> {
        let addr = SocketAddr::new(to, self.reply_port);
        let mut stream = Transport::connect_from(self.identity, addr, self.connect_timeout).await?;
        Transport::send_reply(&mut stream, data).await
    }
}

enum ServiceState {
    Stopped {
        registry: Registry,
        faulted: bool,
    },
    Listening {
        cancel: CancellationToken,
        task: JoinHandle<(Registry, StopReason)>,
    },
    /// Only observed if a loop task panicked and took the map with it.
    Lost,
}

/// The index role: a receive loop on the control port that owns the registry
/// while it runs.
pub struct RegistryService {
    bind_addr: SocketAddr,
    responder: Responder,
    metrics: Arc<MetricsCollector>,
    state: ServiceState,
}

impl RegistryService {
    /// Bind the control port and start answering requests.
    pub fn start(
        identity: PeerIdentity,
        bind_addr: SocketAddr,
        reply_timeout: Duration,
        registry: Registry,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self> {
        let mut service = Self {
            bind_addr,
            responder: Responder {
                identity: identity.ip(),
                reply_port: bind_addr.port(),
                connect_timeout: reply_timeout,
            },
            metrics,
            state: ServiceState::Stopped {
                registry,
                faulted: false,
            },
        };

        service.resume()?;
        Ok(service)
    }

    pub fn status(&self) -> ServiceStatus {
        match &self.state {
            ServiceState::Listening { task, .. } if !task.is_finished() => ServiceStatus::Listening,
            _ => ServiceStatus::Stopped,
        }
    }

    /// Stop the loop and close its socket. Requests arriving before `resume`
    /// are lost.
    pub async fn pause(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, ServiceState::Lost);
        self.state = match state {
            ServiceState::Listening { cancel, task } => {
                cancel.cancel();
                let (registry, reason) = task.await?;
                let faulted = match reason {
                    StopReason::Paused => {
                        debug!("Index server paused");
                        false
                    }
                    StopReason::Fault(e) => {
                        warn!("Index server had already stopped: {}", e);
                        true
                    }
                };
                ServiceState::Stopped { registry, faulted }
            }
            other => other,
        };
        Ok(())
    }

    /// Rebind the control port and restart the loop with the same map.
    pub fn resume(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, ServiceState::Lost);
        match state {
            ServiceState::Stopped {
                registry,
                faulted: false,
            } => match NodeUtils::create_reusable_udp_socket(self.bind_addr) {
                Ok(socket) => {
                    let cancel = CancellationToken::new();
                    let task = tokio::spawn(receive_loop(
                        socket,
                        registry,
                        cancel.clone(),
                        self.responder.clone(),
                        self.metrics.clone(),
                    ));
                    info!("Index server listening on {}", self.bind_addr);
                    self.state = ServiceState::Listening { cancel, task };
                    Ok(())
                }
                Err(e) => {
                    self.state = ServiceState::Stopped {
                        registry,
                        faulted: false,
                    };
                    Err(e)
                }
            },
            ServiceState::Stopped {
                registry,
                faulted: true,
            } => {
                warn!("Index server faulted earlier, staying stopped until restart");
                self.state = ServiceState::Stopped {
                    registry,
                    faulted: true,
                };
                Ok(())
            }
            other => {
                self.state = other;
                Ok(())
            }
        }
    }

    /// Run `f` against the map with the loop paused, then resume it.
    pub async fn with_registry<R>(&mut self, f: impl FnOnce(&mut Registry) -> R) -> Result<R> {
        self.pause().await?;
        let result = match &mut self.state {
            ServiceState::Stopped { registry, .. } => f(registry),
            _ => return Err(P2PError::RegistryUnavailable),
        };
        self.resume()?;
        Ok(result)
    }

    pub async fn snapshot(&mut self) -> Result<String> {
        self.with_registry(|registry| registry.retrieve_all()).await
    }

    pub async fn lookup(&mut self, identity: &PeerIdentity) -> Result<Option<FileListing>> {
        self.with_registry(|registry| registry.retrieve_one(identity).cloned())
            .await
    }

    /// Stop for good and hand the map back.
    pub async fn shutdown(mut self) -> Result<Registry> {
        self.pause().await?;
        match self.state {
            ServiceState::Stopped { registry, .. } => {
                info!("Index server stopped ({} entries dropped)", registry.len());
                Ok(registry)
            }
            _ => Err(P2PError::RegistryUnavailable),
        }
    }
}

async fn receive_loop(
    socket: UdpSocket,
    mut registry: Registry,
    cancel: CancellationToken,
    responder: Responder,
    metrics: Arc<MetricsCollector>,
) -> (Registry, StopReason) {
    let mut buffer = vec![0u8; MAX_DATAGRAM];

    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => return (registry, StopReason::Paused),
            received = socket.recv_from(&mut buffer) => received,
        };

        let (len, from) = match received {
            Ok(received) => received,
            Err(e) => {
                error!("Index server receive failed, stopping: {}", e);
                return (registry, StopReason::Fault(e.to_string()));
            }
        };

        metrics.record_control_message().await;
        let Some(message) = ControlMessage::decode(&buffer[..len]) else {
            debug!("Ignoring unrecognized {} byte payload from {}", len, from);
            metrics.record_malformed_message().await;
            continue;
        };

        debug!("Received {} request from {}", message.kind(), from);
        if let Err(e) = handle_message(&mut registry, message, from.ip(), &responder, &metrics).await {
            warn!("Failed to answer {}: {}", from, e);
        }
    }
}

async fn handle_message(
    registry: &mut Registry,
    message: ControlMessage,
    from: IpAddr,
    responder: &Responder,
    metrics: &MetricsCollector,
) -> Result<()> {
    let sender = PeerIdentity(from);

    match message {
        ControlMessage::Register(listing) => {
            if registry.register(sender, listing) {
                metrics.record_registration().await;
            }
            responder.reply(from, REGISTERED.as_bytes()).await
        }
        ControlMessage::Retrieve => {
            let snapshot = registry.retrieve_all();
            responder.reply(from, snapshot.as_bytes()).await
        }
        ControlMessage::Lookup(target) => {
            let listing = registry
                .retrieve_one(&target)
                .map(FileListing::encode)
                .unwrap_or_default();
            if listing.is_empty() {
                debug!("Lookup for {} from {} found nothing", target, sender);
            }
            responder.reply(from, listing.as_bytes()).await
        }
        ControlMessage::Unregister => {
            registry.unregister(&sender);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    const INDEX: &str = "127.0.0.1";

    fn service_on(port: u16, registry: Registry) -> RegistryService {
        RegistryService::start(
            INDEX.parse().unwrap(),
            SocketAddr::new(INDEX.parse().unwrap(), port),
            Duration::from_millis(300),
            registry,
            Arc::new(MetricsCollector::new()),
        )
        .unwrap()
    }

    async fn send_from(sender: &str, port: u16, message: ControlMessage) {
        Transport::send_datagram(
            sender.parse().unwrap(),
            SocketAddr::new(INDEX.parse().unwrap(), port),
            &message.encode(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_registers_and_unregisters_over_datagrams() {
        let port = 47310;
        let mut service = service_on(port, Registry::new());
        assert_eq!(service.status(), ServiceStatus::Listening);

        send_from(
            "127.0.0.5",
            port,
            ControlMessage::Register(FileListing::decode("one.txt@")),
        )
        .await;
        sleep(Duration::from_millis(500)).await;
        assert!(service.snapshot().await.unwrap().contains("127.0.0.5 : one.txt@"));

        send_from("127.0.0.5", port, ControlMessage::Unregister).await;
        sleep(Duration::from_millis(200)).await;
        assert!(!service.snapshot().await.unwrap().contains("127.0.0.5"));

        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_messages_during_pause_are_dropped() {
        let port = 47312;
        let mut service = service_on(port, Registry::new());

        service.pause().await.unwrap();
        assert_eq!(service.status(), ServiceStatus::Stopped);
        send_from(
            "127.0.0.6",
            port,
            ControlMessage::Register(FileListing::decode("ghost.txt@")),
        )
        .await;
        sleep(Duration::from_millis(100)).await;
        service.resume().unwrap();
        sleep(Duration::from_millis(300)).await;

        let seen = service
            .lookup(&"127.0.0.6".parse().unwrap())
            .await
            .unwrap();
        assert!(seen.is_none());
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_keeps_loop_alive() {
        let port = 47314;
        let mut service = service_on(port, Registry::new());

        Transport::send_datagram(
            "127.0.0.7".parse().unwrap(),
            SocketAddr::new(INDEX.parse().unwrap(), port),
            b"HELLO THERE",
        )
        .await
        .unwrap();
        send_from(
            "127.0.0.7",
            port,
            ControlMessage::Register(FileListing::default()),
        )
        .await;
        sleep(Duration::from_millis(500)).await;

        assert_eq!(service.status(), ServiceStatus::Listening);
        let registry = service.shutdown().await.unwrap();
        assert!(registry.contains(&"127.0.0.7".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_retrieve_reply_reaches_requester() {
        let port = 47316;
        let mut registry = Registry::new();
        registry.register("127.0.0.1".parse().unwrap(), FileListing::decode("idx.txt@"));
        let service = service_on(port, registry);

        let requester: IpAddr = "127.0.0.8".parse().unwrap();
        let acceptor = Transport::listen(SocketAddr::new(requester, port)).unwrap();
        send_from("127.0.0.8", port, ControlMessage::Retrieve).await;

        let (from, reply) = Transport::receive_reply(&acceptor, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(from, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(String::from_utf8(reply).unwrap(), "127.0.0.1 : idx.txt@\n");
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_faulted_service_stays_stopped() {
        let port = 47318;
        let registry = Registry::with_entry(INDEX.parse().unwrap(), FileListing::decode("kept.txt@"));
        let task = tokio::spawn(async move {
            (registry, StopReason::Fault("socket closed".to_string()))
        });
        let mut service = RegistryService {
            bind_addr: SocketAddr::new(INDEX.parse().unwrap(), port),
            responder: Responder {
                identity: INDEX.parse().unwrap(),
                reply_port: port,
                connect_timeout: Duration::from_millis(300),
            },
            metrics: Arc::new(MetricsCollector::new()),
            state: ServiceState::Listening {
                cancel: CancellationToken::new(),
                task,
            },
        };
        sleep(Duration::from_millis(50)).await;
        assert_eq!(service.status(), ServiceStatus::Stopped);

        // the map stays reachable locally but the loop is not restarted
        let snapshot = service.snapshot().await.unwrap();
        assert_eq!(snapshot, "127.0.0.1 : kept.txt@\n");
        service.resume().unwrap();
        assert_eq!(service.status(), ServiceStatus::Stopped);

        let registry = service.shutdown().await.unwrap();
        assert_eq!(registry.len(), 1);
    }
}
