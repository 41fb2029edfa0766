use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{Config, FileListing, PeerIdentity, Registry};
use crate::network::{Discovery, RegistryService, Transport};
use crate::storage::FileManager;
use crate::transfer::{Downloader, PullReport, Uploader};
use crate::utils::{MetricsCollector, P2PError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Unregistered,
    Registering,
    Member,
    Index,
    Exiting,
    Terminated,
}

/// How a registration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Member { index: PeerIdentity },
    Index,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub peer: PeerIdentity,
    pub listed: usize,
    pub pulled: PullReport,
}

/// The peer agent: owns the working directory, the published listing, the known
/// index and, while this peer is index, the registry service.
pub struct Node {
    pub config: Config,
    identity: PeerIdentity,
    state: PeerState,
    index: Option<PeerIdentity>,
    file_manager: Arc<Mutex<FileManager>>,
    discovery: Discovery,
    registry: Option<RegistryService>,
    uploader: Arc<Uploader>,
    downloader: Downloader,
    file_listener: Option<(CancellationToken, JoinHandle<()>)>,
    metrics: Arc<MetricsCollector>,
}

impl Node {
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let identity = PeerIdentity(config.resolve_identity());
        let metrics = Arc::new(MetricsCollector::new());
        let file_manager = Arc::new(Mutex::new(
            FileManager::new(config.working_dir.clone()).await?,
        ));
        let discovery = Discovery::new(identity, &config)?;
        let uploader = Arc::new(Uploader::new(file_manager.clone(), metrics.clone()));
        let downloader = Downloader::new(
            config.working_dir.clone(),
            config.data_port,
            config.reply_timeout(),
            metrics.clone(),
        );

        info!(
            "Peer {} sharing {} (broadcast {})",
            identity,
            config.working_dir.display(),
            discovery.broadcast_ip()
        );

        Ok(Self {
            config,
            identity,
            state: PeerState::Unregistered,
            index: None,
            file_manager,
            discovery,
            registry: None,
            uploader,
            downloader,
            file_listener: None,
            metrics,
        })
    }

    pub fn identity(&self) -> PeerIdentity {
        self.identity
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn index(&self) -> Option<PeerIdentity> {
        self.index
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    async fn rescan(&self) -> Result<FileListing> {
        let mut fm = self.file_manager.lock().await;
        Ok(fm.scan_files().await?.clone())
    }

    /// Announce ourselves. Joins an existing index if one acknowledges within the
    /// ack bound, otherwise takes the index role.
    pub async fn register(&mut self) -> Result<Registration> {
        self.ensure_running()?;
        let listing = self.rescan().await?;

        // our own loop must not swallow our own broadcast
        if let Some(service) = self.registry.as_mut() {
            service.pause().await?;
        }

        self.state = PeerState::Registering;
        let outcome = match self.discovery.register(&listing).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.restore_after_failed_register();
                return Err(e);
            }
        };

        let registration = match outcome {
            Some(index) if index != self.identity => {
                if let Some(service) = self.registry.take() {
                    let dropped = service.shutdown().await?;
                    warn!(
                        "Index {} answered; dropping local registry of {} entries",
                        index,
                        dropped.len()
                    );
                }
                self.index = Some(index);
                self.state = PeerState::Member;
                Registration::Member { index }
            }
            _ => {
                info!("No index answered: Creating Index Server...");
                self.elect_self(listing).await?;
                Registration::Index
            }
        };

        self.start_file_listener()?;
        Ok(registration)
    }

    fn restore_after_failed_register(&mut self) {
        self.state = match (&mut self.registry, self.index) {
            (Some(service), _) => {
                if let Err(e) = service.resume() {
                    warn!("Could not resume index server: {}", e);
                }
                PeerState::Index
            }
            (None, Some(_)) => PeerState::Member,
            (None, None) => PeerState::Unregistered,
        };
    }

    /// Take the index role with `listing` as our own entry. An existing local
    /// registry keeps its entries and only has ours refreshed.
    async fn elect_self(&mut self, listing: FileListing) -> Result<()> {
        let identity = self.identity;
        match self.registry.as_mut() {
            Some(service) => {
                service
                    .with_registry(|registry| registry.refresh(identity, listing))
                    .await?;
            }
            None => {
                let service = RegistryService::start(
                    identity,
                    self.config.control_bind_addr(),
                    self.config.reply_timeout(),
                    Registry::with_entry(identity, listing),
                    self.metrics.clone(),
                )?;
                self.registry = Some(service);
            }
        }

        self.metrics.record_self_election().await;
        self.index = Some(identity);
        self.state = PeerState::Index;
        info!("{} is now the index", identity);
        Ok(())
    }

    /// Fallback when the known index stopped answering.
    async fn take_over_from(&mut self, dead: PeerIdentity) -> Result<()> {
        warn!("Index {} is not responding, electing self", dead);
        self.state = PeerState::Registering;
        let listing = self.rescan().await?;
        self.elect_self(listing).await?;
        self.start_file_listener()
    }

    fn start_file_listener(&mut self) -> Result<()> {
        if self
            .file_listener
            .as_ref()
            .is_some_and(|(_, task)| !task.is_finished())
        {
            return Ok(());
        }

        let listener = Transport::listen(self.config.data_bind_addr())?;
        let cancel = CancellationToken::new();
        let task = self.uploader.clone().spawn(listener, cancel.clone());
        self.file_listener = Some((cancel, task));
        Ok(())
    }

    /// The registry snapshot, read locally on the index or fetched from it.
    pub async fn retrieve(&mut self) -> Result<String> {
        self.ensure_running()?;

        if let Some(service) = self.registry.as_mut() {
            return service.snapshot().await;
        }

        let index = self.index.ok_or(P2PError::NotRegistered)?;
        match self.discovery.retrieve(index).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) if e.is_timeout() => {
                self.take_over_from(index).await?;
                Err(P2PError::IndexUnreachable(index.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Pull every file `target` publishes into our working directory, then
    /// republish our own grown listing.
    pub async fn sync(&mut self, target: &str) -> Result<SyncReport> {
        self.ensure_running()?;
        let peer: PeerIdentity = target.parse()?;
        if peer == self.identity {
            return Err(P2PError::SelfSync(peer.to_string()));
        }

        let listing = self.resolve_listing(peer).await?;
        debug!("{} lists {} files", peer, listing.len());

        let pulled = self.downloader.pull(peer, &listing).await;
        if let Err(e) = self.republish().await {
            warn!("Could not republish listing after sync: {}", e);
        }
        let pulled = pulled?;

        Ok(SyncReport {
            peer,
            listed: listing.len(),
            pulled,
        })
    }

    async fn resolve_listing(&mut self, peer: PeerIdentity) -> Result<FileListing> {
        if let Some(service) = self.registry.as_mut() {
            return service
                .lookup(&peer)
                .await?
                .ok_or_else(|| P2PError::PeerNotFound(peer.to_string()));
        }

        let index = self.index.ok_or(P2PError::NotRegistered)?;
        let resolved = match self.discovery.lookup(index, peer).await {
            // the index answers an unknown peer with an empty listing too
            Ok(listing) if listing.is_empty() => {
                self.discovery.retrieve(index).await.and_then(|snapshot| {
                    if Registry::snapshot_lists(&snapshot, &peer) {
                        Ok(listing)
                    } else {
                        Err(P2PError::PeerNotFound(peer.to_string()))
                    }
                })
            }
            other => other,
        };

        match resolved {
            Ok(listing) => Ok(listing),
            Err(e) if e.is_timeout() => {
                self.take_over_from(index).await?;
                Err(P2PError::IndexUnreachable(index.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Push a freshly scanned listing to the index: locally when we are it,
    /// otherwise unregister + register against the known index.
    async fn republish(&mut self) -> Result<()> {
        let listing = self.rescan().await?;
        let identity = self.identity;

        if let Some(service) = self.registry.as_mut() {
            return service
                .with_registry(|registry| registry.refresh(identity, listing))
                .await;
        }

        if let Some(index) = self.index {
            self.discovery.unregister(index).await?;
            if self.discovery.register_with(index, &listing).await?.is_none() {
                warn!("Index {} did not acknowledge refreshed listing", index);
            }
        }
        Ok(())
    }

    /// Leave the overlay and release every socket this peer holds.
    pub async fn exit(&mut self) -> Result<()> {
        if self.state == PeerState::Terminated {
            return Ok(());
        }
        let was = self.state;
        self.state = PeerState::Exiting;

        if let Some(mut service) = self.registry.take() {
            let identity = self.identity;
            if let Err(e) = service
                .with_registry(|registry| registry.unregister(&identity))
                .await
            {
                warn!("Could not remove own entry: {}", e);
            }
            service.shutdown().await?;
        } else if let (PeerState::Member, Some(index)) = (was, self.index) {
            if let Err(e) = self.discovery.unregister(index).await {
                warn!("Unregister from {} failed: {}", index, e);
            }
        }

        if let Some((cancel, task)) = self.file_listener.take() {
            cancel.cancel();
            task.await?;
        }

        self.index = None;
        self.state = PeerState::Terminated;
        info!("Peer {} left the network", self.identity);
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state {
            PeerState::Exiting | PeerState::Terminated => Err(P2PError::NetworkError(
                "peer has already exited".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> Config {
        Config {
            working_dir: dir.join("syncFolder"),
            identity: Some("127.0.0.41".parse().unwrap()),
            bind_ip: Some("127.0.0.41".parse().unwrap()),
            broadcast_ip: Some("127.0.0.42".parse().unwrap()),
            control_port: 47450,
            data_port: 47451,
            ack_timeout_ms: 200,
            reply_timeout_ms: 400,
        }
    }

    #[tokio::test]
    async fn test_retrieve_before_register_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let mut node = Node::new(config(root.path())).await.unwrap();

        assert_eq!(node.state(), PeerState::Unregistered);
        assert!(root.path().join("syncFolder").is_dir());
        assert!(matches!(
            node.retrieve().await,
            Err(P2PError::NotRegistered)
        ));
        assert!(matches!(
            node.sync("127.0.0.43").await,
            Err(P2PError::NotRegistered)
        ));
    }

    #[tokio::test]
    async fn test_sync_with_own_address_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config(root.path());
        config.identity = Some("127.0.0.44".parse().unwrap());
        config.bind_ip = config.identity;
        config.control_port = 47452;
        config.data_port = 47453;

        let mut node = Node::new(config).await.unwrap();
        let kept = root.path().join("syncFolder").join("keep.txt");
        std::fs::write(&kept, b"precious data").unwrap();
        assert_eq!(node.register().await.unwrap(), Registration::Index);

        let err = node.sync("127.0.0.44").await.unwrap_err();
        assert!(matches!(err, P2PError::SelfSync(_)), "{}", err);
        assert_eq!(std::fs::read(&kept).unwrap(), b"precious data");
        node.exit().await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_is_final() {
        let root = tempfile::tempdir().unwrap();
        let mut node = Node::new(config(root.path())).await.unwrap();

        node.exit().await.unwrap();
        assert_eq!(node.state(), PeerState::Terminated);
        assert!(node.register().await.is_err());
        node.exit().await.unwrap();
    }
}
