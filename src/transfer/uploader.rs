use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::storage::FileManager;
use crate::utils::{MetricsCollector, Result};

/// Serving side of the data channel: one accepted connection per listed file,
/// in listing order, round after round.
///
/// A file that cannot be opened when its turn comes is skipped by closing the
/// connection without data; the puller then receives it as an empty file.
pub struct Uploader {
    file_manager: Arc<Mutex<FileManager>>,
    metrics: Arc<MetricsCollector>,
}

impl Uploader {
    pub fn new(file_manager: Arc<Mutex<FileManager>>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            file_manager,
            metrics,
        }
    }

    pub fn spawn(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.serve(listener, cancel).await })
    }

    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) {
        info!("Socket started listening for file requests");

        'rounds: loop {
            // the round's listing is read once its first puller has connected
            let Some(first) = Self::accept(&listener, &cancel).await else {
                break;
            };
            let (listing, dir) = {
                let fm = self.file_manager.lock().await;
                (fm.listing().clone(), fm.working_dir().to_path_buf())
            };

            if listing.is_empty() {
                debug!("Nothing to serve to {}", first.1.ip());
                continue;
            }

            debug!("Serving round of {} files", listing.len());
            let mut pending = Some(first);
            for name in listing.iter() {
                let (stream, peer) = match pending.take() {
                    Some(accepted) => accepted,
                    None => match Self::accept(&listener, &cancel).await {
                        Some(accepted) => accepted,
                        None => break 'rounds,
                    },
                };

                info!("Sending {} to {}", name, peer.ip());
                match self.send_file(stream, &dir.join(name)).await {
                    Ok(bytes) => self.metrics.record_file_served(bytes).await,
                    Err(e) => warn!("Failed to send {} to {}: {}", name, peer.ip(), e),
                }
            }
        }

        info!("File listener closed");
    }

    /// `None` once cancelled or after an accept fault, which ends the listener.
    async fn accept(
        listener: &TcpListener,
        cancel: &CancellationToken,
    ) -> Option<(TcpStream, SocketAddr)> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => Some(accepted),
                Err(e) => {
                    error!("File listener accept failed, stopping: {}", e);
                    None
                }
            },
        }
    }

    async fn send_file(&self, mut stream: TcpStream, path: &Path) -> Result<u64> {
        let mut file = File::open(path).await?;
        let bytes = tokio::io::copy(&mut file, &mut stream).await?;
        stream.flush().await?;
        stream.shutdown().await?;
        Ok(bytes)
    }
}
