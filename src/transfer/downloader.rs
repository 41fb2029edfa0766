use log::{info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::core::{FileListing, PeerIdentity};
use crate::network::Transport;
use crate::storage::resolve_in;
use crate::utils::{MetricsCollector, P2PError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub files: usize,
    pub bytes: u64,
}

/// Pulling side of the data channel.
pub struct Downloader {
    working_dir: PathBuf,
    data_port: u16,
    connect_timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

impl Downloader {
    pub fn new(
        working_dir: PathBuf,
        data_port: u16,
        connect_timeout: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            working_dir,
            data_port,
            connect_timeout,
            metrics,
        }
    }

    /// One connection per listed name, in order, each read until the sender
    /// closes it. The first failure aborts the rest; files already written stay.
    pub async fn pull(&self, from: PeerIdentity, listing: &FileListing) -> Result<PullReport> {
        let addr = SocketAddr::new(from.ip(), self.data_port);
        let mut report = PullReport::default();

        for name in listing.iter() {
            let path = resolve_in(&self.working_dir, name)?;
            let mut stream = Transport::connect(addr, self.connect_timeout).await?;
            info!("Receiving {} from {}", name, from);

            let mut file = File::create(&path).await.map_err(|e| {
                P2PError::IoError(format!("Failed to create {}: {}", path.display(), e))
            })?;
            let bytes = tokio::io::copy(&mut stream, &mut file).await?;
            file.flush().await?;
            if bytes == 0 {
                warn!("{} from {} arrived empty", name, from);
            }

            self.metrics.record_file_pulled(bytes).await;
            report.files += 1;
            report.bytes += bytes;
        }

        info!(
            "Pulled {} files ({} bytes) from {}",
            report.files, report.bytes, from
        );
        Ok(report)
    }
}
