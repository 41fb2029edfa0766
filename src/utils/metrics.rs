use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct PeerMetrics {
    pub control_messages: u64,
    pub malformed_messages: u64,
    pub registrations: u64,
    pub self_elections: u64,
    pub files_served: u64,
    pub files_pulled: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub uptime: Duration,
    pub start_time: Instant,
}

impl Default for PeerMetrics {
    fn default() -> Self {
        Self {
            control_messages: 0,
            malformed_messages: 0,
            registrations: 0,
            self_elections: 0,
            files_served: 0,
            files_pulled: 0,
            bytes_sent: 0,
            bytes_received: 0,
            uptime: Duration::new(0, 0),
            start_time: Instant::now(),
        }
    }
}

/// Counters shared by the index loop, the data listener and the foreground agent.
#[derive(Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<PeerMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_control_message(&self) {
        self.metrics.write().await.control_messages += 1;
    }

    pub async fn record_malformed_message(&self) {
        self.metrics.write().await.malformed_messages += 1;
    }

    pub async fn record_registration(&self) {
        self.metrics.write().await.registrations += 1;
    }

    pub async fn record_self_election(&self) {
        self.metrics.write().await.self_elections += 1;
    }

    pub async fn record_file_served(&self, bytes: u64) {
        let mut metrics = self.metrics.write().await;
        metrics.files_served += 1;
        metrics.bytes_sent += bytes;
    }

    pub async fn record_file_pulled(&self, bytes: u64) {
        let mut metrics = self.metrics.write().await;
        metrics.files_pulled += 1;
        metrics.bytes_received += bytes;
    }

    pub async fn get_metrics(&self) -> PeerMetrics {
        let mut metrics = self.metrics.read().await.clone();
        metrics.uptime = metrics.start_time.elapsed();
        metrics
    }

    pub async fn print_stats(&self) {
        let metrics = self.get_metrics().await;

        println!("\n=== Peer Statistics ===");
        println!("Uptime: {:.2?}", metrics.uptime);
        println!(
            "Index: {} control messages ({} malformed), {} registrations",
            metrics.control_messages, metrics.malformed_messages, metrics.registrations
        );
        println!("Self-elections: {}", metrics.self_elections);
        println!(
            "Files: {} served ({} bytes), {} pulled ({} bytes)",
            metrics.files_served, metrics.bytes_sent, metrics.files_pulled, metrics.bytes_received
        );
        println!("=======================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transfer_counters_accumulate() {
        let collector = MetricsCollector::new();
        collector.record_file_served(10).await;
        collector.record_file_served(5).await;
        collector.record_file_pulled(7).await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.files_served, 2);
        assert_eq!(metrics.bytes_sent, 15);
        assert_eq!(metrics.files_pulled, 1);
        assert_eq!(metrics.bytes_received, 7);
    }
}
