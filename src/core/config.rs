use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{NodeUtils, P2PError, Result};

pub const DEFAULT_CONTROL_PORT: u16 = 57264;
pub const DEFAULT_DATA_PORT: u16 = 57265;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory whose files are published and into which syncs land.
    pub working_dir: PathBuf,
    /// This peer's address on the segment; detected at startup when absent.
    pub identity: Option<IpAddr>,
    /// Local address the index loop and data listener bind; all interfaces when absent.
    pub bind_ip: Option<IpAddr>,
    /// Where registration requests are broadcast; `x.y.z.255` of the identity when absent.
    pub broadcast_ip: Option<IpAddr>,
    pub control_port: u16,
    pub data_port: u16,
    pub ack_timeout_ms: u64,
    pub reply_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("./syncFolder"),
            identity: None,
            bind_ip: None,
            broadcast_ip: None,
            control_port: DEFAULT_CONTROL_PORT,
            data_port: DEFAULT_DATA_PORT,
            ack_timeout_ms: 2_000,
            reply_timeout_ms: 5_000,
        }
    }
}

impl Config {
    /// Read a JSON config file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            P2PError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.control_port == 0 || self.data_port == 0 {
            return Err(P2PError::ConfigError(
                "control and data ports must be fixed".to_string(),
            ));
        }
        if self.control_port == self.data_port {
            return Err(P2PError::ConfigError(format!(
                "control and data ports must differ (both {})",
                self.control_port
            )));
        }
        if self.ack_timeout_ms == 0 || self.reply_timeout_ms == 0 {
            return Err(P2PError::ConfigError(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn listen_ip(&self) -> IpAddr {
        self.bind_ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    pub fn control_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_ip(), self.control_port)
    }

    pub fn data_bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_ip(), self.data_port)
    }

    pub fn resolve_identity(&self) -> IpAddr {
        self.identity.unwrap_or_else(NodeUtils::detect_local_ip)
    }

    pub fn resolve_broadcast(&self, identity: IpAddr) -> Result<IpAddr> {
        match self.broadcast_ip {
            Some(ip) => Ok(ip),
            None => NodeUtils::broadcast_for(identity),
        }
    }
}
