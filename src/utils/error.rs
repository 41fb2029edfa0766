use thiserror::Error;

pub type Result<T> = std::result::Result<T, P2PError>;

#[derive(Error, Debug)]
pub enum P2PError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cannot access index server {0}")]
    IndexUnreachable(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Cannot sync with own address {0}")]
    SelfSync(String),

    #[error("Not registered with any index")]
    NotRegistered,

    #[error("Index registry is unavailable")]
    RegistryUnavailable,

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl P2PError {
    /// True for the errors raised when an expected reply never arrived.
    pub fn is_timeout(&self) -> bool {
        matches!(self, P2PError::Timeout(_) | P2PError::IndexUnreachable(_))
    }
}

impl From<std::io::Error> for P2PError {
    fn from(err: std::io::Error) -> Self {
        P2PError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for P2PError {
    fn from(err: serde_json::Error) -> Self {
        P2PError::SerializationError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for P2PError {
    fn from(err: tokio::task::JoinError) -> Self {
        P2PError::TaskFailed(err.to_string())
    }
}
