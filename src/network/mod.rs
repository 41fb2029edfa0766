pub mod discovery;
pub mod index_service;
pub mod transport;

pub use discovery::Discovery;
pub use index_service::{RegistryService, ServiceStatus};
pub use transport::Transport;
