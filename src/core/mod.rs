pub mod config;
pub mod node;
pub mod protocol;
pub mod registry;

pub use config::Config;
pub use node::{Node, PeerState, Registration, SyncReport};
pub use protocol::{ControlMessage, FileListing, PeerIdentity};
pub use registry::Registry;
