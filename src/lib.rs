//! LAN file sync library
//!
//! Peers on one network segment find each other by broadcast, one of them takes
//! the index role and keeps everyone's file listings, and peers pull files from
//! each other one connection per file.

pub mod core;
pub mod network;
pub mod storage;
pub mod transfer;
pub mod utils;

// Re-export main types
pub use crate::core::{Config, FileListing, Node, PeerIdentity, PeerState, Registration, Registry};
pub use network::{Discovery, RegistryService};
pub use utils::{
    NodeUtils,
    error::{P2PError, Result},
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
