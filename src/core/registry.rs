use log::{debug, info};
use std::collections::BTreeMap;

use crate::core::protocol::{FileListing, PeerIdentity};

/// Identity → listing map held by the index peer.
///
/// Only ever touched by one activity at a time: the index loop while it listens,
/// or the owning agent while the loop is paused.
#[derive(Debug, Default)]
pub struct Registry {
    entries: BTreeMap<PeerIdentity, FileListing>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeded with the electing peer's own entry.
    pub fn with_entry(identity: PeerIdentity, listing: FileListing) -> Self {
        let mut registry = Self::new();
        registry.register(identity, listing);
        registry
    }

    /// First write wins: returns false and keeps the stored listing when the
    /// identity is already registered.
    pub fn register(&mut self, identity: PeerIdentity, listing: FileListing) -> bool {
        if self.entries.contains_key(&identity) {
            debug!("{} already registered, keeping existing listing", identity);
            return false;
        }

        info!("Registered {} ({} files)", identity, listing.len());
        self.entries.insert(identity, listing);
        true
    }

    pub fn unregister(&mut self, identity: &PeerIdentity) -> bool {
        if self.entries.remove(identity).is_some() {
            info!("Unregistered {}", identity);
            true
        } else {
            false
        }
    }

    /// Replace an entry through the unregister + register path.
    pub fn refresh(&mut self, identity: PeerIdentity, listing: FileListing) {
        self.unregister(&identity);
        self.register(identity, listing);
    }

    pub fn retrieve_one(&self, identity: &PeerIdentity) -> Option<&FileListing> {
        self.entries.get(identity)
    }

    /// One `"<identity> : <listing>"` line per entry.
    pub fn retrieve_all(&self) -> String {
        self.entries
            .iter()
            .map(|(identity, listing)| format!("{} : {}\n", identity, listing))
            .collect()
    }

    /// Whether a rendered snapshot carries a line for `identity`.
    pub fn snapshot_lists(snapshot: &str, identity: &PeerIdentity) -> bool {
        let identity = identity.to_string();
        snapshot
            .lines()
            .any(|line| line.split(" : ").next() == Some(identity.as_str()))
    }

    pub fn contains(&self, identity: &PeerIdentity) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(ip: &str) -> PeerIdentity {
        ip.parse().unwrap()
    }

    #[test]
    fn test_first_registration_wins() {
        let mut registry = Registry::new();
        assert!(registry.register(peer("10.0.0.2"), FileListing::decode("a.txt@")));
        assert!(!registry.register(peer("10.0.0.2"), FileListing::decode("b.txt@")));

        assert_eq!(
            registry.retrieve_one(&peer("10.0.0.2")).unwrap().encode(),
            "a.txt@"
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregister_removes_from_snapshot() {
        let mut registry = Registry::with_entry(peer("10.0.0.1"), FileListing::decode("x@"));
        registry.register(peer("10.0.0.2"), FileListing::decode("y@"));

        assert!(registry.unregister(&peer("10.0.0.2")));
        assert!(!registry.retrieve_all().contains("10.0.0.2"));
        assert!(registry.retrieve_all().contains("10.0.0.1 : x@"));

        // idempotent
        assert!(!registry.unregister(&peer("10.0.0.2")));
    }

    #[test]
    fn test_register_after_unregister_takes_new_listing() {
        let mut registry = Registry::with_entry(peer("10.0.0.3"), FileListing::decode("old@"));
        registry.refresh(peer("10.0.0.3"), FileListing::decode("old@new@"));

        assert_eq!(
            registry.retrieve_one(&peer("10.0.0.3")).unwrap().names(),
            ["old", "new"]
        );
    }

    #[test]
    fn test_snapshot_lists_matches_whole_identity() {
        let mut registry = Registry::new();
        registry.register(peer("10.0.0.12"), FileListing::default());
        let snapshot = registry.retrieve_all();

        assert!(Registry::snapshot_lists(&snapshot, &peer("10.0.0.12")));
        assert!(!Registry::snapshot_lists(&snapshot, &peer("10.0.0.1")));
        assert!(!Registry::snapshot_lists("", &peer("10.0.0.12")));
    }

    #[test]
    fn test_snapshot_lists_every_entry() {
        let mut registry = Registry::new();
        registry.register(peer("10.0.0.9"), FileListing::default());
        registry.register(peer("10.0.0.1"), FileListing::decode("a@b@"));

        assert_eq!(registry.retrieve_all(), "10.0.0.1 : a@b@\n10.0.0.9 : \n");
        assert!(registry.retrieve_one(&peer("10.0.0.5")).is_none());
    }
}
