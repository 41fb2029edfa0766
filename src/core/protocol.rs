//! Wire vocabulary of the control channel.
//!
//! Requests are single datagrams of ASCII text. Replies travel over a short stream
//! connection opened by the index back to the requester's control port and are
//! terminated by closing it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::utils::P2PError;

pub const REGISTERED: &str = "REGISTERED";
pub const RETRIEVE: &str = "RETRIEVE";
pub const UNREGISTER: &str = "UNREGISTER";

/// Separator between file names in a listing. Not escaped: a name containing it
/// splits into two names on the receiving side.
pub const LISTING_DELIMITER: char = '@';

/// Largest request datagram the index will read.
pub const MAX_DATAGRAM: usize = 65_507;

/// A peer's address on the local segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerIdentity(pub IpAddr);

impl PeerIdentity {
    pub fn ip(&self) -> IpAddr {
        self.0
    }
}

impl From<IpAddr> for PeerIdentity {
    fn from(ip: IpAddr) -> Self {
        Self(ip)
    }
}

impl FromStr for PeerIdentity {
    type Err = P2PError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<IpAddr>()
            .map(Self)
            .map_err(|_| P2PError::InvalidAddress(s.to_string()))
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Ordered file names one peer publishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListing(Vec<String>);

impl FileListing {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    /// `"a.txt@b.txt@"` → `["a.txt", "b.txt"]`. Empty segments are dropped.
    pub fn decode(wire: &str) -> Self {
        Self(
            wire.split(LISTING_DELIMITER)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Every name followed by the delimiter, trailing one included.
    pub fn encode(&self) -> String {
        let mut wire = String::new();
        for name in &self.0 {
            wire.push_str(name);
            wire.push(LISTING_DELIMITER);
        }
        wire
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FileListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Register(FileListing),
    Retrieve,
    Lookup(PeerIdentity),
    Unregister,
}

impl ControlMessage {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ControlMessage::Register(listing) => listing.encode().into_bytes(),
            ControlMessage::Retrieve => RETRIEVE.as_bytes().to_vec(),
            ControlMessage::Lookup(target) => target.to_string().into_bytes(),
            ControlMessage::Unregister => UNREGISTER.as_bytes().to_vec(),
        }
    }

    /// Classify a request payload. `None` means the payload is not part of the
    /// vocabulary and should be dropped.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(payload).ok()?;

        match text {
            RETRIEVE => Some(ControlMessage::Retrieve),
            UNREGISTER => Some(ControlMessage::Unregister),
            _ => {
                if let Ok(ip) = text.parse::<IpAddr>() {
                    Some(ControlMessage::Lookup(PeerIdentity(ip)))
                } else if text.is_empty() || text.ends_with(LISTING_DELIMITER) {
                    Some(ControlMessage::Register(FileListing::decode(text)))
                } else {
                    None
                }
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Register(_) => "register",
            ControlMessage::Retrieve => "retrieve",
            ControlMessage::Lookup(_) => "lookup",
            ControlMessage::Unregister => "unregister",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_wire_round_trip() {
        let listing = FileListing::decode("a.txt@b.txt@");
        assert_eq!(listing.names(), ["a.txt", "b.txt"]);
        assert_eq!(listing.encode(), "a.txt@b.txt@");
    }

    #[test]
    fn test_empty_listing_is_empty_string() {
        assert_eq!(FileListing::default().encode(), "");
        assert!(FileListing::decode("").is_empty());
    }

    #[test]
    fn test_delimiter_in_name_splits_it() {
        let listing = FileListing::new(vec!["me@home.txt".to_string()]);
        let decoded = FileListing::decode(&listing.encode());
        assert_eq!(decoded.names(), ["me", "home.txt"]);
    }

    #[test]
    fn test_decode_tokens() {
        assert_eq!(
            ControlMessage::decode(b"RETRIEVE"),
            Some(ControlMessage::Retrieve)
        );
        assert_eq!(
            ControlMessage::decode(b"UNREGISTER"),
            Some(ControlMessage::Unregister)
        );
        assert_eq!(
            ControlMessage::decode(b"192.168.0.4"),
            Some(ControlMessage::Lookup("192.168.0.4".parse().unwrap()))
        );
        assert_eq!(
            ControlMessage::decode(b"notes.md@"),
            Some(ControlMessage::Register(FileListing::new(vec![
                "notes.md".to_string()
            ])))
        );
        assert_eq!(
            ControlMessage::decode(b""),
            Some(ControlMessage::Register(FileListing::default()))
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(ControlMessage::decode(b"HELLO"), None);
        assert_eq!(ControlMessage::decode(&[0xff, 0xfe, b'@']), None);
    }

    #[test]
    fn test_encode_matches_decode() {
        let lookup = ControlMessage::Lookup("10.1.2.3".parse().unwrap());
        assert_eq!(lookup.encode(), b"10.1.2.3".to_vec());
        assert_eq!(ControlMessage::decode(&lookup.encode()), Some(lookup));
    }

    #[test]
    fn test_identity_parse_errors() {
        assert!(matches!(
            "not-an-ip".parse::<PeerIdentity>(),
            Err(P2PError::InvalidAddress(_))
        ));
    }
}
