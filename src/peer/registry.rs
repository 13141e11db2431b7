//! Known peers and their negotiated transport addresses.
//!
//! An entry appears when a peer's transport address is learned from an
//! Offer or Answer and disappears on `Leave` or transport failure.
//! Peer ids are regenerated on every run, so entries never outlive the
//! process that recorded them.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<String, String>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, peer: impl Into<String>, address: impl Into<String>) {
        self.peers.insert(peer.into(), address.into());
    }

    /// Returns true if the peer was known.
    pub fn forget(&mut self, peer: &str) -> bool {
        self.peers.remove(peer).is_some()
    }

    pub fn address_of(&self, peer: &str) -> Option<&str> {
        self.peers.get(peer).map(String::as_str)
    }

    pub fn contains(&self, peer: &str) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
