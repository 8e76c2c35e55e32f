//! Peer identities and the connected-peer registry

use crate::error::ProtocolError;
use crate::MAX_ALIAS_LEN;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Opaque peer identity: the peer's ed25519 verifying key
///
/// Rendered as lowercase hex on the wire and in logs. Ordered so it can key
/// deterministic maps in the round transcript.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId([u8; 32]);

impl PeerId {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Abbreviated form for display: 8 leading + 4 trailing hex chars
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}\u{2026}{}", &full[..8], &full[full.len() - 4..])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

impl FromStr for PeerId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| ProtocolError::InvalidPeerId(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ProtocolError::InvalidPeerId(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PeerIdVisitor;

        impl Visitor<'_> for PeerIdVisitor {
            type Value = PeerId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 64-character hex peer id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<PeerId, E> {
                v.parse().map_err(|_| E::custom("invalid peer id"))
            }
        }

        deserializer.deserialize_str(PeerIdVisitor)
    }
}

/// Membership store for currently connected peers and their display aliases
///
/// Mutated only by transport connect/disconnect notifications and alias
/// announcements; the round engine only reads it. Aliases are free text,
/// truncated to [`MAX_ALIAS_LEN`], and may collide between peers.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: BTreeMap<PeerId, String>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer. Without an alias the abbreviated id is used.
    pub fn add(&mut self, id: PeerId, alias: Option<String>) {
        let alias = alias
            .map(|a| truncate_alias(&a))
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| id.short());
        self.peers.insert(id, alias);
    }

    /// Remove a peer. Returns whether it was present.
    pub fn remove(&mut self, id: &PeerId) -> bool {
        self.peers.remove(id).is_some()
    }

    /// Update a registered peer's alias. Returns false for unknown peers.
    pub fn set_alias(&mut self, id: &PeerId, alias: &str) -> bool {
        match self.peers.get_mut(id) {
            Some(slot) => {
                let alias = truncate_alias(alias);
                if !alias.is_empty() {
                    *slot = alias;
                }
                true
            }
            None => false,
        }
    }

    pub fn alias_of(&self, id: &PeerId) -> Option<&str> {
        self.peers.get(id).map(String::as_str)
    }

    /// Display name: the alias if known, the abbreviated id otherwise
    pub fn name_of(&self, id: &PeerId) -> String {
        self.alias_of(id)
            .map(str::to_string)
            .unwrap_or_else(|| id.short())
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, &str)> {
        self.peers.iter().map(|(id, alias)| (id, alias.as_str()))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Truncate an alias to [`MAX_ALIAS_LEN`] characters on a char boundary
pub fn truncate_alias(alias: &str) -> String {
    alias.trim().chars().take(MAX_ALIAS_LEN).collect()
}
