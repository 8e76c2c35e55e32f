//! Node identity keys and announce signing
//!
//! A node's identity is an ephemeral ed25519 key generated at startup; the
//! peer id is the verifying key. An `ANNOUNCE` carries a signature over a
//! domain-tagged payload of the key and the alias, so a peer proves it
//! holds the key it claims and aliases cannot be forged for someone
//! else's identity.

use dice_protocol::{PeerId, WireMessage};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;

const ANNOUNCE_CONTEXT: &[u8] = b"dicenet/announce/v1";

/// The local node's signing identity
pub struct NodeIdentity {
    key: SigningKey,
}

impl NodeIdentity {
    /// Fresh ephemeral identity
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId::from_bytes(self.key.verifying_key().to_bytes())
    }

    /// Build a signed `ANNOUNCE` for the given alias
    pub fn signed_announce(&self, alias: &str) -> WireMessage {
        let peer = self.peer_id();
        let sig = self.key.sign(&announce_payload(&peer, alias));
        WireMessage::Announce {
            peer,
            alias: alias.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            sig: hex::encode(sig.to_bytes()),
        }
    }
}

/// Check an announce signature against the identity it claims
pub fn verify_announce(peer: &PeerId, alias: &str, sig_hex: &str) -> bool {
    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(peer.as_bytes()) else {
        return false;
    };
    key.verify(&announce_payload(peer, alias), &sig).is_ok()
}

fn announce_payload(peer: &PeerId, alias: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(ANNOUNCE_CONTEXT.len() + PeerId::LEN + alias.len());
    payload.extend_from_slice(ANNOUNCE_CONTEXT);
    payload.extend_from_slice(peer.as_bytes());
    payload.extend_from_slice(alias.as_bytes());
    payload
}
