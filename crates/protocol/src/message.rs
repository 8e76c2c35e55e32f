//! Wire message envelope and protocol vocabulary

use crate::error::ProtocolError;
use crate::peer::PeerId;
use crate::result::RollResult;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The supported dice, a closed set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dice {
    D4,
    D6,
    D8,
    D10,
    D12,
    D20,
    D100,
}

impl Dice {
    pub const ALL: [Dice; 7] = [
        Dice::D4,
        Dice::D6,
        Dice::D8,
        Dice::D10,
        Dice::D12,
        Dice::D20,
        Dice::D100,
    ];

    pub fn sides(self) -> u16 {
        match self {
            Dice::D4 => 4,
            Dice::D6 => 6,
            Dice::D8 => 8,
            Dice::D10 => 10,
            Dice::D12 => 12,
            Dice::D20 => 20,
            Dice::D100 => 100,
        }
    }
}

impl TryFrom<u16> for Dice {
    type Error = ProtocolError;

    fn try_from(sides: u16) -> Result<Self, Self::Error> {
        Dice::ALL
            .into_iter()
            .find(|d| d.sides() == sides)
            .ok_or(ProtocolError::UnsupportedDice(sides))
    }
}

impl fmt::Display for Dice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.sides())
    }
}

/// Per-round token chosen by the initiator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub(crate) String);

impl RoundId {
    /// Fresh random id, collision-negligible for one round at a time
    pub fn generate() -> Self {
        let mut bytes = [0u8; 4];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a round was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// A revealed secret did not hash to its prior commitment
    CommitMismatch,
    /// Not every expected reveal arrived before the deadline
    RevealTimeout,
    /// A participant dropped off mid-round
    PeerDisconnected,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancelReason::CommitMismatch => "commit_mismatch",
            CancelReason::RevealTimeout => "reveal_timeout",
            CancelReason::PeerDisconnected => "peer_disconnected",
        };
        f.write_str(s)
    }
}

/// One frame on the wire: a self-describing JSON object per newline
///
/// `sides` travels as a raw number so an unsupported value is still
/// decodable and can be rejected with a local notice instead of being
/// dropped as malformed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum WireMessage {
    /// Out-of-band presence: identity, display alias, and a signature
    /// binding the alias to the identity key
    Announce {
        peer: PeerId,
        alias: String,
        version: String,
        sig: String,
    },
    /// Initiate a round
    RollRequest { round_id: RoundId, sides: u16 },
    /// Phase 1: hex SHA-256 of the sender's secret
    Commit { round_id: RoundId, commit: String },
    /// Phase 2: the hex-encoded secret itself
    Reveal { round_id: RoundId, seed: String },
    /// Final transcript, broadcast by the initiator
    Result(RollResult),
    /// Abandon the round
    Cancel {
        round_id: RoundId,
        reason: CancelReason,
    },
}
