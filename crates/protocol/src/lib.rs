//! Dice protocol - commit-reveal rounds for provably-fair P2P rolls
//!
//! Architecture:
//! - Every participant blinds a random secret behind a SHA-256 commitment
//! - Once all expected peers have committed, everyone reveals their secret
//! - The roll is the XOR of all secrets mapped into the dice range
//! - Any peer can re-verify every commitment from the final transcript
//!
//! This crate is transport-agnostic: the round engine consumes a
//! [`Transport`] implementation for outbound messages and is driven by a
//! single caller loop (inbound frames, console commands, the reveal
//! deadline), so round state is never mutated concurrently.

pub mod crypto;
pub mod error;
pub mod frame;
pub mod message;
pub mod peer;
pub mod result;
pub mod round;

pub use error::ProtocolError;
pub use frame::FrameBuffer;
pub use message::{CancelReason, Dice, RoundId, WireMessage};
pub use peer::{PeerId, PeerRegistry};
pub use result::{RollResult, SeedCheck, TranscriptAudit};
pub use round::{FraudNotice, Phase, QuorumPolicy, RoundEngine, RoundEvent, Transport};

use std::time::Duration;

/// How long the reveal phase may run before the round is abandoned
pub const REVEAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Length of a locally generated secret in bytes
pub const SECRET_LEN: usize = 32;

/// Display aliases are truncated to this many characters
pub const MAX_ALIAS_LEN: usize = 24;

/// An unterminated wire frame longer than this is treated as hostile
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

#[cfg(test)]
mod tests;
