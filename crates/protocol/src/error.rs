//! Protocol errors

use thiserror::Error;

/// Errors surfaced by the dice protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unsupported dice: d{0}")]
    UnsupportedDice(u16),

    #[error("a round is already in progress")]
    RoundActive,

    #[error("no peers connected")]
    NoPeers,

    #[error("unterminated frame of {len} bytes exceeds the {max} byte limit")]
    OversizedFrame { len: usize, max: usize },

    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),
}
