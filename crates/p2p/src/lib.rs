//! P2P transport for the dice protocol
//!
//! A small TCP mesh: every node listens on one address and dials any peers
//! it was pointed at. Each connection starts with a signed `ANNOUNCE` that
//! binds the link to an ed25519 identity; after that, frames are
//! newline-delimited JSON as defined by `dice-protocol`. The swarm hands
//! connect/disconnect/message events to the caller over a single channel
//! and implements the protocol's outbound [`Transport`] contract.
//!
//! [`Transport`]: dice_protocol::Transport

pub mod identity;
pub mod swarm;

pub use identity::NodeIdentity;
pub use swarm::{Swarm, SwarmConfig, SwarmEvent, SwarmHandle};
