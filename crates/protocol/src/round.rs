//! Round state machine: commit, reveal, finalize or abandon
//!
//! At most one round exists per process. Every round-affecting input —
//! inbound wire messages, local commands, membership changes, the reveal
//! deadline — must be fed from a single caller loop, so the engine mutates
//! state through plain `&mut self` with no interior locking.

use crate::crypto;
use crate::error::ProtocolError;
use crate::message::{CancelReason, Dice, RoundId, WireMessage};
use crate::peer::{PeerId, PeerRegistry};
use crate::result::RollResult;
use crate::SECRET_LEN;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Outbound side of the transport collaborator
pub trait Transport {
    /// Deliver to every connected peer
    fn broadcast(&self, message: &WireMessage);
    /// Deliver to one peer
    fn send_to(&self, peer: &PeerId, message: &WireMessage);
}

/// How the expected participant set is derived during a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuorumPolicy {
    /// Recompute from currently connected peers on every check: a peer
    /// joining mid-round extends the required set, any disconnect kills
    /// the round
    #[default]
    Live,
    /// Freeze membership when the round is created; later joiners are
    /// ignored and only a frozen member's disconnect kills the round
    FixedAtStart,
}

/// Round lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Commit,
    Reveal,
    Done,
}

/// One in-flight dice-roll negotiation
#[derive(Debug)]
pub struct Round {
    pub(crate) id: RoundId,
    pub(crate) dice: Dice,
    pub(crate) initiator: PeerId,
    pub(crate) phase: Phase,
    pub(crate) commits: BTreeMap<PeerId, String>,
    pub(crate) reveals: BTreeMap<PeerId, Vec<u8>>,
    pub(crate) my_secret: [u8; SECRET_LEN],
    /// `Some` under [`QuorumPolicy::FixedAtStart`]
    pub(crate) frozen: Option<BTreeSet<PeerId>>,
    /// Armed when the reveal phase begins
    pub(crate) deadline: Option<Instant>,
}

impl Round {
    pub fn id(&self) -> &RoundId {
        &self.id
    }

    pub fn dice(&self) -> Dice {
        self.dice
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn initiator(&self) -> &PeerId {
        &self.initiator
    }
}

/// Evidence of a reveal that contradicts its commitment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudNotice {
    pub round_id: RoundId,
    pub peer: PeerId,
    /// What the peer committed to, absent when it never committed at all
    pub expected_commit: Option<String>,
    /// SHA-256 of what it actually revealed
    pub actual_hash: String,
    /// The offending seed, hex-encoded, kept as evidence
    pub seed: String,
}

/// Terminal outcome of a round, emitted exactly once per round id
#[derive(Debug, Clone)]
pub enum RoundEvent {
    /// All reveals verified; the transcript is final
    Finalized(RollResult),
    /// The round was abandoned without a result
    Cancelled {
        round_id: RoundId,
        reason: CancelReason,
    },
    /// A peer provably cheated; the round was abandoned
    Fraud(FraudNotice),
}

/// Drives rounds through commit, reveal, and finalization
pub struct RoundEngine<T: Transport> {
    local_id: PeerId,
    local_alias: String,
    registry: PeerRegistry,
    round: Option<Round>,
    quorum: QuorumPolicy,
    reveal_timeout: Duration,
    transport: T,
    events: mpsc::UnboundedSender<RoundEvent>,
}

impl<T: Transport> RoundEngine<T> {
    pub fn new(
        local_id: PeerId,
        local_alias: &str,
        quorum: QuorumPolicy,
        reveal_timeout: Duration,
        transport: T,
    ) -> (Self, mpsc::UnboundedReceiver<RoundEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let engine = Self {
            local_id,
            local_alias: crate::peer::truncate_alias(local_alias),
            registry: PeerRegistry::new(),
            round: None,
            quorum,
            reveal_timeout,
            transport,
            events,
        };
        (engine, events_rx)
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn local_alias(&self) -> &str {
        &self.local_alias
    }

    /// Update the local display alias, returning the truncated form
    pub fn set_local_alias(&mut self, alias: &str) -> &str {
        self.local_alias = crate::peer::truncate_alias(alias);
        &self.local_alias
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn current_round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    /// Deadline of the reveal phase, when one is armed
    pub fn reveal_deadline(&self) -> Option<Instant> {
        self.round.as_ref().and_then(|round| round.deadline)
    }

    /// Locally initiate a round: broadcast the request, then commit
    pub fn request_roll(&mut self, sides: u16) -> Result<RoundId, ProtocolError> {
        if self.round.is_some() {
            return Err(ProtocolError::RoundActive);
        }
        let dice = Dice::try_from(sides)?;
        if self.registry.is_empty() {
            return Err(ProtocolError::NoPeers);
        }

        let round_id = RoundId::generate();
        tracing::info!(round = %round_id, %dice, peers = self.registry.len(), "starting round");
        self.transport.broadcast(&WireMessage::RollRequest {
            round_id: round_id.clone(),
            sides,
        });
        self.start_round(round_id.clone(), dice, self.local_id);
        Ok(round_id)
    }

    /// Transport connect notification
    pub fn peer_connected(&mut self, peer: PeerId, alias: Option<String>) {
        self.registry.add(peer, alias);
        tracing::info!(
            peer = %self.registry.name_of(&peer),
            total = self.registry.len(),
            "peer connected"
        );
    }

    /// Transport disconnect notification; kills the round the peer was in
    pub fn peer_disconnected(&mut self, peer: PeerId) {
        let known = self.registry.remove(&peer);
        if known {
            tracing::info!(peer = %peer.short(), remaining = self.registry.len(), "peer disconnected");
        }

        let affects_round = match self.round.as_ref() {
            Some(round) if round.phase != Phase::Done => match &round.frozen {
                Some(members) => members.contains(&peer),
                None => true,
            },
            _ => false,
        };
        if affects_round {
            tracing::warn!(peer = %peer.short(), "participant left mid-round, abandoning");
            // Peers observe the disconnect themselves; no cancel broadcast.
            self.destroy(CancelReason::PeerDisconnected);
        }
    }

    /// Total dispatch over the wire vocabulary
    pub fn handle_message(&mut self, from: PeerId, message: WireMessage) {
        match message {
            WireMessage::Announce { alias, .. } => self.on_announce(from, alias),
            WireMessage::RollRequest { round_id, sides } => {
                self.on_roll_request(from, round_id, sides)
            }
            WireMessage::Commit { round_id, commit } => self.on_commit(from, round_id, commit),
            WireMessage::Reveal { round_id, seed } => self.on_reveal(from, round_id, seed),
            WireMessage::Result(result) => self.on_result(from, result),
            WireMessage::Cancel { round_id, reason } => self.on_cancel(from, round_id, reason),
        }
    }

    /// The reveal deadline elapsed; caller owns the timer
    pub fn handle_deadline_elapsed(&mut self) {
        let Some(round) = self.round.as_ref() else {
            return;
        };
        if round.phase != Phase::Reveal {
            return;
        }
        let round_id = round.id.clone();
        let missing = Self::expected_participants(&self.registry, self.local_id, round)
            .iter()
            .filter(|id| !round.reveals.contains_key(*id))
            .count();
        tracing::warn!(round = %round_id, missing, "reveal deadline elapsed, abandoning round");
        self.transport.broadcast(&WireMessage::Cancel {
            round_id,
            reason: CancelReason::RevealTimeout,
        });
        self.destroy(CancelReason::RevealTimeout);
    }

    fn on_announce(&mut self, from: PeerId, alias: String) {
        let previous = self.registry.name_of(&from);
        if self.registry.set_alias(&from, &alias) && previous != alias {
            tracing::info!(peer = %from.short(), from = %previous, to = %alias, "peer renamed");
        }
    }

    fn on_roll_request(&mut self, from: PeerId, round_id: RoundId, sides: u16) {
        if self.round.is_some() {
            tracing::warn!(
                peer = %self.registry.name_of(&from),
                "roll request ignored: a round is already in progress"
            );
            return;
        }
        let Ok(dice) = Dice::try_from(sides) else {
            tracing::warn!(peer = %self.registry.name_of(&from), sides, "unsupported dice requested");
            return;
        };
        tracing::info!(
            peer = %self.registry.name_of(&from),
            round = %round_id,
            %dice,
            "roll requested, committing"
        );
        self.start_round(round_id, dice, from);
    }

    /// Create the round, write our own commit first, broadcast it
    fn start_round(&mut self, id: RoundId, dice: Dice, initiator: PeerId) {
        let my_secret = crypto::generate_secret();
        let my_commit = crypto::commit_of(&my_secret);

        let frozen = match self.quorum {
            QuorumPolicy::Live => None,
            QuorumPolicy::FixedAtStart => {
                let mut members: BTreeSet<PeerId> = self.registry.ids().copied().collect();
                members.insert(self.local_id);
                Some(members)
            }
        };

        let mut round = Round {
            id: id.clone(),
            dice,
            initiator,
            phase: Phase::Commit,
            commits: BTreeMap::new(),
            reveals: BTreeMap::new(),
            my_secret,
            frozen,
            deadline: None,
        };
        round.commits.insert(self.local_id, my_commit.clone());
        self.round = Some(round);

        tracing::info!(round = %id, commit = %&my_commit[..16], "commit sent");
        self.transport.broadcast(&WireMessage::Commit {
            round_id: id,
            commit: my_commit,
        });
        self.check_all_committed();
    }

    fn on_commit(&mut self, from: PeerId, round_id: RoundId, commit: String) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        if round.id != round_id {
            tracing::trace!(round = %round_id, "commit for a foreign round ignored");
            return;
        }
        if !Self::expected_participants(&self.registry, self.local_id, round).contains(&from) {
            tracing::debug!(peer = %from.short(), "commit from a non-participant ignored");
            return;
        }
        if round.commits.contains_key(&from) {
            tracing::debug!(peer = %from.short(), "duplicate commit ignored");
            return;
        }
        round.commits.insert(from, commit.clone());
        // commit text comes off the wire; avoid slicing non-ASCII input
        tracing::info!(
            peer = %self.registry.name_of(&from),
            commit = %commit.get(..16).unwrap_or(&commit),
            "commit received"
        );
        self.check_all_committed();
    }

    fn on_reveal(&mut self, from: PeerId, round_id: RoundId, seed_hex: String) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        if round.id != round_id {
            tracing::trace!(round = %round_id, "reveal for a foreign round ignored");
            return;
        }
        // Reveals are meaningless before every commitment is fixed
        if round.phase != Phase::Reveal {
            tracing::debug!(peer = %from.short(), "reveal before commit quorum ignored");
            return;
        }
        if round.reveals.contains_key(&from) {
            tracing::debug!(peer = %from.short(), "duplicate reveal ignored");
            return;
        }
        if !Self::expected_participants(&self.registry, self.local_id, round).contains(&from) {
            tracing::debug!(peer = %from.short(), "reveal from a non-participant ignored");
            return;
        }
        let Ok(seed) = hex::decode(&seed_hex) else {
            tracing::debug!(peer = %from.short(), "reveal with undecodable seed ignored");
            return;
        };

        let actual_hash = crypto::commit_of(&seed);
        let expected_commit = round.commits.get(&from).cloned();
        if expected_commit.as_deref() != Some(actual_hash.as_str()) {
            let notice = FraudNotice {
                round_id: round.id.clone(),
                peer: from,
                expected_commit,
                actual_hash,
                seed: seed_hex,
            };
            tracing::error!(
                peer = %self.registry.name_of(&from),
                round = %notice.round_id,
                "reveal does not match commitment, abandoning round"
            );
            self.transport.broadcast(&WireMessage::Cancel {
                round_id: notice.round_id.clone(),
                reason: CancelReason::CommitMismatch,
            });
            self.round = None;
            let _ = self.events.send(RoundEvent::Fraud(notice));
            return;
        }

        round.reveals.insert(from, seed);
        tracing::info!(peer = %self.registry.name_of(&from), "reveal verified");
        self.check_all_revealed();
    }

    fn on_result(&mut self, from: PeerId, result: RollResult) {
        let Some(round) = self.round.as_ref() else {
            tracing::trace!("result with no active round ignored");
            return;
        };
        if round.id != result.round_id {
            tracing::trace!(round = %result.round_id, "result for a foreign round ignored");
            return;
        }
        tracing::info!(
            peer = %self.registry.name_of(&from),
            round = %result.round_id,
            roll = result.roll,
            "final result received"
        );
        self.round = None;
        let _ = self.events.send(RoundEvent::Finalized(result));
    }

    fn on_cancel(&mut self, from: PeerId, round_id: RoundId, reason: CancelReason) {
        let Some(round) = self.round.as_ref() else {
            return;
        };
        if round.id != round_id {
            tracing::trace!(round = %round_id, "cancel for a foreign round ignored");
            return;
        }
        tracing::warn!(
            peer = %self.registry.name_of(&from),
            round = %round_id,
            %reason,
            "round cancelled by peer"
        );
        self.destroy(reason);
    }

    /// Commit quorum: every expected participant has a recorded commit
    fn check_all_committed(&mut self) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        if round.phase != Phase::Commit {
            return;
        }
        let expected = Self::expected_participants(&self.registry, self.local_id, round);
        if expected.iter().any(|id| !round.commits.contains_key(id)) {
            return;
        }

        tracing::info!(participants = expected.len(), round = %round.id, "all commits in, revealing");
        round.phase = Phase::Reveal;
        round.deadline = Some(Instant::now() + self.reveal_timeout);
        round.reveals.insert(self.local_id, round.my_secret.to_vec());
        let reveal = WireMessage::Reveal {
            round_id: round.id.clone(),
            seed: hex::encode(round.my_secret),
        };
        self.transport.broadcast(&reveal);
        self.check_all_revealed();
    }

    /// Reveal quorum: every expected participant has a verified reveal
    fn check_all_revealed(&mut self) {
        let ready = match self.round.as_ref() {
            Some(round) if round.phase == Phase::Reveal => {
                Self::expected_participants(&self.registry, self.local_id, round)
                    .iter()
                    .all(|id| round.reveals.contains_key(id))
            }
            _ => false,
        };
        if !ready {
            return;
        }
        let Some(mut round) = self.round.take() else {
            return;
        };
        round.phase = Phase::Done;

        let result =
            RollResult::from_round(&round, &self.registry, self.local_id, &self.local_alias);
        tracing::info!(
            round = %result.round_id,
            roll = result.roll,
            participants = result.participants.len(),
            "round finalized"
        );
        // Only the initiator retransmits; everyone else just computed the
        // same transcript locally.
        if round.initiator == self.local_id {
            self.transport.broadcast(&WireMessage::Result(result.clone()));
        }
        let _ = self.events.send(RoundEvent::Finalized(result));
    }

    /// Drop the round and emit its single terminal event
    fn destroy(&mut self, reason: CancelReason) {
        if let Some(round) = self.round.take() {
            let _ = self.events.send(RoundEvent::Cancelled {
                round_id: round.id,
                reason,
            });
        }
    }

    /// Union of the local identity and the peers required for quorum,
    /// recomputed on every check unless membership was frozen at start
    fn expected_participants(
        registry: &PeerRegistry,
        local_id: PeerId,
        round: &Round,
    ) -> BTreeSet<PeerId> {
        match &round.frozen {
            Some(members) => members.clone(),
            None => {
                let mut members: BTreeSet<PeerId> = registry.ids().copied().collect();
                members.insert(local_id);
                members
            }
        }
    }
}
