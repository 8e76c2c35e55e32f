//! Final round transcript and independent verification

use crate::crypto;
use crate::message::{Dice, RoundId};
use crate::peer::{PeerId, PeerRegistry};
use crate::round::Round;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable record of a finished round
///
/// This is both the `RESULT` wire payload and the unit handed to display
/// and the journal. It carries everything needed to re-verify the roll
/// from scratch: every commitment, every revealed seed, and the combined
/// entropy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollResult {
    pub round_id: RoundId,
    pub sides: u16,
    pub roll: u32,
    /// Display names, initiator first, then the rest in peer-id order
    pub participants: Vec<String>,
    /// Revealed secrets, hex-encoded
    pub seeds: BTreeMap<PeerId, String>,
    /// Commitments as originally broadcast
    pub commits: BTreeMap<PeerId, String>,
    /// XOR of all seeds, hex-encoded
    pub combined: String,
}

impl RollResult {
    /// Build the transcript for a round whose reveal quorum is complete
    pub(crate) fn from_round(
        round: &Round,
        registry: &PeerRegistry,
        local_id: PeerId,
        local_alias: &str,
    ) -> Self {
        let combined = crypto::combine(round.reveals.values().map(Vec::as_slice));
        let roll = crypto::map_to_range(&combined, round.dice.sides());

        let name = |id: &PeerId| {
            if *id == local_id {
                local_alias.to_string()
            } else {
                registry.name_of(id)
            }
        };
        let mut participants = Vec::with_capacity(round.reveals.len());
        if round.reveals.contains_key(&round.initiator) {
            participants.push(name(&round.initiator));
        }
        participants.extend(
            round
                .reveals
                .keys()
                .filter(|id| **id != round.initiator)
                .map(name),
        );

        Self {
            round_id: round.id.clone(),
            sides: round.dice.sides(),
            roll,
            participants,
            seeds: round
                .reveals
                .iter()
                .map(|(id, seed)| (*id, hex::encode(seed)))
                .collect(),
            commits: round.commits.clone(),
            combined: hex::encode(&combined),
        }
    }

    /// Re-verify the whole transcript from its raw material
    ///
    /// The engine already refused mismatched reveals before finalizing, so
    /// a locally produced transcript always audits clean; recomputing here
    /// makes the check independent of who produced the record, including a
    /// `RESULT` received off the wire.
    pub fn audit(&self) -> TranscriptAudit {
        let mut checks = Vec::with_capacity(self.seeds.len());
        let mut decoded: Vec<Vec<u8>> = Vec::with_capacity(self.seeds.len());

        for (peer, seed_hex) in &self.seeds {
            let commit = self.commits.get(peer).cloned();
            let recomputed = hex::decode(seed_hex).ok().map(|seed| {
                let digest = crypto::commit_of(&seed);
                decoded.push(seed);
                digest
            });
            let valid = match (&commit, &recomputed) {
                (Some(commit), Some(recomputed)) => commit == recomputed,
                _ => false,
            };
            checks.push(SeedCheck {
                peer: *peer,
                commit,
                recomputed,
                valid,
            });
        }

        let combined = crypto::combine(decoded.iter().map(Vec::as_slice));
        let combined_matches = hex::encode(&combined) == self.combined;
        let roll_matches = Dice::try_from(self.sides)
            .map(|dice| crypto::map_to_range(&combined, dice.sides()) == self.roll)
            .unwrap_or(false);

        TranscriptAudit {
            checks,
            combined_matches,
            roll_matches,
        }
    }
}

/// One participant's commitment re-check
#[derive(Debug, Clone)]
pub struct SeedCheck {
    pub peer: PeerId,
    /// The commitment recorded for this peer, if any
    pub commit: Option<String>,
    /// SHA-256 of the revealed seed, absent when the seed is not valid hex
    pub recomputed: Option<String>,
    pub valid: bool,
}

/// Outcome of re-verifying a [`RollResult`]
#[derive(Debug, Clone)]
pub struct TranscriptAudit {
    pub checks: Vec<SeedCheck>,
    pub combined_matches: bool,
    pub roll_matches: bool,
}

impl TranscriptAudit {
    /// Every seed verified and the arithmetic checks out
    pub fn clean(&self) -> bool {
        self.combined_matches && self.roll_matches && self.checks.iter().all(|c| c.valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript() -> RollResult {
        let a = PeerId::from_bytes([1; 32]);
        let b = PeerId::from_bytes([2; 32]);
        let seed_a = vec![0x01, 0x00, 0x00, 0x00];
        let seed_b = vec![0x00, 0x00, 0x00, 0x02];
        RollResult {
            round_id: RoundId("cafe0001".into()),
            sides: 6,
            roll: 1,
            participants: vec!["alice".into(), "bob".into()],
            seeds: [(a, hex::encode(&seed_a)), (b, hex::encode(&seed_b))].into(),
            commits: [(a, crypto::commit_of(&seed_a)), (b, crypto::commit_of(&seed_b))].into(),
            combined: "01000002".into(),
        }
    }

    #[test]
    fn test_audit_clean_transcript() {
        let audit = transcript().audit();
        assert!(audit.clean());
        assert_eq!(audit.checks.len(), 2);
    }

    #[test]
    fn test_audit_flags_substituted_seed() {
        let mut result = transcript();
        let b = PeerId::from_bytes([2; 32]);
        result.seeds.insert(b, hex::encode([0xde, 0xad]));

        let audit = result.audit();
        assert!(!audit.clean());
        let check = audit.checks.iter().find(|c| c.peer == b).unwrap();
        assert!(!check.valid);
        // the forged seed also breaks the arithmetic
        assert!(!audit.combined_matches);
    }

    #[test]
    fn test_audit_tolerates_garbage_from_the_wire() {
        let mut result = transcript();
        result.sides = 0; // would divide by zero if trusted
        result.combined = "zz".into();
        let audit = result.audit();
        assert!(!audit.roll_matches);
        assert!(!audit.combined_matches);
    }
}
