//! Round state machine tests
//!
//! Drives the engine exactly the way the node's event loop does: one call
//! at a time, with a recording transport in place of the socket layer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::crypto;
use crate::message::{CancelReason, RoundId, WireMessage};
use crate::peer::PeerId;
use crate::round::{Phase, QuorumPolicy, RoundEngine, RoundEvent, Transport};

/// Captures everything the engine asks the transport to send
#[derive(Clone, Default)]
struct RecordingTransport {
    sent: Arc<Mutex<Vec<WireMessage>>>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<WireMessage> {
        self.sent.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Transport for RecordingTransport {
    fn broadcast(&self, message: &WireMessage) {
        self.sent.lock().unwrap().push(message.clone());
    }

    fn send_to(&self, _peer: &PeerId, message: &WireMessage) {
        self.sent.lock().unwrap().push(message.clone());
    }
}

struct Harness {
    engine: RoundEngine<RecordingTransport>,
    transport: RecordingTransport,
    events: UnboundedReceiver<RoundEvent>,
}

const LOCAL: [u8; 32] = [0xa1; 32];
const BOB: [u8; 32] = [0xb0; 32];
const CAROL: [u8; 32] = [0xc0; 32];

fn local() -> PeerId {
    PeerId::from_bytes(LOCAL)
}

fn bob() -> PeerId {
    PeerId::from_bytes(BOB)
}

fn carol() -> PeerId {
    PeerId::from_bytes(CAROL)
}

fn harness(quorum: QuorumPolicy) -> Harness {
    let transport = RecordingTransport::default();
    let (engine, events) = RoundEngine::new(
        local(),
        "alice",
        quorum,
        Duration::from_secs(30),
        transport.clone(),
    );
    Harness {
        engine,
        transport,
        events,
    }
}

/// The engine's own broadcast commit for the active round
fn local_commit(transport: &RecordingTransport) -> String {
    transport
        .sent()
        .iter()
        .find_map(|m| match m {
            WireMessage::Commit { commit, .. } => Some(commit.clone()),
            _ => None,
        })
        .expect("engine should have broadcast its commit")
}

/// The engine's own broadcast reveal for the active round
fn local_seed(transport: &RecordingTransport) -> Vec<u8> {
    transport
        .sent()
        .iter()
        .find_map(|m| match m {
            WireMessage::Reveal { seed, .. } => Some(hex::decode(seed).unwrap()),
            _ => None,
        })
        .expect("engine should have broadcast its reveal")
}

fn expect_finalized(events: &mut UnboundedReceiver<RoundEvent>) -> crate::RollResult {
    match events.try_recv() {
        Ok(RoundEvent::Finalized(result)) => result,
        other => panic!("expected Finalized, got {other:?}"),
    }
}

#[test]
fn test_two_party_round_initiated_locally() {
    let mut h = harness(QuorumPolicy::Live);
    h.engine.peer_connected(bob(), Some("bob".into()));

    let round_id = h.engine.request_roll(6).unwrap();
    // request + our commit went out, round is in commit phase
    let sent = h.transport.sent();
    assert!(matches!(sent[0], WireMessage::RollRequest { sides: 6, .. }));
    assert!(matches!(sent[1], WireMessage::Commit { .. }));
    assert_eq!(h.engine.current_round().unwrap().phase(), Phase::Commit);

    // bob commits: quorum met, engine reveals and arms the deadline
    let bob_seed = [0x42u8; 7];
    h.engine.handle_message(
        bob(),
        WireMessage::Commit {
            round_id: round_id.clone(),
            commit: crypto::commit_of(&bob_seed),
        },
    );
    assert_eq!(h.engine.current_round().unwrap().phase(), Phase::Reveal);
    assert!(h.engine.reveal_deadline().is_some());
    let my_seed = local_seed(&h.transport);
    assert_eq!(local_commit(&h.transport), crypto::commit_of(&my_seed));

    // bob reveals: round finalizes, initiator broadcasts the result
    h.engine.handle_message(
        bob(),
        WireMessage::Reveal {
            round_id: round_id.clone(),
            seed: hex::encode(bob_seed),
        },
    );
    assert!(h.engine.current_round().is_none());
    assert!(h.engine.reveal_deadline().is_none());

    let result = expect_finalized(&mut h.events);
    assert_eq!(result.round_id, round_id);
    assert_eq!(result.sides, 6);
    let combined = crypto::combine([my_seed.as_slice(), bob_seed.as_slice()]);
    assert_eq!(result.roll, crypto::map_to_range(&combined, 6));
    assert_eq!(result.participants[0], "alice");
    assert!(result.audit().clean());

    let sent = h.transport.sent();
    assert!(
        matches!(sent.last(), Some(WireMessage::Result(r)) if r.round_id == round_id),
        "initiator must retransmit the final result"
    );
}

#[test]
fn test_remote_initiator_does_not_rebroadcast_result() {
    let mut h = harness(QuorumPolicy::Live);
    h.engine.peer_connected(bob(), Some("bob".into()));

    let round_id = RoundId("feed0001".into());
    h.engine.handle_message(
        bob(),
        WireMessage::RollRequest {
            round_id: round_id.clone(),
            sides: 20,
        },
    );
    assert_eq!(h.engine.current_round().unwrap().phase(), Phase::Commit);

    let bob_seed = [9u8; 32];
    h.engine.handle_message(
        bob(),
        WireMessage::Commit {
            round_id: round_id.clone(),
            commit: crypto::commit_of(&bob_seed),
        },
    );
    h.engine.handle_message(
        bob(),
        WireMessage::Reveal {
            round_id: round_id.clone(),
            seed: hex::encode(bob_seed),
        },
    );

    let result = expect_finalized(&mut h.events);
    assert_eq!(result.participants[0], "bob");
    assert!(
        !h.transport
            .sent()
            .iter()
            .any(|m| matches!(m, WireMessage::Result(_))),
        "only the initiator broadcasts the result"
    );
}

#[test]
fn test_late_joiner_extends_live_quorum() {
    let mut h = harness(QuorumPolicy::Live);
    h.engine.peer_connected(bob(), Some("bob".into()));
    let round_id = h.engine.request_roll(6).unwrap();

    // carol joins before bob's commit lands: she is now required too
    h.engine.peer_connected(carol(), Some("carol".into()));

    let bob_seed = [1u8; 32];
    h.engine.handle_message(
        bob(),
        WireMessage::Commit {
            round_id: round_id.clone(),
            commit: crypto::commit_of(&bob_seed),
        },
    );
    assert_eq!(
        h.engine.current_round().unwrap().phase(),
        Phase::Commit,
        "quorum must wait for the late joiner"
    );

    let carol_seed = [2u8; 32];
    h.engine.handle_message(
        carol(),
        WireMessage::Commit {
            round_id: round_id.clone(),
            commit: crypto::commit_of(&carol_seed),
        },
    );
    assert_eq!(h.engine.current_round().unwrap().phase(), Phase::Reveal);
}

#[test]
fn test_fixed_quorum_ignores_late_joiner() {
    let mut h = harness(QuorumPolicy::FixedAtStart);
    h.engine.peer_connected(bob(), Some("bob".into()));
    let round_id = h.engine.request_roll(6).unwrap();

    h.engine.peer_connected(carol(), Some("carol".into()));
    let carol_seed = [3u8; 32];
    // carol is not part of the frozen set; her commit is dropped
    h.engine.handle_message(
        carol(),
        WireMessage::Commit {
            round_id: round_id.clone(),
            commit: crypto::commit_of(&carol_seed),
        },
    );
    assert_eq!(h.engine.current_round().unwrap().phase(), Phase::Commit);

    let bob_seed = [4u8; 32];
    h.engine.handle_message(
        bob(),
        WireMessage::Commit {
            round_id: round_id.clone(),
            commit: crypto::commit_of(&bob_seed),
        },
    );
    assert_eq!(h.engine.current_round().unwrap().phase(), Phase::Reveal);

    // carol leaving must not kill a round she was never part of
    h.engine.peer_disconnected(carol());
    assert!(h.engine.current_round().is_some());
}

#[test]
fn test_mismatched_reveal_is_fraud() {
    let mut h = harness(QuorumPolicy::Live);
    h.engine.peer_connected(bob(), Some("bob".into()));
    let round_id = h.engine.request_roll(6).unwrap();

    let bob_seed = [5u8; 32];
    h.engine.handle_message(
        bob(),
        WireMessage::Commit {
            round_id: round_id.clone(),
            commit: crypto::commit_of(&bob_seed),
        },
    );
    h.transport.clear();

    // bob reveals something other than what he committed to
    h.engine.handle_message(
        bob(),
        WireMessage::Reveal {
            round_id: round_id.clone(),
            seed: hex::encode([6u8; 32]),
        },
    );

    assert!(h.engine.current_round().is_none());
    match h.events.try_recv() {
        Ok(RoundEvent::Fraud(notice)) => {
            assert_eq!(notice.peer, bob());
            assert_eq!(notice.expected_commit.as_deref(), Some(crypto::commit_of(&bob_seed).as_str()));
            assert_eq!(notice.actual_hash, crypto::commit_of(&[6u8; 32]));
        }
        other => panic!("expected Fraud, got {other:?}"),
    }
    // fraud is the single terminal event for this round
    assert!(matches!(h.events.try_recv(), Err(TryRecvError::Empty)));
    assert!(h.transport.sent().iter().any(|m| matches!(
        m,
        WireMessage::Cancel {
            reason: CancelReason::CommitMismatch,
            ..
        }
    )));
    assert!(
        !h.transport
            .sent()
            .iter()
            .any(|m| matches!(m, WireMessage::Result(_))),
        "a mismatched reveal must never reach a result"
    );
}

#[test]
fn test_duplicate_commit_and_reveal_are_noops() {
    let mut h = harness(QuorumPolicy::Live);
    h.engine.peer_connected(bob(), Some("bob".into()));
    h.engine.peer_connected(carol(), Some("carol".into()));
    let round_id = h.engine.request_roll(6).unwrap();

    let bob_seed = [7u8; 32];
    let bob_commit = crypto::commit_of(&bob_seed);
    h.engine.handle_message(
        bob(),
        WireMessage::Commit {
            round_id: round_id.clone(),
            commit: bob_commit.clone(),
        },
    );
    // a retransmitted commit with different content must not overwrite
    h.engine.handle_message(
        bob(),
        WireMessage::Commit {
            round_id: round_id.clone(),
            commit: "f".repeat(64),
        },
    );
    let round = h.engine.current_round().unwrap();
    assert_eq!(round.phase(), Phase::Commit);

    let carol_seed = [8u8; 32];
    h.engine.handle_message(
        carol(),
        WireMessage::Commit {
            round_id: round_id.clone(),
            commit: crypto::commit_of(&carol_seed),
        },
    );
    assert_eq!(h.engine.current_round().unwrap().phase(), Phase::Reveal);

    // bob's original commitment still gates his reveal
    h.engine.handle_message(
        bob(),
        WireMessage::Reveal {
            round_id: round_id.clone(),
            seed: hex::encode(bob_seed),
        },
    );
    // duplicate reveal is dropped without touching the stored seed
    h.engine.handle_message(
        bob(),
        WireMessage::Reveal {
            round_id: round_id.clone(),
            seed: hex::encode([0xffu8; 32]),
        },
    );
    assert!(h.engine.current_round().is_some());

    h.engine.handle_message(
        carol(),
        WireMessage::Reveal {
            round_id,
            seed: hex::encode(carol_seed),
        },
    );
    let result = expect_finalized(&mut h.events);
    assert!(result.audit().clean());
    assert_eq!(result.participants.len(), 3);
}

#[test]
fn test_foreign_round_id_is_ignored() {
    let mut h = harness(QuorumPolicy::Live);
    h.engine.peer_connected(bob(), Some("bob".into()));
    h.engine.request_roll(6).unwrap();

    h.engine.handle_message(
        bob(),
        WireMessage::Commit {
            round_id: RoundId("deadbeef".into()),
            commit: "aa".repeat(32),
        },
    );
    h.engine.handle_message(
        bob(),
        WireMessage::Cancel {
            round_id: RoundId("deadbeef".into()),
            reason: CancelReason::RevealTimeout,
        },
    );

    let round = h.engine.current_round().unwrap();
    assert_eq!(round.phase(), Phase::Commit);
    assert!(matches!(h.events.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn test_roll_request_while_round_active_is_rejected() {
    let mut h = harness(QuorumPolicy::Live);
    h.engine.peer_connected(bob(), Some("bob".into()));
    let round_id = h.engine.request_roll(6).unwrap();

    // local re-request
    assert_eq!(
        h.engine.request_roll(20).unwrap_err(),
        crate::ProtocolError::RoundActive
    );
    // remote request for a new round
    h.engine.handle_message(
        bob(),
        WireMessage::RollRequest {
            round_id: RoundId("0badc0de".into()),
            sides: 20,
        },
    );

    let round = h.engine.current_round().unwrap();
    assert_eq!(round.id(), &round_id);
    assert_eq!(round.dice().sides(), 6);
}

#[test]
fn test_unsupported_sides_rejected() {
    let mut h = harness(QuorumPolicy::Live);
    h.engine.peer_connected(bob(), Some("bob".into()));

    assert_eq!(
        h.engine.request_roll(7).unwrap_err(),
        crate::ProtocolError::UnsupportedDice(7)
    );
    h.engine.handle_message(
        bob(),
        WireMessage::RollRequest {
            round_id: RoundId("0badc0de".into()),
            sides: 3,
        },
    );
    assert!(h.engine.current_round().is_none());
}

#[test]
fn test_roll_without_peers_rejected() {
    let mut h = harness(QuorumPolicy::Live);
    assert_eq!(
        h.engine.request_roll(6).unwrap_err(),
        crate::ProtocolError::NoPeers
    );
}

#[test]
fn test_reveal_during_commit_phase_is_ignored() {
    let mut h = harness(QuorumPolicy::Live);
    h.engine.peer_connected(bob(), Some("bob".into()));
    h.engine.peer_connected(carol(), Some("carol".into()));
    let round_id = h.engine.request_roll(6).unwrap();

    let bob_seed = [1u8; 32];
    h.engine.handle_message(
        bob(),
        WireMessage::Commit {
            round_id: round_id.clone(),
            commit: crypto::commit_of(&bob_seed),
        },
    );
    // carol has not committed yet, so the phase is still Commit and an
    // early reveal from bob is dropped rather than treated as fraud
    h.engine.handle_message(
        bob(),
        WireMessage::Reveal {
            round_id,
            seed: hex::encode(bob_seed),
        },
    );
    let round = h.engine.current_round().unwrap();
    assert_eq!(round.phase(), Phase::Commit);
    assert!(matches!(h.events.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn test_reveal_timeout_cancels_round() {
    let mut h = harness(QuorumPolicy::Live);
    h.engine.peer_connected(bob(), Some("bob".into()));
    let round_id = h.engine.request_roll(6).unwrap();

    h.engine.handle_message(
        bob(),
        WireMessage::Commit {
            round_id: round_id.clone(),
            commit: crypto::commit_of(&[2u8; 32]),
        },
    );
    assert_eq!(h.engine.current_round().unwrap().phase(), Phase::Reveal);

    h.engine.handle_deadline_elapsed();
    assert!(h.engine.current_round().is_none());
    assert!(matches!(
        h.events.try_recv(),
        Ok(RoundEvent::Cancelled {
            reason: CancelReason::RevealTimeout,
            ..
        })
    ));
    assert!(h.transport.sent().iter().any(|m| matches!(
        m,
        WireMessage::Cancel {
            reason: CancelReason::RevealTimeout,
            ..
        }
    )));
}

#[test]
fn test_deadline_is_inert_outside_reveal_phase() {
    let mut h = harness(QuorumPolicy::Live);
    h.engine.peer_connected(bob(), Some("bob".into()));
    h.engine.request_roll(6).unwrap();

    h.engine.handle_deadline_elapsed();
    assert!(h.engine.current_round().is_some());
    assert!(matches!(h.events.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn test_participant_disconnect_kills_round_locally() {
    let mut h = harness(QuorumPolicy::Live);
    h.engine.peer_connected(bob(), Some("bob".into()));
    let round_id = h.engine.request_roll(6).unwrap();
    h.transport.clear();

    h.engine.peer_disconnected(bob());
    assert!(h.engine.current_round().is_none());
    assert!(matches!(
        h.events.try_recv(),
        Ok(RoundEvent::Cancelled {
            reason: CancelReason::PeerDisconnected,
            round_id: id,
        }) if id == round_id
    ));
    // the disconnect is observed by every peer independently
    assert!(h.transport.sent().is_empty(), "no cancel broadcast on disconnect");
}

#[test]
fn test_peer_cancel_destroys_round() {
    let mut h = harness(QuorumPolicy::Live);
    h.engine.peer_connected(bob(), Some("bob".into()));
    let round_id = h.engine.request_roll(6).unwrap();

    h.engine.handle_message(
        bob(),
        WireMessage::Cancel {
            round_id: round_id.clone(),
            reason: CancelReason::RevealTimeout,
        },
    );
    assert!(h.engine.current_round().is_none());
    assert!(matches!(
        h.events.try_recv(),
        Ok(RoundEvent::Cancelled {
            reason: CancelReason::RevealTimeout,
            round_id: id,
        }) if id == round_id
    ));
}

#[test]
fn test_result_from_initiator_finalizes_follower() {
    let mut h = harness(QuorumPolicy::Live);
    h.engine.peer_connected(bob(), Some("bob".into()));

    let round_id = RoundId("cafe0002".into());
    h.engine.handle_message(
        bob(),
        WireMessage::RollRequest {
            round_id: round_id.clone(),
            sides: 6,
        },
    );

    // bob finished locally and sends his transcript before our quorum
    let seed_a = [0x01, 0x00, 0x00, 0x00];
    let seed_b = [0x00, 0x00, 0x00, 0x02];
    let result = crate::RollResult {
        round_id: round_id.clone(),
        sides: 6,
        roll: 1,
        participants: vec!["bob".into(), "alice".into()],
        seeds: [
            (bob(), hex::encode(seed_a)),
            (local(), hex::encode(seed_b)),
        ]
        .into(),
        commits: [
            (bob(), crypto::commit_of(&seed_a)),
            (local(), crypto::commit_of(&seed_b)),
        ]
        .into(),
        combined: "01000002".into(),
    };
    h.engine
        .handle_message(bob(), WireMessage::Result(result));

    assert!(h.engine.current_round().is_none());
    let finalized = expect_finalized(&mut h.events);
    assert_eq!(finalized.roll, 1);
    assert!(finalized.audit().clean());
}

#[test]
fn test_announce_updates_alias() {
    let mut h = harness(QuorumPolicy::Live);
    h.engine.peer_connected(bob(), None);
    h.engine.handle_message(
        bob(),
        WireMessage::Announce {
            peer: bob(),
            alias: "bobby".into(),
            version: "0.1.0".into(),
            sig: String::new(),
        },
    );
    assert_eq!(h.engine.registry().alias_of(&bob()), Some("bobby"));
}
