//! dicenet - provably-fair P2P dice rolling
//!
//! Interactive node binary: joins a TCP mesh, drives commit-reveal dice
//! rounds, journals results and fraud evidence, and renders everything in
//! the console. Wire messages, console commands, and the reveal deadline
//! all funnel through one select loop, so round state is only ever touched
//! from a single place.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use dice_p2p::{Swarm, SwarmConfig, SwarmEvent, SwarmHandle};
use dice_protocol::{crypto, PeerId, QuorumPolicy, RoundEngine, RoundEvent};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod display;
mod journal;
mod scoreboard;

use commands::{Command, Parsed};
use journal::{Journal, JournalEntry};
use scoreboard::Scoreboard;

/// Participant-set policy while a round is running
#[derive(Debug, Clone, Copy, ValueEnum)]
enum QuorumMode {
    /// Recompute from connected peers on every quorum check
    Live,
    /// Freeze membership when the round starts
    Fixed,
}

/// Provably-fair P2P dice roller
#[derive(Parser, Debug)]
#[command(name = "dicenet")]
#[command(about = "Provably-fair P2P dice rolling over commit-reveal", long_about = None)]
struct Args {
    /// Address to listen on for peers
    #[arg(long, default_value = "0.0.0.0:9440")]
    listen: std::net::SocketAddr,

    /// Peer address to dial (repeatable)
    #[arg(long = "peer")]
    peers: Vec<String>,

    /// Display alias (default: player-<hex>)
    #[arg(long)]
    alias: Option<String>,

    /// Append-only result/fraud journal
    #[arg(long, default_value = "dice-log.jsonl")]
    log_file: PathBuf,

    /// Participant-set policy during a round
    #[arg(long, value_enum, default_value = "live")]
    quorum: QuorumMode,

    /// Seconds to wait for reveals before abandoning a round
    #[arg(long, default_value_t = dice_protocol::REVEAL_TIMEOUT.as_secs())]
    timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let alias = args
        .alias
        .clone()
        .unwrap_or_else(|| format!("player-{:04x}", rand::random::<u16>()));
    display::banner(&alias);

    let (swarm, mut swarm_events) = Swarm::start(SwarmConfig {
        listen: args.listen,
        peers: args.peers.clone(),
        alias: alias.clone(),
    })
    .await?;
    let handle = swarm.handle();
    tracing::info!(
        peer = %swarm.peer_id().short(),
        journal = %args.log_file.display(),
        "node ready, type /help to begin"
    );

    let quorum = match args.quorum {
        QuorumMode::Live => QuorumPolicy::Live,
        QuorumMode::Fixed => QuorumPolicy::FixedAtStart,
    };
    let (mut engine, mut round_events) = RoundEngine::new(
        swarm.peer_id(),
        &alias,
        quorum,
        Duration::from_secs(args.timeout_secs),
        handle.clone(),
    );

    let journal = Journal::new(args.log_file);
    let mut scoreboard = Scoreboard::default();
    let mut console = BufReader::new(tokio::io::stdin()).lines();
    display::prompt();

    loop {
        let deadline = engine.reveal_deadline();
        tokio::select! {
            line = console.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_line(&line, &mut engine, &handle, &journal, &scoreboard) {
                            break;
                        }
                        display::prompt();
                    }
                    None => break,
                }
            }
            Some(event) = swarm_events.recv() => match event {
                SwarmEvent::Connected { peer, alias } => engine.peer_connected(peer, Some(alias)),
                SwarmEvent::Disconnected { peer } => engine.peer_disconnected(peer),
                SwarmEvent::Message { peer, message } => engine.handle_message(peer, message),
            },
            Some(event) = round_events.recv() => {
                handle_round_event(event, &engine, &journal, &mut scoreboard);
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                engine.handle_deadline_elapsed();
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    tracing::info!("leaving the swarm");
    Ok(())
}

/// Placeholder instant for the disabled deadline branch
fn far_future() -> tokio::time::Instant {
    tokio::time::Instant::now() + Duration::from_secs(24 * 60 * 60)
}

/// Execute one console line; returns false when the node should exit
fn handle_line(
    line: &str,
    engine: &mut RoundEngine<SwarmHandle>,
    handle: &SwarmHandle,
    journal: &Journal,
    scoreboard: &Scoreboard,
) -> bool {
    let command = match commands::parse(line) {
        Parsed::None => return true,
        Parsed::Error(message) => {
            display::notice(&message);
            return true;
        }
        Parsed::Command(command) => command,
    };

    match command {
        Command::Roll(sides) => match engine.request_roll(sides) {
            Ok(round_id) => {
                display::info(&format!("round {round_id} started, waiting for commits"))
            }
            Err(err) => display::notice(&err.to_string()),
        },
        Command::Peers => display::peers(engine.registry()),
        Command::Leaderboard => display::leaderboard(scoreboard),
        Command::Log => match journal.tail(10) {
            Ok(entries) => display::log_entries(&entries),
            Err(err) => display::error(&format!("could not read journal: {err}")),
        },
        Command::Verify { seed, commit } => match hex::decode(&seed) {
            Ok(bytes) => {
                let recomputed = crypto::commit_of(&bytes);
                display::verify_outcome(recomputed == commit, &recomputed, &commit);
            }
            Err(_) => display::error("seed is not valid hex"),
        },
        Command::Alias(name) => {
            let alias = engine.set_local_alias(&name).to_string();
            handle.announce(&alias);
            display::info(&format!("alias set to \"{alias}\""));
        }
        Command::Help => display::help(),
        Command::Exit => return false,
    }
    true
}

/// React to a round's single terminal event
fn handle_round_event(
    event: RoundEvent,
    engine: &RoundEngine<SwarmHandle>,
    journal: &Journal,
    scoreboard: &mut Scoreboard,
) {
    match event {
        RoundEvent::Finalized(result) => {
            if let Err(err) = journal.append(&JournalEntry::roll(&result)) {
                tracing::warn!(%err, "journal write failed");
            }
            if scoreboard.record(&result) {
                tracing::info!(winner = %result.participants[0], "natural max, session point scored");
            }
            display::result(&result, namer(engine));
        }
        RoundEvent::Cancelled { round_id, reason } => display::cancelled(&round_id, reason),
        RoundEvent::Fraud(notice) => {
            if let Err(err) = journal.append(&JournalEntry::fraud(&notice)) {
                tracing::warn!(%err, "journal write failed");
            }
            display::fraud(&notice, namer(engine));
        }
    }
    display::prompt();
}

/// Display names: our alias for ourselves, registry names for peers
fn namer(engine: &RoundEngine<SwarmHandle>) -> impl Fn(&PeerId) -> String + '_ {
    let local = engine.local_id();
    move |id: &PeerId| {
        if *id == local {
            engine.local_alias().to_string()
        } else {
            engine.registry().name_of(id)
        }
    }
}
