//! Terminal rendering for the interactive console
//!
//! Status flow (peer churn, round progress) goes through tracing; this
//! module renders the things a player actually asked to see.

use crate::journal::JournalEntry;
use crate::scoreboard::Scoreboard;
use colored::Colorize;
use dice_protocol::{CancelReason, FraudNotice, PeerId, PeerRegistry, RollResult, RoundId};
use std::io::Write;

pub fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

pub fn banner(alias: &str) {
    println!();
    println!(
        "  {} {}",
        "dicenet".yellow().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!(
        "  {}",
        "provably-fair P2P dice rolling, commit-reveal".cyan()
    );
    println!("  {} {}", "alias:".dimmed(), alias);
    println!();
}

pub fn help() {
    println!();
    println!("{}", "commands".bold());
    println!("  {}  start a commit-reveal round with every connected peer", "/roll <d4|d6|d8|d10|d12|d20|d100>".yellow());
    println!("  {}                             list connected peers", "/peers".yellow());
    println!("  {}                       session standings", "/leaderboard".yellow());
    println!("  {}                               last 10 journal entries", "/log".yellow());
    println!("  {}      check SHA256(seed) == commit", "/verify <seedHex> <commitHex>".yellow());
    println!("  {}                      change display name", "/alias <name>".yellow());
    println!("  {}                               leave the swarm", "/exit".yellow());
    println!();
}

pub fn info(message: &str) {
    println!("{} {}", "*".cyan(), message);
}

pub fn notice(message: &str) {
    println!("{} {}", "!".yellow(), message.yellow());
}

pub fn error(message: &str) {
    println!("{} {}", "x".red(), message.red());
}

/// Render a finalized round with its re-verified transcript
pub fn result(result: &RollResult, name: impl Fn(&PeerId) -> String) {
    let audit = result.audit();

    println!();
    println!("{}", "╔══════════════════════════════════════════╗".yellow().bold());
    println!("{}", "║               ROLL RESULT                ║".yellow().bold());
    println!("{}", "╚══════════════════════════════════════════╝".yellow().bold());
    println!("  Dice     : {}", format!("d{}", result.sides).cyan().bold());
    println!(
        "  Roll     : {}  {}",
        result.roll.to_string().bold(),
        face(result.roll, result.sides).cyan()
    );
    println!("  Players  : {}", result.participants.join(", ").dimmed());
    println!("  Combined : {}", abbrev(&result.combined, 32).dimmed());
    println!("  {}", "Verification:".dimmed());
    for check in &audit.checks {
        let seed = result
            .seeds
            .get(&check.peer)
            .map(|s| abbrev(s, 12))
            .unwrap_or_default();
        let status = if check.valid {
            "✓ VALID".green().to_string()
        } else {
            "✗ INVALID".red().to_string()
        };
        println!("    {:<18} seed={} {}", name(&check.peer), seed, status);
    }
    if !audit.combined_matches || !audit.roll_matches {
        println!("  {}", "transcript arithmetic does not check out".red().bold());
    }
    println!();
}

/// d6 gets its face glyph, everything else a plain number block
fn face(roll: u32, sides: u16) -> String {
    if sides != 6 {
        return format!("[ {roll} ]");
    }
    let faces = ['\u{2680}', '\u{2681}', '\u{2682}', '\u{2683}', '\u{2684}', '\u{2685}'];
    faces
        .get(roll.saturating_sub(1) as usize)
        .map(|f| f.to_string())
        .unwrap_or_else(|| format!("[ {roll} ]"))
}

pub fn cancelled(round_id: &RoundId, reason: CancelReason) {
    println!(
        "{} round {} cancelled: {}",
        "x".red(),
        round_id.to_string().dimmed(),
        reason.to_string().red()
    );
}

pub fn fraud(notice: &FraudNotice, name: impl Fn(&PeerId) -> String) {
    println!();
    println!(
        "{} {} {}",
        "FRAUD:".red().bold(),
        name(&notice.peer).bold(),
        "revealed a seed that does not match their commitment".red()
    );
    println!(
        "  committed {}  revealed hash {}",
        notice
            .expected_commit
            .as_deref()
            .map(|c| abbrev(c, 16))
            .unwrap_or_else(|| "<none>".into())
            .dimmed(),
        abbrev(&notice.actual_hash, 16).dimmed()
    );
    println!("  {}", "round abandoned, evidence journaled".red());
    println!();
}

pub fn peers(registry: &PeerRegistry) {
    if registry.is_empty() {
        notice("no peers connected yet");
        return;
    }
    println!("{}", "connected peers".bold());
    for (id, alias) in registry.iter() {
        println!("  {}  alias={}", id.short().cyan(), alias);
    }
}

pub fn leaderboard(board: &Scoreboard) {
    if board.is_empty() {
        notice("no points scored this session");
        return;
    }
    println!("{}", "session leaderboard".bold().yellow());
    for (rank, (alias, wins)) in board.standings().iter().enumerate() {
        println!("  #{:<2} {:<20} {} pts", rank + 1, alias, wins);
    }
}

pub fn log_entries(entries: &[JournalEntry]) {
    if entries.is_empty() {
        notice("journal is empty");
        return;
    }
    println!("{}", "recent journal entries".bold());
    for entry in entries {
        println!("  {}", entry.describe().dimmed());
    }
}

pub fn verify_outcome(valid: bool, recomputed: &str, expected: &str) {
    if valid {
        println!("{} SHA256(seed) matches the commit", "✓ VALID —".green().bold());
    } else {
        println!(
            "{} SHA256(seed)={} != {}",
            "✗ INVALID —".red().bold(),
            abbrev(recomputed, 16),
            abbrev(expected, 16)
        );
    }
}

fn abbrev(s: &str, n: usize) -> String {
    // transcripts may quote wire-supplied strings; stay on char boundaries
    if s.chars().count() > n {
        let prefix: String = s.chars().take(n).collect();
        format!("{prefix}\u{2026}")
    } else {
        s.to_string()
    }
}
