//! Append-only JSONL journal of finished rounds and fraud evidence
//!
//! One JSON entry per line. Fraud entries are the durable audit trail for
//! provable misbehavior; roll entries are for the `/log` command. Journal
//! writes must never take the node down, so callers log failures and move
//! on.

use anyhow::{Context, Result};
use dice_protocol::{FraudNotice, RollResult, RoundId};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    Roll {
        ts: String,
        round_id: RoundId,
        sides: u16,
        roll: u32,
        participants: Vec<String>,
        combined: String,
    },
    Fraud {
        ts: String,
        round_id: RoundId,
        peer: String,
        expected_commit: Option<String>,
        actual_hash: String,
        seed: String,
    },
}

impl JournalEntry {
    pub fn roll(result: &RollResult) -> Self {
        JournalEntry::Roll {
            ts: now(),
            round_id: result.round_id.clone(),
            sides: result.sides,
            roll: result.roll,
            participants: result.participants.clone(),
            combined: result.combined.clone(),
        }
    }

    pub fn fraud(notice: &FraudNotice) -> Self {
        JournalEntry::Fraud {
            ts: now(),
            round_id: notice.round_id.clone(),
            peer: notice.peer.to_string(),
            expected_commit: notice.expected_commit.clone(),
            actual_hash: notice.actual_hash.clone(),
            seed: notice.seed.clone(),
        }
    }

    /// One-line rendering for the `/log` listing
    pub fn describe(&self) -> String {
        match self {
            JournalEntry::Roll {
                ts,
                round_id,
                sides,
                roll,
                participants,
                combined,
            } => format!(
                "[{ts}] ROLL d{sides} -> {roll} | {} | combined {} | round {round_id}",
                participants.join(", "),
                abbrev(combined),
            ),
            JournalEntry::Fraud {
                ts,
                round_id,
                peer,
                expected_commit,
                actual_hash,
                ..
            } => format!(
                "[{ts}] FRAUD peer {} | committed {} | revealed hash {} | round {round_id}",
                abbrev(peer),
                expected_commit.as_deref().map(abbrev).unwrap_or_else(|| "<none>".into()),
                abbrev(actual_hash),
            ),
        }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn abbrev(s: &str) -> String {
    // entries may quote wire-supplied strings; stay on char boundaries
    if s.chars().count() > 16 {
        let prefix: String = s.chars().take(16).collect();
        format!("{prefix}\u{2026}")
    } else {
        s.to_string()
    }
}

/// File-backed journal
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, creating the file on first use
    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening journal {}", self.path.display()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// The last `n` decodable entries; missing file means no history
    pub fn tail(&self, n: usize) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("reading journal {}", self.path.display()))?;
        let entries: Vec<JournalEntry> = BufReader::new(file)
            .lines()
            .map_while(|line| line.ok())
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect();
        let skip = entries.len().saturating_sub(n);
        Ok(entries.into_iter().skip(skip).collect())
    }
}
