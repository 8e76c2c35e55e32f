//! Session win counts
//!
//! A natural-max roll scores one point for the round's initiator (the
//! first listed participant). Purely cosmetic, never persisted.

use dice_protocol::RollResult;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Scoreboard {
    wins: HashMap<String, u32>,
}

impl Scoreboard {
    /// Record a finalized round; returns whether a point was scored
    pub fn record(&mut self, result: &RollResult) -> bool {
        if result.roll != u32::from(result.sides) {
            return false;
        }
        let Some(initiator) = result.participants.first() else {
            return false;
        };
        *self.wins.entry(initiator.clone()).or_default() += 1;
        true
    }

    /// Standings, highest score first
    pub fn standings(&self) -> Vec<(String, u32)> {
        let mut standings: Vec<(String, u32)> = self
            .wins
            .iter()
            .map(|(alias, wins)| (alias.clone(), *wins))
            .collect();
        standings.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        standings
    }

    pub fn is_empty(&self) -> bool {
        self.wins.is_empty()
    }
}
