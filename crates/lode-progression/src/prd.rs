//! Pseudo-random-distribution (PRD) accumulator state.
//!
//! Bonus procs use PRD smoothing instead of flat rolls: the effective
//! chance grows with each consecutive failure and resets on success, so
//! long droughts and streaks are both rare. All randomness flows through
//! the simulation [`GameRng`], keeping procs replay-deterministic.

use serde::{Deserialize, Serialize};

use lode_core::GameRng;

/// Serialized PRD counters (the save's `prd` key).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedPrd {
    /// Transform ids in column order.
    pub ids: Vec<String>,
    /// Consecutive-failure counters.
    pub counters: Vec<u32>,
}

/// Per-transform PRD failure counters.
#[derive(Clone, Debug)]
pub struct PrdState {
    ids: Vec<String>,
    counters: Vec<u32>,
}

impl PrdState {
    /// Create counters for the given transform ids, all zero.
    pub fn new(ids: Vec<String>) -> Self {
        let counters = vec![0; ids.len()];
        Self { ids, counters }
    }

    /// Roll a proc for transform `index` with nominal `chance`.
    ///
    /// The effective chance is `chance * (failures + 1)`; success resets
    /// the counter, failure increments it. A chance of 1.0 always
    /// succeeds, a chance of 0.0 never does.
    pub fn roll(&mut self, index: u32, chance: f64, rng: &mut GameRng) -> bool {
        let i = index as usize;
        if chance <= 0.0 {
            return false;
        }
        let effective = (chance * f64::from(self.counters[i] + 1)).min(1.0);
        if rng.next_f64() < effective {
            self.counters[i] = 0;
            true
        } else {
            self.counters[i] = self.counters[i].saturating_add(1);
            false
        }
    }

    /// Current failure counter for a transform.
    pub fn counter(&self, index: u32) -> u32 {
        self.counters[index as usize]
    }

    /// Export counters for the save file.
    pub fn export_for_save(&self) -> SerializedPrd {
        SerializedPrd {
            ids: self.ids.clone(),
            counters: self.counters.clone(),
        }
    }

    /// Load counters from a save; id/shape mismatches reset to zero
    /// rather than failing (PRD drift is cosmetic, not authoritative).
    pub fn load_from_save(&mut self, data: &SerializedPrd) {
        if data.ids == self.ids && data.counters.len() == self.counters.len() {
            self.counters.copy_from_slice(&data.counters);
        } else {
            self.counters.fill(0);
        }
    }
}
