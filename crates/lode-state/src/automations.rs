//! The automation store: enable bits, cooldown bookkeeping, and the
//! edge-trigger latch.
//!
//! `last_fired_step` and `cooldown_expires_step` are `i64` with `-1`
//! meaning "never": an automation that has not fired yet has no cooldown
//! to wait out. `last_threshold_satisfied` is the edge-trigger latch —
//! the coordinator fires an automation only on the unsatisfied→satisfied
//! transition.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use lode_content::AutomationDef;
use lode_core::Step;

use crate::dirty::DirtySet;
use crate::error::StateError;

const STORE: &str = "automations";

/// Serialized automation state (the save's `automation` module).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedAutomations {
    /// Automation ids in column order.
    pub ids: Vec<String>,
    /// Enabled column (0/1).
    pub enabled: Vec<u8>,
    /// Step each automation last fired at; -1 = never.
    pub last_fired_step: Vec<i64>,
    /// Step each automation's cooldown expires at; -1 = none.
    pub cooldown_expires_step: Vec<i64>,
    /// Unlocked column (0/1).
    pub unlocked: Vec<u8>,
    /// Edge-trigger latch column (0/1).
    pub last_threshold_satisfied: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
struct PublishColumns {
    enabled: Vec<u8>,
    last_fired_step: Vec<i64>,
    cooldown_expires_step: Vec<i64>,
    unlocked: Vec<u8>,
    last_threshold_satisfied: Vec<u8>,
}

/// Immutable view of the active publish generation.
#[derive(Clone, Copy, Debug)]
pub struct AutomationSnapshot<'a> {
    /// Automation ids in column order.
    pub ids: &'a [String],
    /// Published enabled column.
    pub enabled: &'a [u8],
    /// Published last-fired column.
    pub last_fired_step: &'a [i64],
    /// Published cooldown-expiry column.
    pub cooldown_expires_step: &'a [i64],
    /// Published unlocked column.
    pub unlocked: &'a [u8],
    /// Published edge-latch column.
    pub last_threshold_satisfied: &'a [u8],
    /// Indices freshly copied in this flip, in mark order.
    pub dirty_indices: &'a [u32],
    /// Number of freshly copied indices.
    pub dirty_count: usize,
}

/// The authoritative automation store.
#[derive(Debug)]
pub struct AutomationStore {
    ids: Vec<String>,
    index: IndexMap<String, u32>,
    enabled: Vec<u8>,
    last_fired_step: Vec<i64>,
    cooldown_expires_step: Vec<i64>,
    unlocked: Vec<u8>,
    last_threshold_satisfied: Vec<u8>,
    dirty: DirtySet,
    carry: Vec<u32>,
    publish: [PublishColumns; 2],
    active: usize,
}

impl AutomationStore {
    /// Build the store from content definitions. Fails on duplicate ids.
    pub fn new(defs: &[AutomationDef]) -> Result<Self, StateError> {
        let mut index = IndexMap::with_capacity(defs.len());
        for (i, def) in defs.iter().enumerate() {
            if index.insert(def.id.clone(), i as u32).is_some() {
                return Err(StateError::DuplicateId {
                    store: STORE,
                    id: def.id.clone(),
                });
            }
        }
        let n = defs.len();
        let initial = PublishColumns {
            enabled: defs.iter().map(|d| u8::from(d.enabled)).collect(),
            last_fired_step: vec![-1; n],
            cooldown_expires_step: vec![-1; n],
            unlocked: defs
                .iter()
                .map(|d| u8::from(d.unlock_condition.is_none()))
                .collect(),
            last_threshold_satisfied: vec![0; n],
        };
        Ok(Self {
            ids: defs.iter().map(|d| d.id.clone()).collect(),
            index,
            enabled: initial.enabled.clone(),
            last_fired_step: vec![-1; n],
            cooldown_expires_step: vec![-1; n],
            unlocked: initial.unlocked.clone(),
            last_threshold_satisfied: vec![0; n],
            dirty: DirtySet::new(n),
            carry: Vec::with_capacity(n),
            publish: [initial.clone(), initial],
            active: 0,
        })
    }

    /// Number of automations.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Automation ids in column order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Index of an automation id; never allocates.
    pub fn index_of(&self, id: &str) -> Option<u32> {
        self.index.get(id).copied()
    }

    /// Index of an automation id, or a [`StateError::UnknownId`].
    pub fn require_index(&self, id: &str) -> Result<u32, StateError> {
        self.index_of(id).ok_or_else(|| StateError::UnknownId {
            store: STORE,
            id: id.to_string(),
        })
    }

    /// Whether the automation is enabled.
    pub fn enabled(&self, index: u32) -> bool {
        self.enabled[index as usize] != 0
    }

    /// Whether the automation is unlocked.
    pub fn unlocked(&self, index: u32) -> bool {
        self.unlocked[index as usize] != 0
    }

    /// Step the automation last fired at; -1 = never.
    pub fn last_fired_step(&self, index: u32) -> i64 {
        self.last_fired_step[index as usize]
    }

    /// Step the cooldown expires at; -1 = none.
    pub fn cooldown_expires_step(&self, index: u32) -> i64 {
        self.cooldown_expires_step[index as usize]
    }

    /// The edge-trigger latch from the previous evaluation.
    pub fn last_threshold_satisfied(&self, index: u32) -> bool {
        self.last_threshold_satisfied[index as usize] != 0
    }

    /// Whether the cooldown has expired at `step`.
    pub fn cooldown_ready(&self, index: u32, step: Step) -> bool {
        let expires = self.cooldown_expires_step[index as usize];
        expires < 0 || step.as_signed() >= expires
    }

    /// Set the enabled flag; marks dirty on change.
    pub fn set_enabled(&mut self, index: u32, enabled: bool) {
        let i = index as usize;
        let v = u8::from(enabled);
        if self.enabled[i] != v {
            self.enabled[i] = v;
            self.dirty.mark(i);
        }
    }

    /// Set the unlocked flag; marks dirty on change.
    pub fn set_unlocked(&mut self, index: u32, unlocked: bool) {
        let i = index as usize;
        let v = u8::from(unlocked);
        if self.unlocked[i] != v {
            self.unlocked[i] = v;
            self.dirty.mark(i);
        }
    }

    /// Update the edge-trigger latch; marks dirty on change.
    pub fn set_threshold_satisfied(&mut self, index: u32, satisfied: bool) {
        let i = index as usize;
        let v = u8::from(satisfied);
        if self.last_threshold_satisfied[i] != v {
            self.last_threshold_satisfied[i] = v;
            self.dirty.mark(i);
        }
    }

    /// Record a firing at `step` with the given cooldown.
    pub fn record_fired(&mut self, index: u32, step: Step, cooldown_steps: u64) {
        let i = index as usize;
        self.last_fired_step[i] = step.as_signed();
        self.cooldown_expires_step[i] = if cooldown_steps == 0 {
            -1
        } else {
            step.as_signed() + cooldown_steps as i64
        };
        self.dirty.mark(i);
    }

    /// Number of rows pending publication.
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Indices pending publication, in mark order.
    pub fn dirty_indices(&self) -> &[u32] {
        self.dirty.indices()
    }

    /// Reset dirty tracking after the runtime publishes a frame.
    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Flip the publish buffer and copy dirty rows into it.
    pub fn snapshot(&mut self) -> AutomationSnapshot<'_> {
        let next = 1 - self.active;
        for pass in 0..2 {
            let list: &[u32] = if pass == 0 {
                &self.carry
            } else {
                self.dirty.indices()
            };
            for &i in list {
                let i = i as usize;
                let cols = &mut self.publish[next];
                cols.enabled[i] = self.enabled[i];
                cols.last_fired_step[i] = self.last_fired_step[i];
                cols.cooldown_expires_step[i] = self.cooldown_expires_step[i];
                cols.unlocked[i] = self.unlocked[i];
                cols.last_threshold_satisfied[i] = self.last_threshold_satisfied[i];
            }
        }
        self.carry.clear();
        self.carry.extend_from_slice(self.dirty.indices());
        self.dirty.clear();
        self.active = next;

        let cols = &self.publish[self.active];
        AutomationSnapshot {
            ids: &self.ids,
            enabled: &cols.enabled,
            last_fired_step: &cols.last_fired_step,
            cooldown_expires_step: &cols.cooldown_expires_step,
            unlocked: &cols.unlocked,
            last_threshold_satisfied: &cols.last_threshold_satisfied,
            dirty_indices: &self.carry,
            dirty_count: self.carry.len(),
        }
    }

    /// Read-only view of the live (authoritative) columns.
    pub fn view(&self) -> AutomationSnapshot<'_> {
        AutomationSnapshot {
            ids: &self.ids,
            enabled: &self.enabled,
            last_fired_step: &self.last_fired_step,
            cooldown_expires_step: &self.cooldown_expires_step,
            unlocked: &self.unlocked,
            last_threshold_satisfied: &self.last_threshold_satisfied,
            dirty_indices: self.dirty.indices(),
            dirty_count: self.dirty.len(),
        }
    }

    /// Export the automation module for the save file.
    pub fn export_for_save(&self) -> SerializedAutomations {
        SerializedAutomations {
            ids: self.ids.clone(),
            enabled: self.enabled.clone(),
            last_fired_step: self.last_fired_step.clone(),
            cooldown_expires_step: self.cooldown_expires_step.clone(),
            unlocked: self.unlocked.clone(),
            last_threshold_satisfied: self.last_threshold_satisfied.clone(),
        }
    }

    /// Load the automation module from a save, bounds-checked.
    pub fn load_from_save(&mut self, data: &SerializedAutomations) -> Result<(), StateError> {
        let n = self.ids.len();
        if data.ids.len() != n
            || data.enabled.len() != n
            || data.last_fired_step.len() != n
            || data.cooldown_expires_step.len() != n
            || data.unlocked.len() != n
            || data.last_threshold_satisfied.len() != n
        {
            return Err(StateError::LoadMismatch {
                store: STORE,
                reason: format!("expected {n} rows, got {}", data.ids.len()),
            });
        }
        for (i, id) in data.ids.iter().enumerate() {
            if *id != self.ids[i] {
                return Err(StateError::LoadMismatch {
                    store: STORE,
                    reason: format!("row {i}: expected id {:?}, got {id:?}", self.ids[i]),
                });
            }
        }
        for i in 0..n {
            self.enabled[i] = u8::from(data.enabled[i] != 0);
            self.last_fired_step[i] = data.last_fired_step[i].max(-1);
            self.cooldown_expires_step[i] = data.cooldown_expires_step[i].max(-1);
            self.unlocked[i] = u8::from(data.unlocked[i] != 0);
            self.last_threshold_satisfied[i] = u8::from(data.last_threshold_satisfied[i] != 0);
            self.dirty.mark(i);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_content::{AutomationDef, CommandTemplate, Condition};
    use serde_json::Value;

    fn defs() -> Vec<AutomationDef> {
        vec![
            AutomationDef {
                id: "auto-buy".into(),
                trigger: Condition::Always,
                command: CommandTemplate {
                    kind: "PURCHASE_GENERATOR".into(),
                    payload: Value::Null,
                },
                cooldown_steps: 10,
                enabled: true,
                unlock_condition: None,
            },
            AutomationDef {
                id: "auto-sell".into(),
                trigger: Condition::Never,
                command: CommandTemplate {
                    kind: "APPLY_TRANSFORM".into(),
                    payload: Value::Null,
                },
                cooldown_steps: 0,
                enabled: false,
                unlock_condition: Some(Condition::Never),
            },
        ]
    }

    fn store() -> AutomationStore {
        AutomationStore::new(&defs()).unwrap()
    }

    #[test]
    fn initial_state_reflects_definitions() {
        let s = store();
        assert!(s.enabled(0));
        assert!(!s.enabled(1));
        // Gated automation starts locked, ungated starts unlocked.
        assert!(s.unlocked(0));
        assert!(!s.unlocked(1));
        assert_eq!(s.last_fired_step(0), -1);
        assert_eq!(s.cooldown_expires_step(0), -1);
    }

    #[test]
    fn cooldown_bookkeeping() {
        let mut s = store();
        assert!(s.cooldown_ready(0, Step(0)));
        s.record_fired(0, Step(5), 10);
        assert_eq!(s.last_fired_step(0), 5);
        assert_eq!(s.cooldown_expires_step(0), 15);
        assert!(!s.cooldown_ready(0, Step(14)));
        assert!(s.cooldown_ready(0, Step(15)));
    }

    #[test]
    fn zero_cooldown_is_always_ready() {
        let mut s = store();
        s.record_fired(1, Step(3), 0);
        assert_eq!(s.cooldown_expires_step(1), -1);
        assert!(s.cooldown_ready(1, Step(3)));
    }

    #[test]
    fn edge_latch_marks_dirty_only_on_change() {
        let mut s = store();
        s.set_threshold_satisfied(0, true);
        s.set_threshold_satisfied(0, true);
        assert_eq!(s.dirty_len(), 1);
        assert!(s.last_threshold_satisfied(0));
    }

    #[test]
    fn snapshot_flip_catches_up_on_missed_generation() {
        let mut s = store();
        s.record_fired(0, Step(3), 10);
        let snap = s.snapshot();
        assert_eq!(snap.last_fired_step[0], 3);
        assert_eq!(snap.dirty_count, 1);

        s.set_unlocked(1, true);
        let snap = s.snapshot();
        assert_eq!(snap.last_fired_step[0], 3);
        assert_eq!(snap.unlocked[1], 1);
        drop(snap);
        assert_eq!(s.dirty_len(), 0);
    }

    #[test]
    fn save_round_trip() {
        let mut s = store();
        s.record_fired(0, Step(7), 10);
        s.set_threshold_satisfied(0, true);
        s.set_unlocked(1, true);
        let saved = s.export_for_save();

        let mut fresh = store();
        fresh.load_from_save(&saved).unwrap();
        assert_eq!(fresh.last_fired_step(0), 7);
        assert_eq!(fresh.cooldown_expires_step(0), 17);
        assert!(fresh.last_threshold_satisfied(0));
        assert!(fresh.unlocked(1));
        assert_eq!(fresh.export_for_save(), saved);
    }

    #[test]
    fn load_clamps_negative_sentinels() {
        let mut s = store();
        let mut saved = s.export_for_save();
        saved.last_fired_step[0] = -99;
        s.load_from_save(&saved).unwrap();
        assert_eq!(s.last_fired_step(0), -1);
    }

    #[test]
    fn duplicate_id_is_fatal() {
        let mut d = defs();
        d.push(d[0].clone());
        assert!(matches!(
            AutomationStore::new(&d),
            Err(StateError::DuplicateId { .. })
        ));
    }
}
