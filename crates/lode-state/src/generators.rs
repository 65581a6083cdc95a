//! The generator store: levels, level deltas, and gating flags.
//!
//! Same columnar layout and publish protocol as the resource store. The
//! `level_delta` column is a per-publish-window accumulator: it sums
//! level changes since the last snapshot and resets to zero when the
//! window drains, letting renderers animate purchases without diffing
//! absolute levels.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use lode_content::GeneratorDef;

use crate::dirty::DirtySet;
use crate::error::StateError;

const STORE: &str = "generators";

#[derive(Clone, Debug, Default)]
struct PublishColumns {
    level: Vec<u32>,
    level_delta: Vec<i32>,
    unlocked: Vec<u8>,
    visible: Vec<u8>,
    enabled: Vec<u8>,
}

/// Serialized generator progression (the save's `progression.generators`
/// key).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedGenerators {
    /// Generator ids in column order.
    pub ids: Vec<String>,
    /// Level column.
    pub levels: Vec<u32>,
    /// Enabled column (0/1).
    pub enabled: Vec<u8>,
    /// Unlocked column (0/1).
    pub unlocked: Vec<u8>,
    /// Visible column (0/1).
    pub visible: Vec<u8>,
}

/// Immutable view of the active publish generation.
#[derive(Clone, Copy, Debug)]
pub struct GeneratorSnapshot<'a> {
    /// Generator ids in column order.
    pub ids: &'a [String],
    /// Published level column.
    pub level: &'a [u32],
    /// Published level-delta column (changes within the drained window).
    pub level_delta: &'a [i32],
    /// Published unlocked column.
    pub unlocked: &'a [u8],
    /// Published visible column.
    pub visible: &'a [u8],
    /// Published enabled column.
    pub enabled: &'a [u8],
    /// Indices freshly copied in this flip, in mark order.
    pub dirty_indices: &'a [u32],
    /// Number of freshly copied indices.
    pub dirty_count: usize,
}

/// The authoritative generator store.
#[derive(Debug)]
pub struct GeneratorStore {
    ids: Vec<String>,
    index: IndexMap<String, u32>,
    level: Vec<u32>,
    level_delta: Vec<i32>,
    unlocked: Vec<u8>,
    visible: Vec<u8>,
    enabled: Vec<u8>,
    max_level: Vec<u32>,
    dirty: DirtySet,
    carry: Vec<u32>,
    publish: [PublishColumns; 2],
    active: usize,
}

impl GeneratorStore {
    /// Build the store from content definitions. Fails on duplicate ids.
    pub fn new(defs: &[GeneratorDef]) -> Result<Self, StateError> {
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
            level: vec![0; n],
            level_delta: vec![0; n],
            unlocked: defs.iter().map(|d| u8::from(d.unlocked)).collect(),
            visible: defs.iter().map(|d| u8::from(d.visible)).collect(),
            enabled: defs.iter().map(|d| u8::from(d.enabled)).collect(),
        };

        Ok(Self {
            ids: defs.iter().map(|d| d.id.clone()).collect(),
            index,
            level: vec![0; n],
            level_delta: vec![0; n],
            unlocked: initial.unlocked.clone(),
            visible: initial.visible.clone(),
            enabled: initial.enabled.clone(),
            max_level: defs.iter().map(|d| d.max_level).collect(),
            dirty: DirtySet::new(n),
            carry: Vec::with_capacity(n),
            publish: [initial.clone(), initial],
            active: 0,
        })
    }

    /// Number of generators.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Generator ids in column order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Index of a generator id; never allocates.
    pub fn index_of(&self, id: &str) -> Option<u32> {
        self.index.get(id).copied()
    }

    /// Index of a generator id, or a [`StateError::UnknownId`].
    pub fn require_index(&self, id: &str) -> Result<u32, StateError> {
        self.index_of(id).ok_or_else(|| StateError::UnknownId {
            store: STORE,
            id: id.to_string(),
        })
    }

    /// Current level.
    pub fn level(&self, index: u32) -> u32 {
        self.level[index as usize]
    }

    /// Level cap; 0 = unlimited.
    pub fn max_level(&self, index: u32) -> u32 {
        self.max_level[index as usize]
    }

    /// Whether the generator is unlocked.
    pub fn unlocked(&self, index: u32) -> bool {
        self.unlocked[index as usize] != 0
    }

    /// Whether the generator is visible.
    pub fn visible(&self, index: u32) -> bool {
        self.visible[index as usize] != 0
    }

    /// Whether the generator is enabled.
    pub fn enabled(&self, index: u32) -> bool {
        self.enabled[index as usize] != 0
    }

    /// Headroom below the level cap (`u32::MAX` when unlimited).
    pub fn level_headroom(&self, index: u32) -> u32 {
        let i = index as usize;
        if self.max_level[i] == 0 {
            u32::MAX
        } else {
            self.max_level[i].saturating_sub(self.level[i])
        }
    }

    /// Add levels, clamping at the cap. Returns the levels applied.
    pub fn increment_level(&mut self, index: u32, count: u32) -> u32 {
        let applied = count.min(self.level_headroom(index));
        if applied == 0 {
            return 0;
        }
        let i = index as usize;
        self.level[i] += applied;
        self.level_delta[i] = self.level_delta[i].saturating_add(applied as i32);
        self.dirty.mark(i);
        applied
    }

    /// Set the level directly (hydrate, prestige reset), clamping at the
    /// cap and accumulating the signed delta.
    pub fn set_level(&mut self, index: u32, level: u32) {
        let i = index as usize;
        let clamped = if self.max_level[i] == 0 {
            level
        } else {
            level.min(self.max_level[i])
        };
        if clamped != self.level[i] {
            let delta = clamped as i64 - self.level[i] as i64;
            self.level[i] = clamped;
            self.level_delta[i] = self.level_delta[i].saturating_add(delta as i32);
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

    /// Set the visible flag; marks dirty on change.
    pub fn set_visible(&mut self, index: u32, visible: bool) {
        let i = index as usize;
        let v = u8::from(visible);
        if self.visible[i] != v {
            self.visible[i] = v;
            self.dirty.mark(i);
        }
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

    /// Force a row into the next publish generation.
    pub fn mark_dirty(&mut self, index: u32) {
        self.dirty.mark(index as usize);
    }

    /// Number of rows pending publication.
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Drop all pending dirty marks without publishing.
    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Flip the publish buffer and copy dirty rows into it.
    ///
    /// Live `level_delta` accumulators for the drained rows reset to
    /// zero: the delta belongs to exactly one publish window.
    pub fn snapshot(&mut self) -> GeneratorSnapshot<'_> {
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
                cols.level[i] = self.level[i];
                cols.level_delta[i] = self.level_delta[i];
                cols.unlocked[i] = self.unlocked[i];
                cols.visible[i] = self.visible[i];
                cols.enabled[i] = self.enabled[i];
            }
        }
        self.carry.clear();
        self.carry.extend_from_slice(self.dirty.indices());
        for &i in self.dirty.indices() {
            self.level_delta[i as usize] = 0;
        }
        self.dirty.clear();
        self.active = next;

        let cols = &self.publish[self.active];
        GeneratorSnapshot {
            ids: &self.ids,
            level: &cols.level,
            level_delta: &cols.level_delta,
            unlocked: &cols.unlocked,
            visible: &cols.visible,
            enabled: &cols.enabled,
            dirty_indices: &self.carry,
            dirty_count: self.carry.len(),
        }
    }

    /// Read-only view of the live (authoritative) columns.
    pub fn view(&self) -> GeneratorSnapshot<'_> {
        GeneratorSnapshot {
            ids: &self.ids,
            level: &self.level,
            level_delta: &self.level_delta,
            unlocked: &self.unlocked,
            visible: &self.visible,
            enabled: &self.enabled,
            dirty_indices: self.dirty.indices(),
            dirty_count: self.dirty.len(),
        }
    }

    /// Export progression columns for the save file.
    pub fn export_for_save(&self) -> SerializedGenerators {
        SerializedGenerators {
            ids: self.ids.clone(),
            levels: self.level.clone(),
            enabled: self.enabled.clone(),
            unlocked: self.unlocked.clone(),
            visible: self.visible.clone(),
        }
    }

    /// Load progression columns from a save, bounds-checked.
    pub fn load_from_save(&mut self, data: &SerializedGenerators) -> Result<(), StateError> {
        let n = self.ids.len();
        if data.ids.len() != n
            || data.levels.len() != n
            || data.enabled.len() != n
            || data.unlocked.len() != n
            || data.visible.len() != n
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
            let cap = self.max_level[i];
            self.level[i] = if cap == 0 {
                data.levels[i]
            } else {
                data.levels[i].min(cap)
            };
            self.enabled[i] = u8::from(data.enabled[i] != 0);
            self.unlocked[i] = u8::from(data.unlocked[i] != 0);
            self.visible[i] = u8::from(data.visible[i] != 0);
            self.level_delta[i] = 0;
            self.dirty.mark(i);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_content::GeneratorDef;

    fn defs() -> Vec<GeneratorDef> {
        vec![
            GeneratorDef {
                id: "mine".into(),
                max_level: 0,
                cost: vec![],
                production: vec![],
                unlocked: true,
                visible: true,
                enabled: true,
                unlock_condition: None,
                visible_condition: None,
            },
            GeneratorDef {
                id: "reactor".into(),
                max_level: 5,
                cost: vec![],
                production: vec![],
                unlocked: false,
                visible: false,
                enabled: true,
                unlock_condition: None,
                visible_condition: None,
            },
        ]
    }

    fn store() -> GeneratorStore {
        GeneratorStore::new(&defs()).unwrap()
    }

    #[test]
    fn duplicate_id_is_fatal() {
        let mut d = defs();
        d.push(d[0].clone());
        assert!(matches!(
            GeneratorStore::new(&d),
            Err(StateError::DuplicateId { .. })
        ));
    }

    #[test]
    fn increment_respects_max_level() {
        let mut s = store();
        assert_eq!(s.increment_level(1, 3), 3);
        assert_eq!(s.increment_level(1, 10), 2); // clamped at 5
        assert_eq!(s.level(1), 5);
        assert_eq!(s.increment_level(1, 1), 0);
    }

    #[test]
    fn unlimited_generator_has_full_headroom() {
        let mut s = store();
        assert_eq!(s.level_headroom(0), u32::MAX);
        assert_eq!(s.increment_level(0, 1000), 1000);
    }

    #[test]
    fn level_delta_accumulates_and_resets_on_drain() {
        let mut s = store();
        s.increment_level(0, 2);
        s.increment_level(0, 3);

        let snap = s.snapshot();
        assert_eq!(snap.level[0], 5);
        assert_eq!(snap.level_delta[0], 5);
        drop(snap);

        // Delta belongs to one window only.
        s.increment_level(0, 1);
        let snap = s.snapshot();
        assert_eq!(snap.level[0], 6);
        assert_eq!(snap.level_delta[0], 1);
    }

    #[test]
    fn set_level_records_negative_delta() {
        let mut s = store();
        s.increment_level(0, 4);
        let _ = s.snapshot();
        s.set_level(0, 0); // prestige reset
        let snap = s.snapshot();
        assert_eq!(snap.level[0], 0);
        assert_eq!(snap.level_delta[0], -4);
    }

    #[test]
    fn drain_leaves_live_delta_zero() {
        let mut s = store();
        s.increment_level(0, 7);
        let _ = s.snapshot();
        assert_eq!(s.view().level_delta[0], 0);
        assert_eq!(s.dirty_len(), 0);
    }

    #[test]
    fn flip_catches_up_on_missed_generation() {
        let mut s = store();
        s.increment_level(0, 2);
        let _ = s.snapshot();
        s.set_unlocked(1, true);
        let snap = s.snapshot();
        assert_eq!(snap.level[0], 2);
        assert_eq!(snap.unlocked[1], 1);
    }

    #[test]
    fn save_round_trip() {
        let mut s = store();
        s.increment_level(0, 3);
        s.set_unlocked(1, true);
        s.set_enabled(0, false);
        let saved = s.export_for_save();

        let mut fresh = store();
        fresh.load_from_save(&saved).unwrap();
        assert_eq!(fresh.level(0), 3);
        assert!(fresh.unlocked(1));
        assert!(!fresh.enabled(0));
        assert_eq!(fresh.export_for_save(), saved);
    }

    #[test]
    fn load_clamps_levels_to_cap() {
        let mut s = store();
        let mut saved = s.export_for_save();
        saved.levels[1] = 99;
        s.load_from_save(&saved).unwrap();
        assert_eq!(s.level(1), 5);
    }

    #[test]
    fn load_rejects_reordered_ids() {
        let mut s = store();
        let mut saved = s.export_for_save();
        saved.ids.swap(0, 1);
        assert!(matches!(
            s.load_from_save(&saved),
            Err(StateError::LoadMismatch { .. })
        ));
    }
}
