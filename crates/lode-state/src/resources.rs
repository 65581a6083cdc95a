//! The resource store: amounts, capacities, and visibility flags.
//!
//! Columns are parallel arrays indexed by the id interning built at
//! construction. Amounts are clamped to `[0, capacity]` on every write;
//! a capacity of `f64::INFINITY` means "uncapped" and serializes as
//! JSON `null`.
//!
//! # Publish protocol
//!
//! The store keeps two full publish column sets. [`snapshot()`]
//! (ResourceStore::snapshot) flips the active set, copies the union of
//! the current dirty list and the previous flip's carry list into it
//! (each buffer catches up on the changes it missed while inactive),
//! then retires the dirty list into the carry slot. Readers therefore
//! always see a complete, internally consistent generation, and the
//! copy cost stays `O(dirty)`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use lode_content::ResourceDef;
use lode_core::telemetry::TelemetryHandle;

use crate::dirty::DirtySet;
use crate::epsilon::DirtyEpsilon;
use crate::error::StateError;

const STORE: &str = "resources";

/// Map `-0.0` to `+0.0` for serialization.
fn normalize_zero(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v
    }
}

/// One publish column set.
#[derive(Clone, Debug, Default)]
struct PublishColumns {
    amount: Vec<f64>,
    capacity: Vec<f64>,
    unlocked: Vec<u8>,
    visible: Vec<u8>,
    flags: Vec<u32>,
}

/// Serialized amounts/capacities (the save's top-level `resources` key).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedResourceAmounts {
    /// Resource ids in column order.
    pub ids: Vec<String>,
    /// Amount column.
    pub amounts: Vec<f64>,
    /// Capacity column; `None` = uncapped.
    pub capacities: Vec<Option<f64>>,
}

/// Serialized unlock/visibility flags (the save's
/// `progression.resources` key).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedResourceProgression {
    /// Unlocked column (0/1).
    pub unlocked: Vec<u8>,
    /// Visible column (0/1).
    pub visible: Vec<u8>,
    /// Opaque per-resource flag bits.
    pub flags: Vec<u32>,
}

/// Immutable view of the active publish generation.
#[derive(Clone, Copy, Debug)]
pub struct ResourceSnapshot<'a> {
    /// Resource ids in column order.
    pub ids: &'a [String],
    /// Published amount column.
    pub amount: &'a [f64],
    /// Published capacity column (`f64::INFINITY` = uncapped).
    pub capacity: &'a [f64],
    /// Published unlocked column.
    pub unlocked: &'a [u8],
    /// Published visible column.
    pub visible: &'a [u8],
    /// Published flag bits.
    pub flags: &'a [u32],
    /// Indices freshly copied in this flip, in mark order.
    pub dirty_indices: &'a [u32],
    /// Number of freshly copied indices.
    pub dirty_count: usize,
}

/// The authoritative resource store.
#[derive(Debug)]
pub struct ResourceStore {
    ids: Vec<String>,
    index: IndexMap<String, u32>,
    amount: Vec<f64>,
    capacity: Vec<f64>,
    start_amount: Vec<f64>,
    unlocked: Vec<u8>,
    visible: Vec<u8>,
    flags: Vec<u32>,
    suppressed: Vec<f64>,
    dirty: DirtySet,
    carry: Vec<u32>,
    publish: [PublishColumns; 2],
    active: usize,
    epsilon: DirtyEpsilon,
    telemetry: TelemetryHandle,
}

impl ResourceStore {
    /// Build the store from content definitions.
    ///
    /// Fails on duplicate ids; both publish buffers start as full copies
    /// of the initial columns so a snapshot taken before any mutation is
    /// already valid.
    pub fn new(
        defs: &[ResourceDef],
        epsilon: DirtyEpsilon,
        telemetry: TelemetryHandle,
    ) -> Result<Self, StateError> {
        let mut index = IndexMap::with_capacity(defs.len());
        for (i, def) in defs.iter().enumerate() {
            if index.insert(def.id.clone(), i as u32).is_some() {
                return Err(StateError::DuplicateId {
                    store: STORE,
                    id: def.id.clone(),
                });
            }
        }

        let ids: Vec<String> = defs.iter().map(|d| d.id.clone()).collect();
        let amount: Vec<f64> = defs.iter().map(|d| d.start_amount).collect();
        let capacity: Vec<f64> = defs
            .iter()
            .map(|d| d.capacity.unwrap_or(f64::INFINITY))
            .collect();
        let unlocked: Vec<u8> = defs.iter().map(|d| u8::from(d.unlocked)).collect();
        let visible: Vec<u8> = defs.iter().map(|d| u8::from(d.visible)).collect();
        let flags = vec![0u32; defs.len()];

        let initial = PublishColumns {
            amount: amount.clone(),
            capacity: capacity.clone(),
            unlocked: unlocked.clone(),
            visible: visible.clone(),
            flags: flags.clone(),
        };

        Ok(Self {
            dirty: DirtySet::new(defs.len()),
            carry: Vec::with_capacity(defs.len()),
            publish: [initial.clone(), initial],
            active: 0,
            start_amount: defs.iter().map(|d| d.start_amount).collect(),
            suppressed: vec![0.0; defs.len()],
            ids,
            index,
            amount,
            capacity,
            unlocked,
            visible,
            flags,
            epsilon,
            telemetry,
        })
    }

    /// Number of resources.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Resource ids in column order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Index of a resource id; never allocates.
    pub fn index_of(&self, id: &str) -> Option<u32> {
        self.index.get(id).copied()
    }

    /// Index of a resource id, or an [`StateError::UnknownId`].
    pub fn require_index(&self, id: &str) -> Result<u32, StateError> {
        self.index_of(id).ok_or_else(|| StateError::UnknownId {
            store: STORE,
            id: id.to_string(),
        })
    }

    /// Current amount.
    pub fn amount(&self, index: u32) -> f64 {
        self.amount[index as usize]
    }

    /// Current capacity; `None` = uncapped.
    pub fn capacity(&self, index: u32) -> Option<f64> {
        let cap = self.capacity[index as usize];
        cap.is_finite().then_some(cap)
    }

    /// Start amount from the content pack (the prestige reset target).
    pub fn start_amount(&self, index: u32) -> f64 {
        self.start_amount[index as usize]
    }

    /// Whether the resource is unlocked.
    pub fn unlocked(&self, index: u32) -> bool {
        self.unlocked[index as usize] != 0
    }

    /// Whether the resource is visible.
    pub fn visible(&self, index: u32) -> bool {
        self.visible[index as usize] != 0
    }

    /// Opaque flag bits.
    pub fn flags(&self, index: u32) -> u32 {
        self.flags[index as usize]
    }

    /// Set the amount, clamping to `[0, capacity]`.
    ///
    /// Rejects non-finite input with telemetry `ResourceAmountInvalid`.
    pub fn set_amount(&mut self, index: u32, value: f64) -> Result<(), StateError> {
        if !value.is_finite() {
            return Err(self.non_finite("amount", index));
        }
        let i = index as usize;
        let clamped = value.clamp(0.0, self.capacity[i]);
        let old = self.amount[i];
        self.amount[i] = clamped;
        self.note_amount_change(i, old, clamped);
        Ok(())
    }

    /// Add a (possibly negative) delta, clamping to `[0, capacity]`.
    ///
    /// Returns the delta actually applied after clamping.
    pub fn add_amount(&mut self, index: u32, delta: f64) -> Result<f64, StateError> {
        if !delta.is_finite() {
            return Err(self.non_finite("amount", index));
        }
        let i = index as usize;
        let old = self.amount[i];
        let new = (old + delta).clamp(0.0, self.capacity[i]);
        self.amount[i] = new;
        self.note_amount_change(i, old, new);
        Ok(new - old)
    }

    /// Set the capacity, clamping the amount down when necessary.
    pub fn set_capacity(&mut self, index: u32, capacity: Option<f64>) -> Result<(), StateError> {
        if let Some(cap) = capacity {
            if !cap.is_finite() || cap < 0.0 {
                return Err(self.non_finite("capacity", index));
            }
        }
        let i = index as usize;
        let cap = capacity.unwrap_or(f64::INFINITY);
        if self.capacity[i] != cap {
            self.capacity[i] = cap;
            if self.amount[i] > cap {
                self.amount[i] = cap;
            }
            self.mark_dirty(index);
        }
        Ok(())
    }

    /// Set the unlocked flag; marks dirty on change.
    pub fn set_unlocked(&mut self, index: u32, unlocked: bool) {
        let i = index as usize;
        let v = u8::from(unlocked);
        if self.unlocked[i] != v {
            self.unlocked[i] = v;
            self.mark_dirty(index);
        }
    }

    /// Set the visible flag; marks dirty on change.
    pub fn set_visible(&mut self, index: u32, visible: bool) {
        let i = index as usize;
        let v = u8::from(visible);
        if self.visible[i] != v {
            self.visible[i] = v;
            self.mark_dirty(index);
        }
    }

    /// Set the opaque flag bits; marks dirty on change.
    pub fn set_flags(&mut self, index: u32, flags: u32) {
        let i = index as usize;
        if self.flags[i] != flags {
            self.flags[i] = flags;
            self.mark_dirty(index);
        }
    }

    /// Reset the amount to the content pack's start amount.
    pub fn reset_to_start(&mut self, index: u32) {
        let i = index as usize;
        let old = self.amount[i];
        let new = self.start_amount[i].clamp(0.0, self.capacity[i]);
        self.amount[i] = new;
        if old != new {
            self.mark_dirty(index);
        }
    }

    /// Force a row into the next publish generation.
    pub fn mark_dirty(&mut self, index: u32) {
        let i = index as usize;
        self.dirty.mark(i);
        self.suppressed[i] = 0.0;
    }

    /// Number of rows pending publication.
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Drop all pending dirty marks without publishing.
    pub fn clear_dirty(&mut self) {
        for &i in self.dirty.indices() {
            self.suppressed[i as usize] = 0.0;
        }
        self.dirty.clear();
    }

    /// Flip the publish buffer and copy dirty rows into it.
    ///
    /// The returned view is valid until the next mutation of the store.
    /// After this call every dirty position reads clean.
    pub fn snapshot(&mut self) -> ResourceSnapshot<'_> {
        let next = 1 - self.active;
        // The inactive buffer missed both the previous flip's rows and
        // the current dirty rows; copy the union. Two passes, no
        // allocation.
        for pass in 0..2 {
            let list: &[u32] = if pass == 0 {
                &self.carry
            } else {
                self.dirty.indices()
            };
            for &i in list {
                let i = i as usize;
                let cols = &mut self.publish[next];
                cols.amount[i] = self.amount[i];
                cols.capacity[i] = self.capacity[i];
                cols.unlocked[i] = self.unlocked[i];
                cols.visible[i] = self.visible[i];
                cols.flags[i] = self.flags[i];
            }
        }
        self.carry.clear();
        self.carry.extend_from_slice(self.dirty.indices());
        for &i in self.dirty.indices() {
            self.suppressed[i as usize] = 0.0;
        }
        self.dirty.clear();
        self.active = next;

        let cols = &self.publish[self.active];
        ResourceSnapshot {
            ids: &self.ids,
            amount: &cols.amount,
            capacity: &cols.capacity,
            unlocked: &cols.unlocked,
            visible: &cols.visible,
            flags: &cols.flags,
            dirty_indices: &self.carry,
            dirty_count: self.carry.len(),
        }
    }

    /// Read-only view of the live (authoritative) columns.
    pub fn view(&self) -> ResourceSnapshot<'_> {
        ResourceSnapshot {
            ids: &self.ids,
            amount: &self.amount,
            capacity: &self.capacity,
            unlocked: &self.unlocked,
            visible: &self.visible,
            flags: &self.flags,
            dirty_indices: self.dirty.indices(),
            dirty_count: self.dirty.len(),
        }
    }

    /// Export amounts and capacities for the save file.
    pub fn export_amounts(&self) -> SerializedResourceAmounts {
        SerializedResourceAmounts {
            ids: self.ids.clone(),
            amounts: self.amount.iter().map(|&v| normalize_zero(v)).collect(),
            capacities: self
                .capacity
                .iter()
                .map(|&c| c.is_finite().then_some(c))
                .collect(),
        }
    }

    /// Export unlock/visibility flags for the save file.
    pub fn export_progression(&self) -> SerializedResourceProgression {
        SerializedResourceProgression {
            unlocked: self.unlocked.clone(),
            visible: self.visible.clone(),
            flags: self.flags.clone(),
        }
    }

    /// Load amounts and capacities from a save, bounds-checked.
    ///
    /// Every row is marked dirty so the first post-hydrate snapshot
    /// republishes the full store.
    pub fn load_amounts(&mut self, data: &SerializedResourceAmounts) -> Result<(), StateError> {
        if data.ids.len() != self.ids.len()
            || data.amounts.len() != self.ids.len()
            || data.capacities.len() != self.ids.len()
        {
            return Err(StateError::LoadMismatch {
                store: STORE,
                reason: format!(
                    "expected {} rows, got ids={} amounts={} capacities={}",
                    self.ids.len(),
                    data.ids.len(),
                    data.amounts.len(),
                    data.capacities.len()
                ),
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
        for (i, &v) in data.amounts.iter().enumerate() {
            if !v.is_finite() {
                return Err(self.non_finite("amount", i as u32));
            }
            let cap = data.capacities[i].unwrap_or(f64::INFINITY);
            self.capacity[i] = cap;
            self.amount[i] = v.clamp(0.0, cap);
            self.mark_dirty(i as u32);
        }
        Ok(())
    }

    /// Load unlock/visibility flags from a save, bounds-checked.
    pub fn load_progression(
        &mut self,
        data: &SerializedResourceProgression,
    ) -> Result<(), StateError> {
        let n = self.ids.len();
        if data.unlocked.len() != n || data.visible.len() != n || data.flags.len() != n {
            return Err(StateError::LoadMismatch {
                store: STORE,
                reason: format!(
                    "expected {n} rows, got unlocked={} visible={} flags={}",
                    data.unlocked.len(),
                    data.visible.len(),
                    data.flags.len()
                ),
            });
        }
        for i in 0..n {
            self.unlocked[i] = u8::from(data.unlocked[i] != 0);
            self.visible[i] = u8::from(data.visible[i] != 0);
            self.flags[i] = data.flags[i];
            self.mark_dirty(i as u32);
        }
        Ok(())
    }

    fn note_amount_change(&mut self, i: usize, old: f64, new: f64) {
        let delta = (new - old).abs();
        if delta == 0.0 || self.dirty.is_dirty(i) {
            return;
        }
        if delta >= self.epsilon.threshold(new) {
            self.dirty.mark(i);
            self.suppressed[i] = 0.0;
            return;
        }
        // Sub-threshold drift accumulates until it forces a publish.
        self.suppressed[i] += delta;
        if self.suppressed[i] >= self.epsilon.override_max {
            self.dirty.mark(i);
            self.suppressed[i] = 0.0;
        }
    }

    fn non_finite(&self, column: &'static str, index: u32) -> StateError {
        let id = self
            .ids
            .get(index as usize)
            .cloned()
            .unwrap_or_default();
        self.telemetry.record_error(
            "ResourceAmountInvalid",
            Some(&serde_json::json!({ "id": id, "column": column })),
        );
        StateError::NonFinite {
            store: STORE,
            column,
            id,
        }
    }
}
