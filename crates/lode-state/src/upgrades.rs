//! The upgrade store: purchase counts and ownership bits.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use lode_content::UpgradeDef;

use crate::dirty::DirtySet;
use crate::error::StateError;

const STORE: &str = "upgrades";

/// Serialized upgrade progression (the save's `progression.upgrades` key).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedUpgrades {
    /// Upgrade ids in column order.
    pub ids: Vec<String>,
    /// Purchase-count column.
    pub purchases: Vec<u32>,
    /// Ownership column (0/1); 1 iff purchases > 0.
    pub owned: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
struct PublishColumns {
    purchases: Vec<u32>,
    owned: Vec<u8>,
    unlocked: Vec<u8>,
}

/// Immutable view of the active publish generation.
#[derive(Clone, Copy, Debug)]
pub struct UpgradeSnapshot<'a> {
    /// Upgrade ids in column order.
    pub ids: &'a [String],
    /// Published purchase-count column.
    pub purchases: &'a [u32],
    /// Published ownership column.
    pub owned: &'a [u8],
    /// Published unlocked column.
    pub unlocked: &'a [u8],
    /// Indices freshly copied in this flip, in mark order.
    pub dirty_indices: &'a [u32],
    /// Number of freshly copied indices.
    pub dirty_count: usize,
}

/// The authoritative upgrade store.
#[derive(Debug)]
pub struct UpgradeStore {
    ids: Vec<String>,
    index: IndexMap<String, u32>,
    purchases: Vec<u32>,
    owned: Vec<u8>,
    unlocked: Vec<u8>,
    max_purchases: Vec<u32>,
    dirty: DirtySet,
    carry: Vec<u32>,
    publish: [PublishColumns; 2],
    active: usize,
}

impl UpgradeStore {
    /// Build the store from content definitions. Fails on duplicate ids.
    pub fn new(defs: &[UpgradeDef]) -> Result<Self, StateError> {
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
            purchases: vec![0; n],
            owned: vec![0; n],
            unlocked: vec![1; n],
        };
        Ok(Self {
            ids: defs.iter().map(|d| d.id.clone()).collect(),
            index,
            purchases: vec![0; n],
            owned: vec![0; n],
            unlocked: vec![1; n],
            max_purchases: defs.iter().map(|d| d.max_purchases).collect(),
            dirty: DirtySet::new(n),
            carry: Vec::with_capacity(n),
            publish: [initial.clone(), initial],
            active: 0,
        })
    }

    /// Number of upgrades.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Upgrade ids in column order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Index of an upgrade id; never allocates.
    pub fn index_of(&self, id: &str) -> Option<u32> {
        self.index.get(id).copied()
    }

    /// Index of an upgrade id, or a [`StateError::UnknownId`].
    pub fn require_index(&self, id: &str) -> Result<u32, StateError> {
        self.index_of(id).ok_or_else(|| StateError::UnknownId {
            store: STORE,
            id: id.to_string(),
        })
    }

    /// Purchase count.
    pub fn purchases(&self, index: u32) -> u32 {
        self.purchases[index as usize]
    }

    /// Whether the upgrade has been purchased at least once.
    pub fn owned(&self, index: u32) -> bool {
        self.owned[index as usize] != 0
    }

    /// Whether the upgrade is unlocked.
    pub fn unlocked(&self, index: u32) -> bool {
        self.unlocked[index as usize] != 0
    }

    /// Purchase cap; 1 = single-purchase.
    pub fn max_purchases(&self, index: u32) -> u32 {
        self.max_purchases[index as usize]
    }

    /// Remaining purchases before the cap.
    pub fn purchase_headroom(&self, index: u32) -> u32 {
        let i = index as usize;
        self.max_purchases[i].saturating_sub(self.purchases[i])
    }

    /// Add purchases, clamping at the cap. Returns the count applied.
    pub fn increment_purchases(&mut self, index: u32, count: u32) -> u32 {
        let applied = count.min(self.purchase_headroom(index));
        if applied == 0 {
            return 0;
        }
        let i = index as usize;
        self.purchases[i] += applied;
        self.owned[i] = 1;
        self.dirty.mark(i);
        applied
    }

    /// Set the purchase count directly (hydrate, prestige reset).
    pub fn set_purchases(&mut self, index: u32, count: u32) {
        let i = index as usize;
        let clamped = count.min(self.max_purchases[i]);
        if clamped != self.purchases[i] {
            self.purchases[i] = clamped;
            self.owned[i] = u8::from(clamped > 0);
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

    /// Force a row into the next publish generation.
    pub fn mark_dirty(&mut self, index: u32) {
        self.dirty.mark(index as usize);
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
    pub fn snapshot(&mut self) -> UpgradeSnapshot<'_> {
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
                cols.purchases[i] = self.purchases[i];
                cols.owned[i] = self.owned[i];
                cols.unlocked[i] = self.unlocked[i];
            }
        }
        self.carry.clear();
        self.carry.extend_from_slice(self.dirty.indices());
        self.dirty.clear();
        self.active = next;

        let cols = &self.publish[self.active];
        UpgradeSnapshot {
            ids: &self.ids,
            purchases: &cols.purchases,
            owned: &cols.owned,
            unlocked: &cols.unlocked,
            dirty_indices: &self.carry,
            dirty_count: self.carry.len(),
        }
    }

    /// Read-only view of the live (authoritative) columns.
    pub fn view(&self) -> UpgradeSnapshot<'_> {
        UpgradeSnapshot {
            ids: &self.ids,
            purchases: &self.purchases,
            owned: &self.owned,
            unlocked: &self.unlocked,
            dirty_indices: self.dirty.indices(),
            dirty_count: self.dirty.len(),
        }
    }

    /// Export progression columns for the save file.
    pub fn export_for_save(&self) -> SerializedUpgrades {
        SerializedUpgrades {
            ids: self.ids.clone(),
            purchases: self.purchases.clone(),
            owned: self.owned.clone(),
        }
    }

    /// Load progression columns from a save, bounds-checked.
    pub fn load_from_save(&mut self, data: &SerializedUpgrades) -> Result<(), StateError> {
        let n = self.ids.len();
        if data.ids.len() != n || data.purchases.len() != n || data.owned.len() != n {
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
            let clamped = data.purchases[i].min(self.max_purchases[i]);
            self.purchases[i] = clamped;
            self.owned[i] = u8::from(clamped > 0);
            self.dirty.mark(i);
        }
        Ok(())
    }
}
