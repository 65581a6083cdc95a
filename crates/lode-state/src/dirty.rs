//! Dirty-set tracking for columnar stores.
//!
//! A [`DirtySet`] is a scratch position array plus a packed index list:
//! `positions[i]` is `-1` when row `i` is clean, otherwise the row's slot
//! in `indices`. Marking is `O(1)`, draining is `O(dirty)`, and after
//! construction neither operation allocates. Scratch capacity grows to
//! the next power of two on demand and never shrinks.

/// Sentinel for a clean position.
const CLEAN: i32 = -1;

/// Packed dirty-index tracker.
#[derive(Clone, Debug)]
pub struct DirtySet {
    positions: Vec<i32>,
    indices: Vec<u32>,
}

impl DirtySet {
    /// Create a tracker covering `len` rows, all clean.
    pub fn new(len: usize) -> Self {
        let cap = len.next_power_of_two().max(1);
        Self {
            positions: vec![CLEAN; cap],
            indices: Vec::with_capacity(cap),
        }
    }

    /// Mark row `index` dirty. Returns `true` when the row was clean.
    ///
    /// # Panics
    ///
    /// Panics if `index` is beyond the tracked row count (a fatal range
    /// error: stores never mutate rows they do not own).
    pub fn mark(&mut self, index: usize) -> bool {
        if self.positions[index] != CLEAN {
            return false;
        }
        self.positions[index] = self.indices.len() as i32;
        self.indices.push(index as u32);
        true
    }

    /// Whether row `index` is currently dirty.
    pub fn is_dirty(&self, index: usize) -> bool {
        self.positions.get(index).is_some_and(|&p| p != CLEAN)
    }

    /// Number of dirty rows.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether no rows are dirty.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// The packed dirty indices, in mark order.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Reset every dirty position to clean. `O(dirty)`.
    pub fn clear(&mut self) {
        for &i in &self.indices {
            self.positions[i as usize] = CLEAN;
        }
        self.indices.clear();
    }

    /// Grow the tracked row count. Existing marks are preserved; scratch
    /// capacity rounds up to the next power of two and never shrinks.
    pub fn grow(&mut self, len: usize) {
        if len > self.positions.len() {
            self.positions.resize(len.next_power_of_two(), CLEAN);
        }
    }
}
