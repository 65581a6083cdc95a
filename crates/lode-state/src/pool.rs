//! Reusable typed-buffer leases for snapshot publishing.
//!
//! Shipping a frame across the worker boundary transfers ownership of
//! its column buffers to the consumer thread. The pool keeps released
//! buffers for the next cycle so steady-state publishing allocates
//! nothing: a lease hands out an index buffer and a value buffer sized
//! to the frame's dirty count, and release accepts the originals — or
//! replacement buffers of any capacity — back into the free list.
//!
//! Buffer capacity grows to the next power of two on demand and never
//! shrinks.

use std::error::Error;
use std::fmt;

use indexmap::IndexMap;

use lode_core::telemetry::TelemetryHandle;

/// Pool sizing limits.
#[derive(Clone, Copy, Debug)]
pub struct TransportPoolConfig {
    /// Capacity (in rows) buffers start with.
    pub initial_capacity: usize,
    /// Hard ceiling on a single lease's dirty count.
    pub max_dirty_count: usize,
}

impl Default for TransportPoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 64,
            max_dirty_count: 65_536,
        }
    }
}

/// A leased buffer pair, tagged with its requester.
#[derive(Debug)]
pub struct FrameLease {
    /// Opaque lease id used at release time.
    pub lease_id: u64,
    /// Component the lease serves ("resources", "generators", ...).
    pub component: String,
    /// Owner label for diagnostics (e.g. the worker session id).
    pub owner: String,
    /// Dirty-row count the lease was sized for.
    pub dirty_count: usize,
    /// Dirty-index buffer, cleared, capacity >= `dirty_count`.
    pub indices: Vec<u32>,
    /// Column-value buffer, cleared, capacity >= `dirty_count`.
    pub values: Vec<f64>,
}

/// Errors from the buffer pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolError {
    /// A lease requested more rows than the configured ceiling
    /// (`ResourceTransportPoolExhausted`).
    Exhausted {
        /// Rows requested.
        requested: usize,
        /// Configured ceiling.
        max_dirty_count: usize,
    },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted {
                requested,
                max_dirty_count,
            } => write!(
                f,
                "transport pool exhausted: {requested} rows requested, max {max_dirty_count}"
            ),
        }
    }
}

impl Error for PoolError {}

struct LeaseInfo {
    component: String,
}

/// The transport buffer pool.
pub struct TransportBufferPool {
    free_indices: Vec<Vec<u32>>,
    free_values: Vec<Vec<f64>>,
    capacity: usize,
    max_dirty_count: usize,
    outstanding: IndexMap<u64, LeaseInfo>,
    next_lease_id: u64,
    telemetry: TelemetryHandle,
}

impl TransportBufferPool {
    /// Create a pool with the given limits.
    pub fn new(config: TransportPoolConfig, telemetry: TelemetryHandle) -> Self {
        Self {
            free_indices: Vec::new(),
            free_values: Vec::new(),
            capacity: config.initial_capacity.next_power_of_two().max(1),
            max_dirty_count: config.max_dirty_count,
            outstanding: IndexMap::new(),
            next_lease_id: 0,
            telemetry,
        }
    }

    /// Lease a buffer pair sized for `dirty_count` rows.
    ///
    /// Exhaustion (`dirty_count` beyond the ceiling) records
    /// `ResourceTransportPoolExhausted` and fails. Growing the per-buffer
    /// capacity records `ResourceTransportPoolUpsized`.
    pub fn lease(
        &mut self,
        component: &str,
        owner: &str,
        dirty_count: usize,
    ) -> Result<FrameLease, PoolError> {
        if dirty_count > self.max_dirty_count {
            self.telemetry.record_error(
                "ResourceTransportPoolExhausted",
                Some(&serde_json::json!({
                    "component": component,
                    "owner": owner,
                    "dirtyCount": dirty_count,
                    "maxDirtyCount": self.max_dirty_count,
                })),
            );
            return Err(PoolError::Exhausted {
                requested: dirty_count,
                max_dirty_count: self.max_dirty_count,
            });
        }

        if dirty_count > self.capacity {
            let new_capacity = dirty_count.next_power_of_two();
            self.telemetry.record_warning(
                "ResourceTransportPoolUpsized",
                Some(&serde_json::json!({
                    "component": component,
                    "from": self.capacity,
                    "to": new_capacity,
                })),
            );
            self.capacity = new_capacity;
        }

        let mut indices = self.free_indices.pop().unwrap_or_default();
        let mut values = self.free_values.pop().unwrap_or_default();
        indices.clear();
        values.clear();
        if indices.capacity() < self.capacity {
            indices.reserve(self.capacity - indices.capacity());
        }
        if values.capacity() < self.capacity {
            values.reserve(self.capacity - values.capacity());
        }

        let lease_id = self.next_lease_id;
        self.next_lease_id += 1;
        self.outstanding.insert(
            lease_id,
            LeaseInfo {
                component: component.to_string(),
            },
        );

        Ok(FrameLease {
            lease_id,
            component: component.to_string(),
            owner: owner.to_string(),
            dirty_count,
            indices,
            values,
        })
    }

    /// Return a lease's buffers to the pool.
    ///
    /// The consumer may hand back the original buffers or transferred
    /// replacements; either way they join the free list for the next
    /// cycle. Releasing an unknown or already-released lease records
    /// `ResourceTransportDoubleRelease` and keeps the buffers anyway.
    pub fn release(&mut self, lease_id: u64, indices: Vec<u32>, values: Vec<f64>) {
        if self.outstanding.shift_remove(&lease_id).is_none() {
            self.telemetry.record_warning(
                "ResourceTransportDoubleRelease",
                Some(&serde_json::json!({ "leaseId": lease_id })),
            );
        }
        self.free_indices.push(indices);
        self.free_values.push(values);
    }

    /// Number of leases not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Current per-buffer capacity in rows.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Component of an outstanding lease, for diagnostics.
    pub fn lease_component(&self, lease_id: u64) -> Option<&str> {
        self.outstanding
            .get(&lease_id)
            .map(|info| info.component.as_str())
    }
}
