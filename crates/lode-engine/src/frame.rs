//! Frame assembly: snapshot deltas packed into pooled buffers.
//!
//! A frame carries only the rows that changed since the previous
//! publish (the dirty set), as parallel index/value buffers leased from
//! the transport pool. The frame owns its buffers, so it can cross the
//! worker boundary; the consumer hands them back through
//! [`Runtime::release_frame`](crate::Runtime::release_frame) (or
//! replacements) for next-cycle reuse.

use serde_json::{json, Value};

use lode_core::Step;
use lode_state::{GeneratorSnapshot, PoolError, ResourceSnapshot, TransportBufferPool};

/// One store's packed delta.
#[derive(Debug)]
pub struct FrameDelta {
    /// Pool lease id, used at release time.
    pub lease_id: u64,
    /// Dirty row indices.
    pub indices: Vec<u32>,
    /// Primary column values at those rows (amounts or levels).
    pub values: Vec<f64>,
    /// Packed state bits at those rows:
    /// `unlocked | visible<<1 | enabled<<2`.
    pub flags: Vec<u8>,
}

/// An immutable published frame for one tick.
#[derive(Debug)]
pub struct Frame {
    /// Step the frame was published at.
    pub step: Step,
    /// Resource delta (amount column).
    pub resources: FrameDelta,
    /// Generator delta (level column).
    pub generators: FrameDelta,
}

impl Frame {
    /// Assemble a frame from store snapshots, leasing pool buffers.
    pub fn assemble(
        step: Step,
        owner: &str,
        resources: &ResourceSnapshot<'_>,
        generators: &GeneratorSnapshot<'_>,
        pool: &mut TransportBufferPool,
    ) -> Result<Self, PoolError> {
        let mut resource_lease = pool.lease("resources", owner, resources.dirty_count)?;
        let mut resource_flags = Vec::with_capacity(resources.dirty_count);
        for &i in resources.dirty_indices {
            let i = i as usize;
            resource_lease.indices.push(i as u32);
            resource_lease.values.push(resources.amount[i]);
            resource_flags.push(resources.unlocked[i] | (resources.visible[i] << 1));
        }

        let mut generator_lease = match pool.lease("generators", owner, generators.dirty_count) {
            Ok(lease) => lease,
            Err(e) => {
                // Give the resource buffers back before failing.
                pool.release(
                    resource_lease.lease_id,
                    resource_lease.indices,
                    resource_lease.values,
                );
                return Err(e);
            }
        };
        let mut generator_flags = Vec::with_capacity(generators.dirty_count);
        for &i in generators.dirty_indices {
            let i = i as usize;
            generator_lease.indices.push(i as u32);
            generator_lease.values.push(f64::from(generators.level[i]));
            generator_flags.push(
                generators.unlocked[i]
                    | (generators.visible[i] << 1)
                    | (generators.enabled[i] << 2),
            );
        }

        Ok(Self {
            step,
            resources: FrameDelta {
                lease_id: resource_lease.lease_id,
                indices: resource_lease.indices,
                values: resource_lease.values,
                flags: resource_flags,
            },
            generators: FrameDelta {
                lease_id: generator_lease.lease_id,
                indices: generator_lease.indices,
                values: generator_lease.values,
                flags: generator_flags,
            },
        })
    }

    /// Serialize for the worker protocol's `frame` message.
    pub fn to_value(&self) -> Value {
        json!({
            "step": self.step.0,
            "resources": {
                "indices": self.resources.indices,
                "amounts": self.resources.values,
                "flags": self.resources.flags,
            },
            "generators": {
                "indices": self.generators.indices,
                "levels": self.generators.values,
                "flags": self.generators.flags,
            },
        })
    }

    /// Total dirty rows across stores.
    pub fn dirty_total(&self) -> usize {
        self.resources.indices.len() + self.generators.indices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_content::{GeneratorDef, ResourceDef};
    use lode_core::telemetry::NoopTelemetry;
    use lode_state::{
        DirtyEpsilon, GeneratorStore, ResourceStore, TransportPoolConfig,
    };
    use std::sync::Arc;

    fn stores() -> (ResourceStore, GeneratorStore) {
        let resources = ResourceStore::new(
            &[ResourceDef {
                id: "energy".into(),
                start_amount: 0.0,
                ..Default::default()
            }],
            DirtyEpsilon::default(),
            Arc::new(NoopTelemetry),
        )
        .unwrap();
        let generators = GeneratorStore::new(&[GeneratorDef {
            id: "mine".into(),
            max_level: 0,
            cost: vec![],
            production: vec![],
            unlocked: true,
            visible: true,
            enabled: true,
            unlock_condition: None,
            visible_condition: None,
        }])
        .unwrap();
        (resources, generators)
    }

    #[test]
    fn frame_packs_only_dirty_rows() {
        let (mut resources, mut generators) = stores();
        let mut pool = TransportBufferPool::new(
            TransportPoolConfig::default(),
            Arc::new(NoopTelemetry),
        );

        resources.set_amount(0, 9.0).unwrap();
        generators.increment_level(0, 2);

        let rsnap = resources.snapshot();
        let gsnap = generators.snapshot();
        let frame = Frame::assemble(Step(4), "test", &rsnap, &gsnap, &mut pool).unwrap();

        assert_eq!(frame.step, Step(4));
        assert_eq!(frame.resources.indices, vec![0]);
        assert_eq!(frame.resources.values, vec![9.0]);
        assert_eq!(frame.generators.values, vec![2.0]);
        // unlocked=1, visible=1, enabled=1 → 0b111
        assert_eq!(frame.generators.flags, vec![0b111]);
        assert_eq!(frame.dirty_total(), 2);
        assert_eq!(pool.outstanding(), 2);
    }

    #[test]
    fn empty_dirty_set_produces_empty_frame() {
        let (mut resources, mut generators) = stores();
        let mut pool = TransportBufferPool::new(
            TransportPoolConfig::default(),
            Arc::new(NoopTelemetry),
        );
        let rsnap = resources.snapshot();
        let gsnap = generators.snapshot();
        let frame = Frame::assemble(Step(0), "test", &rsnap, &gsnap, &mut pool).unwrap();
        assert_eq!(frame.dirty_total(), 0);
    }

    #[test]
    fn to_value_matches_wire_shape() {
        let (mut resources, mut generators) = stores();
        let mut pool = TransportBufferPool::new(
            TransportPoolConfig::default(),
            Arc::new(NoopTelemetry),
        );
        resources.set_amount(0, 1.5).unwrap();
        let rsnap = resources.snapshot();
        let gsnap = generators.snapshot();
        let frame = Frame::assemble(Step(1), "test", &rsnap, &gsnap, &mut pool).unwrap();

        let value = frame.to_value();
        assert_eq!(value["step"], 1);
        assert_eq!(value["resources"]["amounts"][0], 1.5);
        assert_eq!(value["generators"]["indices"].as_array().unwrap().len(), 0);
    }
}
