//! Columnar authoritative state stores for the Lode idle-game engine.
//!
//! One store per entity kind — resources, generators, upgrades,
//! automations — each laid out as parallel columns over a fixed id set
//! interned at construction from the content pack. Mutation marks a
//! dirty set with `O(1)` cost; [`snapshot`](resources::ResourceStore::snapshot)
//! flips a double-buffered publish column set and copies only dirty
//! positions, so renderers always observe a consistent generation while
//! the live columns keep mutating.
//!
//! The [`pool`] module provides the reusable typed-buffer leases used
//! when shipping snapshot deltas across the worker boundary.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod automations;
pub mod dirty;
pub mod epsilon;
pub mod error;
pub mod generators;
pub mod pool;
pub mod resources;
pub mod upgrades;

pub use automations::{AutomationSnapshot, AutomationStore, SerializedAutomations};
pub use dirty::DirtySet;
pub use epsilon::DirtyEpsilon;
pub use error::StateError;
pub use generators::{GeneratorSnapshot, GeneratorStore, SerializedGenerators};
pub use pool::{FrameLease, PoolError, TransportBufferPool, TransportPoolConfig};
pub use resources::{
    ResourceSnapshot, ResourceStore, SerializedResourceAmounts, SerializedResourceProgression,
};
pub use upgrades::{SerializedUpgrades, UpgradeSnapshot, UpgradeStore};
