//! Save serialization model for the Lode idle-game engine.
//!
//! Defines [`SaveFormat`] v1 (the typed shape of a save file), the
//! canonical JSON encoder that makes serialization byte-stable, and the
//! legacy v0 migration that folds an embedded `automationState` blob
//! into the modern `automation` module. The runtime composes these with
//! the store export/load methods to implement `serialize()`/`hydrate()`.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod canonical;
pub mod format;

pub use canonical::{to_canonical_json, CanonicalError};
pub use format::{
    migrate_v0, parse_save, ProgressionBlock, RuntimeBlock, SaveError, SaveFormat, SAVE_VERSION,
};
