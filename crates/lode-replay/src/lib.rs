//! Command recording and deterministic replay for the Lode engine.
//!
//! The recorder captures a starting state snapshot, the RNG seed at
//! first record, and every executed command in order. Replaying a log
//! restores the snapshot and seed, then re-dispatches the commands
//! through the same dispatcher surface used live; handler follow-ups
//! are checked against the recorded stream, so a drifted handler set is
//! detected instead of silently diverging.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod log;
pub mod recorder;
pub mod replay;

pub use log::{CommandLog, LogMetadata, StateSnapshot, LOG_VERSION};
pub use recorder::CommandRecorder;
pub use replay::{replay, ReplayError, ReplaySummary, ReplayWorld};
