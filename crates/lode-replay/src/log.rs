//! Command log data types.

use serde::{Deserialize, Serialize};

use lode_core::Command;
use lode_progression::{SerializedPrd, SerializedTransforms};
use lode_save::ProgressionBlock;
use lode_state::{SerializedAutomations, SerializedResourceAmounts};

/// Log format version.
pub const LOG_VERSION: u32 = 1;

/// A deep copy of the simulation state sufficient to restore it.
///
/// This is the save format's state portion without the wall-clock and
/// queue blocks: replay restores state in place and replays the queue
/// contents from the recorded command stream instead.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Resource amounts and capacities.
    pub resources: SerializedResourceAmounts,
    /// Progression counters.
    pub progression: ProgressionBlock,
    /// Automation module state.
    pub automation: SerializedAutomations,
    /// Transform counters.
    pub transforms: SerializedTransforms,
    /// PRD accumulators.
    pub prd: SerializedPrd,
}

/// Log metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMetadata {
    /// Highest step among recorded commands; -1 when the log is empty.
    pub last_step: i64,
    /// RNG seed-state captured at the first record since the last
    /// clear; `None` for an empty log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// An exported command log: starting state, ordered commands, metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandLog {
    /// Log format version.
    pub version: u32,
    /// State at recording start.
    pub start_state: StateSnapshot,
    /// Executed commands, in execution order.
    pub commands: Vec<Command>,
    /// Metadata (last step, RNG seed).
    pub metadata: LogMetadata,
}
