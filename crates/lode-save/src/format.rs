//! SaveFormat v1 and the legacy v0 migration.
//!
//! A v1 save is a single JSON object; the version field is implicit
//! (absent = 1) and anything above 1 is rejected. Legacy v0 saves
//! carried the automation module as an `automationState` blob embedded
//! either under `resources` or under `progression.resources` — some
//! producers wrote one location, some the other — so the migration
//! accepts both and folds the blob into the modern top-level
//! `automation` key.

use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use lode_command::{QueueImportError, SerializedQueue};
use lode_progression::{SerializedPrd, SerializedTransforms};
use lode_state::{
    SerializedAutomations, SerializedGenerators, SerializedResourceAmounts,
    SerializedResourceProgression, SerializedUpgrades, StateError,
};

/// The current (implicit) save version.
pub const SAVE_VERSION: u32 = 1;

/// Runtime counters block (the save's `runtime` key).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeBlock {
    /// Step the simulation had advanced to at save time.
    pub current_step: u64,
    /// Next step eligible for command execution.
    pub next_executable_step: u64,
    /// RNG seed-state at save time.
    pub rng_seed: u64,
}

/// Progression counters block (the save's `progression` key).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionBlock {
    /// Resource unlock/visibility flags.
    pub resources: SerializedResourceProgression,
    /// Generator levels and flags.
    pub generators: SerializedGenerators,
    /// Upgrade purchase counts.
    pub upgrades: SerializedUpgrades,
}

/// A complete v1 save.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveFormat {
    /// Save creation time, ISO 8601. Informational only; hydration
    /// ignores it.
    pub saved_at: String,
    /// Explicit version, written only by migration tooling. Absent = 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
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
    /// Pending command queue.
    pub command_queue: SerializedQueue,
    /// Runtime counters.
    pub runtime: RuntimeBlock,
    /// Content pack digest the save was produced against.
    pub content_digest: String,
}

/// Errors from save parsing and hydration.
#[derive(Debug)]
pub enum SaveError {
    /// The save declares a version newer than this runtime supports.
    UnsupportedVersion {
        /// Declared version.
        version: u32,
    },
    /// The save's content digest does not match the loaded pack.
    DigestMismatch {
        /// Digest of the loaded content pack.
        expected: String,
        /// Digest embedded in the save.
        found: String,
    },
    /// The save is not structurally valid JSON for the format.
    Parse(serde_json::Error),
    /// A store rejected its serialized columns.
    State(StateError),
    /// The command queue block failed validation.
    Queue(QueueImportError),
    /// The save's step is behind the running runtime.
    StepRegression {
        /// Step in the save.
        save_step: u64,
        /// Current runtime step.
        runtime_step: u64,
    },
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion { version } => {
                write!(f, "unsupported save version {version}")
            }
            Self::DigestMismatch { expected, found } => {
                write!(f, "content digest mismatch: save has {found}, pack is {expected}")
            }
            Self::Parse(e) => write!(f, "save parse error: {e}"),
            Self::State(e) => write!(f, "save state error: {e}"),
            Self::Queue(e) => write!(f, "save queue error: {e}"),
            Self::StepRegression {
                save_step,
                runtime_step,
            } => write!(
                f,
                "save at step {save_step} is behind the running runtime at step {runtime_step}"
            ),
        }
    }
}

impl Error for SaveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
            Self::State(e) => Some(e),
            Self::Queue(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SaveError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

impl From<StateError> for SaveError {
    fn from(e: StateError) -> Self {
        Self::State(e)
    }
}

impl From<QueueImportError> for SaveError {
    fn from(e: QueueImportError) -> Self {
        Self::Queue(e)
    }
}

/// Migrate a raw v0 save value in place. Returns whether a migration
/// was applied.
///
/// v0 saves embed `automationState` under `resources` **or** under
/// `progression.resources`; either location is accepted (rejecting both
/// would strand old saves). The blob moves to the top-level
/// `automation` key and the version marker is dropped.
pub fn migrate_v0(value: &mut Value) -> bool {
    let declares_v0 = value.get("version").and_then(Value::as_u64) == Some(0);
    let has_modern_automation = value.get("automation").is_some();

    let mut automation_state: Option<Value> = None;
    if let Some(resources) = value.get_mut("resources").and_then(Value::as_object_mut) {
        if let Some(state) = resources.remove("automationState") {
            automation_state = Some(state);
        }
    }
    if let Some(progression_resources) = value
        .get_mut("progression")
        .and_then(|p| p.get_mut("resources"))
        .and_then(Value::as_object_mut)
    {
        if let Some(state) = progression_resources.remove("automationState") {
            // Prefer the first location found; both carrying the blob
            // means they were written by the same producer and agree.
            automation_state.get_or_insert(state);
        }
    }

    let migrated = automation_state.is_some() || declares_v0;
    if let Some(state) = automation_state {
        if !has_modern_automation {
            if let Some(object) = value.as_object_mut() {
                object.insert("automation".to_string(), state);
            }
        }
    }
    if declares_v0 {
        if let Some(object) = value.as_object_mut() {
            object.remove("version");
        }
    }
    migrated
}

/// Parse a save value, applying migration and the version guard.
pub fn parse_save(mut value: Value) -> Result<SaveFormat, SaveError> {
    if let Some(version) = value.get("version").and_then(Value::as_u64) {
        if version > u64::from(SAVE_VERSION) {
            return Err(SaveError::UnsupportedVersion {
                version: version as u32,
            });
        }
    }
    migrate_v0(&mut value);
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn automation_blob() -> Value {
        json!({
            "ids": ["auto-buy"],
            "enabled": [1],
            "lastFiredStep": [-1],
            "cooldownExpiresStep": [-1],
            "unlocked": [1],
            "lastThresholdSatisfied": [0],
        })
    }

    fn base_save(automation: Value) -> Value {
        json!({
            "savedAt": "2024-05-01T00:00:00Z",
            "resources": { "ids": ["energy"], "amounts": [5.0], "capacities": [null] },
            "progression": {
                "resources": { "unlocked": [1], "visible": [1], "flags": [0] },
                "generators": { "ids": [], "levels": [], "enabled": [], "unlocked": [], "visible": [] },
                "upgrades": { "ids": [], "purchases": [], "owned": [] },
            },
            "automation": automation,
            "transforms": { "ids": [], "applied": [], "unlocked": [] },
            "prd": { "ids": [], "counters": [] },
            "commandQueue": { "schemaVersion": 1, "entries": [] },
            "runtime": { "currentStep": 3, "nextExecutableStep": 3, "rngSeed": 42 },
            "contentDigest": "fnv1a-00000000",
        })
    }

    #[test]
    fn v1_save_parses() {
        let save = parse_save(base_save(automation_blob())).unwrap();
        assert_eq!(save.runtime.current_step, 3);
        assert_eq!(save.content_digest, "fnv1a-00000000");
        assert_eq!(save.automation.ids, vec!["auto-buy"]);
    }

    #[test]
    fn future_version_rejected() {
        let mut raw = base_save(automation_blob());
        raw["version"] = json!(2);
        assert!(matches!(
            parse_save(raw),
            Err(SaveError::UnsupportedVersion { version: 2 })
        ));
    }

    #[test]
    fn v0_automation_under_resources_migrates() {
        let mut raw = base_save(json!(null));
        raw.as_object_mut().unwrap().remove("automation");
        raw["version"] = json!(0);
        raw["resources"]["automationState"] = automation_blob();

        let save = parse_save(raw).unwrap();
        assert_eq!(save.automation.ids, vec!["auto-buy"]);
    }

    #[test]
    fn v0_automation_under_progression_resources_migrates() {
        let mut raw = base_save(json!(null));
        raw.as_object_mut().unwrap().remove("automation");
        raw["progression"]["resources"]["automationState"] = automation_blob();

        let save = parse_save(raw).unwrap();
        assert_eq!(save.automation.ids, vec!["auto-buy"]);
    }

    #[test]
    fn v0_blob_in_both_locations_uses_first() {
        let mut raw = base_save(json!(null));
        raw.as_object_mut().unwrap().remove("automation");
        raw["resources"]["automationState"] = automation_blob();
        let mut second = automation_blob();
        second["ids"] = json!(["other"]);
        raw["progression"]["resources"]["automationState"] = second;

        let save = parse_save(raw).unwrap();
        assert_eq!(save.automation.ids, vec!["auto-buy"]);
    }

    #[test]
    fn migration_reports_whether_it_ran() {
        let mut untouched = base_save(automation_blob());
        assert!(!migrate_v0(&mut untouched));

        let mut legacy = base_save(json!(null));
        legacy.as_object_mut().unwrap().remove("automation");
        legacy["resources"]["automationState"] = automation_blob();
        assert!(migrate_v0(&mut legacy));
    }

    #[test]
    fn save_format_round_trips_through_serde() {
        let save = parse_save(base_save(automation_blob())).unwrap();
        let encoded = serde_json::to_value(&save).unwrap();
        // The implicit version is never written.
        assert!(encoded.get("version").is_none());
        let back: SaveFormat = serde_json::from_value(encoded).unwrap();
        assert_eq!(back, save);
    }
}
