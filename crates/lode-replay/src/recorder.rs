//! The command recorder.

use lode_core::Command;

use crate::log::{CommandLog, LogMetadata, StateSnapshot, LOG_VERSION};

/// Records executed commands against a starting state snapshot.
///
/// The RNG seed is captured lazily on the first record after
/// construction or [`clear()`](CommandRecorder::clear): the seed that
/// matters for replay is the one in effect when the first recorded
/// command ran, not the one at snapshot time.
pub struct CommandRecorder {
    start_state: StateSnapshot,
    commands: Vec<Command>,
    last_step: i64,
    seed: Option<u64>,
}

impl CommandRecorder {
    /// Start recording from the given state snapshot.
    pub fn new(start_state: StateSnapshot) -> Self {
        Self {
            start_state,
            commands: Vec::new(),
            last_step: -1,
            seed: None,
        }
    }

    /// Record an executed command. `current_rng_seed` is the RNG
    /// seed-state immediately before the command ran.
    pub fn record(&mut self, command: &Command, current_rng_seed: u64) {
        if self.seed.is_none() {
            self.seed = Some(current_rng_seed);
        }
        self.last_step = self.last_step.max(command.step().as_signed());
        self.commands.push(command.clone());
    }

    /// Reset the recorder onto a new starting snapshot.
    pub fn clear(&mut self, new_state: StateSnapshot) {
        self.start_state = new_state;
        self.commands.clear();
        self.last_step = -1;
        self.seed = None;
    }

    /// Export a fresh, independent copy of the log.
    ///
    /// Two exports of identical content are equal but distinct values;
    /// mutating one can never affect the other or the recorder.
    pub fn export(&self) -> CommandLog {
        CommandLog {
            version: LOG_VERSION,
            start_state: self.start_state.clone(),
            commands: self.commands.clone(),
            metadata: LogMetadata {
                last_step: self.last_step,
                seed: self.seed,
            },
        }
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing has been recorded since the last clear.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Highest recorded step, or -1 when empty.
    pub fn last_step(&self) -> i64 {
        self.last_step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_core::{CommandPriority, Step};
    use lode_save::ProgressionBlock;
    use lode_state::{
        SerializedAutomations, SerializedGenerators, SerializedResourceAmounts,
        SerializedResourceProgression, SerializedUpgrades,
    };
    use serde_json::Value;

    fn snapshot(amount: f64) -> StateSnapshot {
        StateSnapshot {
            resources: SerializedResourceAmounts {
                ids: vec!["energy".into()],
                amounts: vec![amount],
                capacities: vec![None],
            },
            progression: ProgressionBlock {
                resources: SerializedResourceProgression {
                    unlocked: vec![1],
                    visible: vec![1],
                    flags: vec![0],
                },
                generators: SerializedGenerators {
                    ids: vec![],
                    levels: vec![],
                    enabled: vec![],
                    unlocked: vec![],
                    visible: vec![],
                },
                upgrades: SerializedUpgrades {
                    ids: vec![],
                    purchases: vec![],
                    owned: vec![],
                },
            },
            automation: SerializedAutomations {
                ids: vec![],
                enabled: vec![],
                last_fired_step: vec![],
                cooldown_expires_step: vec![],
                unlocked: vec![],
                last_threshold_satisfied: vec![],
            },
            transforms: lode_progression::SerializedTransforms {
                ids: vec![],
                applied: vec![],
                unlocked: vec![],
            },
            prd: lode_progression::SerializedPrd {
                ids: vec![],
                counters: vec![],
            },
        }
    }

    fn cmd(step: u64) -> Command {
        Command::new("SET", CommandPriority::Player, 0, Step(step), Value::Null).unwrap()
    }

    #[test]
    fn empty_recorder_exports_empty_log() {
        let recorder = CommandRecorder::new(snapshot(0.0));
        let log = recorder.export();
        assert_eq!(log.version, LOG_VERSION);
        assert!(log.commands.is_empty());
        assert_eq!(log.metadata.last_step, -1);
        assert_eq!(log.metadata.seed, None);
    }

    #[test]
    fn seed_captured_on_first_record_only() {
        let mut recorder = CommandRecorder::new(snapshot(0.0));
        recorder.record(&cmd(0), 111);
        recorder.record(&cmd(1), 222);
        assert_eq!(recorder.export().metadata.seed, Some(111));
    }

    #[test]
    fn last_step_is_the_max_recorded() {
        let mut recorder = CommandRecorder::new(snapshot(0.0));
        recorder.record(&cmd(5), 1);
        recorder.record(&cmd(2), 1);
        assert_eq!(recorder.last_step(), 5);
    }

    #[test]
    fn clear_resets_everything_and_recaptures_seed() {
        let mut recorder = CommandRecorder::new(snapshot(0.0));
        recorder.record(&cmd(3), 111);
        recorder.clear(snapshot(42.0));
        assert!(recorder.is_empty());
        assert_eq!(recorder.last_step(), -1);

        recorder.record(&cmd(7), 999);
        let log = recorder.export();
        assert_eq!(log.metadata.seed, Some(999));
        assert_eq!(log.start_state.resources.amounts, vec![42.0]);
    }

    #[test]
    fn exports_are_independent_copies() {
        let mut recorder = CommandRecorder::new(snapshot(0.0));
        recorder.record(&cmd(1), 1);
        let a = recorder.export();
        let mut b = recorder.export();
        assert_eq!(a, b);
        b.commands.clear();
        assert_eq!(a.commands.len(), 1);
        assert_eq!(recorder.len(), 1);
    }
}
