//! Deterministic replay of a command log.
//!
//! Replay brackets the RNG (restore the recorded seed, execute, leave
//! the advanced state in place), restores the starting snapshot *in
//! place* — the same store instances are reconciled, never replaced, so
//! external references to them stay valid — and re-dispatches every
//! recorded command in order. Handler follow-ups must match the next
//! recorded entries exactly; a mismatch means the handler set drifted
//! from the one that produced the log, which is fatal rather than a
//! silent divergence.

use std::error::Error;
use std::fmt;

use lode_command::{CommandDispatcher, CommandQueue, DispatchContext};
use lode_core::telemetry::TelemetryHandle;
use lode_core::{ExecutionPhase, GameRng, Step};
use lode_progression::{ProgressionCoordinator, Stores};
use lode_state::StateError;

use crate::log::{CommandLog, StateSnapshot};

/// Errors that abort a replay.
#[derive(Debug)]
pub enum ReplayError {
    /// The live command queue still holds entries.
    QueueNotEmpty {
        /// Number of pending commands.
        pending: usize,
    },
    /// A handler enqueued a command the log does not contain at the
    /// expected position.
    MissingEnqueuedCommand {
        /// Index of the command whose handler enqueued the mismatch.
        at_index: usize,
        /// Type of the command the handler enqueued.
        enqueued_kind: String,
    },
    /// The starting snapshot failed to load into the stores.
    StateRestore(StateError),
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueNotEmpty { pending } => {
                write!(f, "Command queue must be empty ({pending} pending)")
            }
            Self::MissingEnqueuedCommand {
                at_index,
                enqueued_kind,
            } => write!(
                f,
                "Replay log is missing a command that was enqueued \
                 ({enqueued_kind} from command {at_index})"
            ),
            Self::StateRestore(e) => write!(f, "replay state restore failed: {e}"),
        }
    }
}

impl Error for ReplayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StateRestore(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StateError> for ReplayError {
    fn from(e: StateError) -> Self {
        Self::StateRestore(e)
    }
}

/// Borrowed world replay executes against.
pub struct ReplayWorld<'w, 'a> {
    /// The authoritative store bundle.
    pub stores: &'a mut Stores<'w>,
    /// The progression coordinator.
    pub coordinator: &'a mut ProgressionCoordinator,
    /// The simulation RNG.
    pub rng: &'a mut GameRng,
    /// Telemetry handle.
    pub telemetry: &'a TelemetryHandle,
}

/// Result of a completed replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Commands re-dispatched.
    pub executed: usize,
    /// Commands whose handler rejected during replay (recorded as
    /// `ReplayExecutionFailed`, then skipped).
    pub failed: usize,
    /// Step the runtime should resume at: `lastStep + 1`.
    pub next_step: Step,
}

/// Restore a state snapshot into the live stores, in place.
pub fn restore_state(
    snapshot: &StateSnapshot,
    stores: &mut Stores<'_>,
    coordinator: &mut ProgressionCoordinator,
) -> Result<(), StateError> {
    stores.resources.load_amounts(&snapshot.resources)?;
    stores
        .resources
        .load_progression(&snapshot.progression.resources)?;
    stores
        .generators
        .load_from_save(&snapshot.progression.generators)?;
    stores
        .upgrades
        .load_from_save(&snapshot.progression.upgrades)?;
    stores.automations.load_from_save(&snapshot.automation)?;
    coordinator.load_transforms(&snapshot.transforms);
    coordinator.load_prd(&snapshot.prd);
    coordinator.recompute_effects(stores);
    Ok(())
}

/// Replay a command log against a live world.
///
/// Preconditions: `queue` must be empty. On success the caller should
/// set its step counters to [`ReplaySummary::next_step`].
pub fn replay(
    log: &CommandLog,
    dispatcher: &CommandDispatcher,
    queue: &mut CommandQueue,
    world: &mut ReplayWorld<'_, '_>,
) -> Result<ReplaySummary, ReplayError> {
    if !queue.is_empty() {
        return Err(ReplayError::QueueNotEmpty {
            pending: queue.len(),
        });
    }

    // 1. RNG bracket: restore the seed recorded at first record.
    if let Some(seed) = log.metadata.seed {
        world.rng.reseed(seed);
    }

    // 2. In-place state restore.
    restore_state(&log.start_state, world.stores, world.coordinator)?;

    // 3. Re-dispatch in order, checking follow-up equivalence.
    let mut executed = 0usize;
    let mut failed = 0usize;
    for (index, command) in log.commands.iter().enumerate() {
        let outcome = {
            let mut ctx = DispatchContext {
                stores: &mut *world.stores,
                coordinator: &mut *world.coordinator,
                rng: &mut *world.rng,
                telemetry: world.telemetry,
                phase: ExecutionPhase::Replay,
            };
            dispatcher.execute(command, &mut ctx)
        };

        // Every command a handler enqueued live was executed (and
        // recorded) immediately after it, so it must appear next in
        // the log — the replayed follow-ups themselves are executed by
        // this loop when it reaches those entries.
        for (offset, followup) in outcome.followups.iter().enumerate() {
            match log.commands.get(index + 1 + offset) {
                Some(recorded) if recorded == followup => {}
                _ => {
                    return Err(ReplayError::MissingEnqueuedCommand {
                        at_index: index,
                        enqueued_kind: followup.kind().to_string(),
                    });
                }
            }
        }

        executed += 1;
        if let Err(e) = outcome.result {
            failed += 1;
            world.telemetry.record_error(
                "ReplayExecutionFailed",
                Some(&serde_json::json!({ "type": command.kind(), "code": e.code.as_str() })),
            );
        }
    }

    let next_step = Step(u64::try_from(log.metadata.last_step + 1).unwrap_or(0));
    Ok(ReplaySummary {
        executed,
        failed,
        next_step,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::CommandRecorder;
    use lode_command::HandlerContext;
    use lode_content::{ContentPack, NormalizedContentPack, ResourceDef};
    use lode_core::telemetry::{CountingTelemetry, NoopTelemetry};
    use lode_core::{Command, CommandPriority, ExecutionError, RejectCode};
    use lode_save::ProgressionBlock;
    use lode_state::{
        AutomationStore, DirtyEpsilon, GeneratorStore, ResourceStore, UpgradeStore,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;

    struct World {
        resources: ResourceStore,
        generators: GeneratorStore,
        upgrades: UpgradeStore,
        automations: AutomationStore,
        coordinator: ProgressionCoordinator,
        rng: GameRng,
        telemetry: TelemetryHandle,
    }

    fn world(telemetry: TelemetryHandle) -> World {
        let pack = ContentPack {
            id: "test".into(),
            version: "1".into(),
            resources: vec![ResourceDef {
                id: "value".into(),
                start_amount: 0.0,
                ..Default::default()
            }],
            ..Default::default()
        };
        let pack = Arc::new(NormalizedContentPack::new(pack).unwrap());
        let resources = ResourceStore::new(
            &pack.pack().resources,
            DirtyEpsilon::default(),
            telemetry.clone(),
        )
        .unwrap();
        let generators = GeneratorStore::new(&[]).unwrap();
        let upgrades = UpgradeStore::new(&[]).unwrap();
        let automations = AutomationStore::new(&[]).unwrap();
        let coordinator =
            ProgressionCoordinator::new(pack, &resources, telemetry.clone()).unwrap();
        World {
            resources,
            generators,
            upgrades,
            automations,
            coordinator,
            rng: GameRng::new(42),
            telemetry,
        }
    }

    impl World {
        fn snapshot(&self) -> StateSnapshot {
            StateSnapshot {
                resources: self.resources.export_amounts(),
                progression: ProgressionBlock {
                    resources: self.resources.export_progression(),
                    generators: self.generators.export_for_save(),
                    upgrades: self.upgrades.export_for_save(),
                },
                automation: self.automations.export_for_save(),
                transforms: self.coordinator.export_transforms(),
                prd: self.coordinator.export_prd(),
            }
        }
    }

    fn set_dispatcher() -> CommandDispatcher {
        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register(
            "SET",
            Box::new(|payload: &Value, ctx: &mut HandlerContext<'_, '_>| {
                let value = payload["value"].as_f64().ok_or_else(|| {
                    ExecutionError::new(RejectCode::InvalidPayload, "value required")
                })?;
                ctx.stores
                    .resources
                    .set_amount(0, value)
                    .map_err(|_| ExecutionError::new(RejectCode::InvalidPayload, "bad value"))
            }),
        );
        dispatcher
    }

    fn set_cmd(value: f64, step: u64) -> Command {
        Command::new(
            "SET",
            CommandPriority::Player,
            1_000,
            Step(step),
            json!({ "value": value }),
        )
        .unwrap()
    }

    macro_rules! replay_world {
        ($w:ident, $stores:ident) => {
            ReplayWorld {
                stores: &mut $stores,
                coordinator: &mut $w.coordinator,
                rng: &mut $w.rng,
                telemetry: &$w.telemetry,
            }
        };
    }

    macro_rules! stores {
        ($w:ident) => {
            Stores {
                resources: &mut $w.resources,
                generators: &mut $w.generators,
                upgrades: &mut $w.upgrades,
                automations: &mut $w.automations,
            }
        };
    }

    #[test]
    fn replay_restores_state_and_reapplies_commands() {
        let mut w = world(Arc::new(NoopTelemetry));
        let dispatcher = set_dispatcher();

        // Record a SET value=42 at step 5 against the initial state.
        let mut recorder = CommandRecorder::new(w.snapshot());
        let cmd = set_cmd(42.0, 5);
        recorder.record(&cmd, w.rng.seed());
        let log = recorder.export();

        // Diverge the live state.
        w.resources.set_amount(0, 999.0).unwrap();

        let mut queue = CommandQueue::new(16);
        let mut stores = stores!(w);
        let mut rw = replay_world!(w, stores);
        let summary = replay(&log, &dispatcher, &mut queue, &mut rw).unwrap();
        drop(stores);

        assert_eq!(w.resources.amount(0), 42.0);
        assert_eq!(summary.executed, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.next_step, Step(6));
    }

    #[test]
    fn replay_requires_empty_queue() {
        let mut w = world(Arc::new(NoopTelemetry));
        let dispatcher = set_dispatcher();
        let log = CommandRecorder::new(w.snapshot()).export();

        let mut queue = CommandQueue::new(16);
        queue.enqueue(set_cmd(1.0, 0)).unwrap();

        let mut stores = stores!(w);
        let mut rw = replay_world!(w, stores);
        let err = replay(&log, &dispatcher, &mut queue, &mut rw).unwrap_err();
        assert!(err.to_string().starts_with("Command queue must be empty"));
    }

    #[test]
    fn replay_restores_rng_seed() {
        let mut w = world(Arc::new(NoopTelemetry));
        let dispatcher = set_dispatcher();

        let mut recorder = CommandRecorder::new(w.snapshot());
        recorder.record(&set_cmd(1.0, 0), 777);
        let log = recorder.export();

        // Advance the RNG far away from the recorded seed.
        for _ in 0..10 {
            w.rng.next_u64();
        }

        let mut queue = CommandQueue::new(16);
        let mut stores = stores!(w);
        let mut rw = replay_world!(w, stores);
        replay(&log, &dispatcher, &mut queue, &mut rw).unwrap();
        drop(stores);
        // The SET handler draws nothing, so the seed is exactly the
        // recorded one afterwards.
        assert_eq!(w.rng.seed(), 777);
    }

    #[test]
    fn handler_rejection_logs_and_continues() {
        let telemetry = Arc::new(CountingTelemetry::default());
        let mut w = world(telemetry.clone());
        let dispatcher = set_dispatcher();

        let mut recorder = CommandRecorder::new(w.snapshot());
        // Payload missing "value": the handler rejects during replay.
        let bad = Command::new(
            "SET",
            CommandPriority::Player,
            0,
            Step(1),
            json!({ "wrong": 1 }),
        )
        .unwrap();
        recorder.record(&bad, w.rng.seed());
        recorder.record(&set_cmd(7.0, 2), w.rng.seed());
        let log = recorder.export();

        let mut queue = CommandQueue::new(16);
        let mut stores = stores!(w);
        let mut rw = replay_world!(w, stores);
        let summary = replay(&log, &dispatcher, &mut queue, &mut rw).unwrap();
        drop(stores);

        assert_eq!(summary.executed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(telemetry.error_count("ReplayExecutionFailed"), 1);
        // The second command still ran.
        assert_eq!(w.resources.amount(0), 7.0);
        assert_eq!(summary.next_step, Step(3));
    }

    #[test]
    fn followup_matching_log_entry_passes() {
        let telemetry: TelemetryHandle = Arc::new(NoopTelemetry);
        let mut w = world(telemetry);
        let mut dispatcher = set_dispatcher();
        dispatcher.register(
            "CHAIN",
            Box::new(|_: &Value, ctx: &mut HandlerContext<'_, '_>| {
                let follow = Command::new(
                    "SET",
                    CommandPriority::System,
                    1_000,
                    ctx.step,
                    json!({ "value": 5.0 }),
                )
                .unwrap();
                ctx.enqueue(follow);
                Ok(())
            }),
        );

        let chain =
            Command::new("CHAIN", CommandPriority::Player, 1_000, Step(0), Value::Null).unwrap();
        let follow = Command::new(
            "SET",
            CommandPriority::System,
            1_000,
            Step(0),
            json!({ "value": 5.0 }),
        )
        .unwrap();

        let mut recorder = CommandRecorder::new(w.snapshot());
        recorder.record(&chain, w.rng.seed());
        recorder.record(&follow, w.rng.seed());
        let log = recorder.export();

        let mut queue = CommandQueue::new(16);
        let mut stores = stores!(w);
        let mut rw = replay_world!(w, stores);
        let summary = replay(&log, &dispatcher, &mut queue, &mut rw).unwrap();
        drop(stores);
        assert_eq!(summary.executed, 2);
        assert_eq!(w.resources.amount(0), 5.0);
    }

    #[test]
    fn missing_followup_in_log_is_fatal() {
        let telemetry: TelemetryHandle = Arc::new(NoopTelemetry);
        let mut w = world(telemetry);
        let mut dispatcher = set_dispatcher();
        dispatcher.register(
            "CHAIN",
            Box::new(|_: &Value, ctx: &mut HandlerContext<'_, '_>| {
                let follow = Command::new(
                    "SET",
                    CommandPriority::System,
                    1_000,
                    ctx.step,
                    json!({ "value": 5.0 }),
                )
                .unwrap();
                ctx.enqueue(follow);
                Ok(())
            }),
        );

        // The log records CHAIN but NOT its follow-up: a handler-set
        // drift scenario.
        let chain =
            Command::new("CHAIN", CommandPriority::Player, 1_000, Step(0), Value::Null).unwrap();
        let mut recorder = CommandRecorder::new(w.snapshot());
        recorder.record(&chain, w.rng.seed());
        let log = recorder.export();

        let mut queue = CommandQueue::new(16);
        let mut stores = stores!(w);
        let mut rw = replay_world!(w, stores);
        let err = replay(&log, &dispatcher, &mut queue, &mut rw).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Replay log is missing a command that was enqueued"));
    }

    #[test]
    fn replay_twice_is_idempotent() {
        let mut w = world(Arc::new(NoopTelemetry));
        let dispatcher = set_dispatcher();
        let mut recorder = CommandRecorder::new(w.snapshot());
        recorder.record(&set_cmd(13.0, 2), w.rng.seed());
        let log = recorder.export();

        for _ in 0..2 {
            let mut queue = CommandQueue::new(16);
            let mut stores = stores!(w);
            let mut rw = replay_world!(w, stores);
            let summary = replay(&log, &dispatcher, &mut queue, &mut rw).unwrap();
            assert_eq!(summary.next_step, Step(3));
        }
        assert_eq!(w.resources.amount(0), 13.0);
    }
}
