//! The runtime: fixed-step tick loop over the authoritative world.
//!
//! A tick accumulates elapsed wall time and executes whole steps until
//! the accumulator drains or the per-frame step budget is hit; the
//! remainder carries to the next call (capped — time beyond the cap is
//! discarded and reported as dropped frames). Each step is indivisible:
//! drain due commands → dispatch → progression update → event
//! collection. Snapshot publication happens once per tick, after the
//! last step, so consumers see whole-tick generations.
//!
//! The runtime exclusively owns the stores; command handlers are the
//! only code that mutates them, recorded by the command recorder for
//! deterministic replay.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use lode_command::{
    CommandDispatcher, CommandQueue, DispatchContext, SchemaRegistry,
};
use lode_content::NormalizedContentPack;
use lode_core::telemetry::TelemetryHandle;
use lode_core::{Command, ExecutionPhase, GameRng, Step};
use lode_progression::{ProgressionCoordinator, ProgressionEvent, Stores};
use lode_proto::server::{CommandSink, TransportConfig, TransportResponse, TransportServer};
use lode_proto::OutcomeResponse;
use lode_replay::{
    CommandLog, CommandRecorder, ReplayError, ReplaySummary, ReplayWorld, StateSnapshot,
};
use lode_save::{
    parse_save, to_canonical_json, ProgressionBlock, RuntimeBlock, SaveError, SaveFormat,
};
use lode_state::{
    AutomationStore, GeneratorStore, ResourceStore, TransportBufferPool, TransportPoolConfig,
    UpgradeStore,
};

use crate::config::{ConfigError, RuntimeConfig, Systems};
use crate::events::{EventBus, EventBusConfig, Subscriber};
use crate::frame::Frame;
use crate::handlers::register_builtin;
use crate::metrics::{RuntimeCounters, TickMetrics};

/// Accumulator cap, in multiples of one full frame budget. Time beyond
/// `step_size × max_steps_per_frame × CAP` is discarded as dropped
/// frames rather than producing an unbounded catch-up burst.
const ACCUMULATOR_CAP_FRAMES: f64 = 4.0;

/// Depth bound for same-step follow-up chains; deeper chains defer to
/// the queue.
const MAX_FOLLOWUP_DEPTH: usize = 32;

/// Result of one tick call.
#[derive(Debug)]
pub struct TickOutcome {
    /// Published frames (at most one; empty when no step executed).
    pub frames: Vec<Frame>,
    /// Steps discarded by the accumulator cap during this call.
    pub dropped_frames: u64,
    /// Next step the runtime will execute.
    pub next_step: Step,
}

/// The deterministic simulation runtime.
pub struct Runtime {
    pack: Arc<NormalizedContentPack>,
    step_size_ms: u64,
    max_steps_per_frame: u32,
    scheduler_interval_ms: u64,
    systems: Systems,

    resources: ResourceStore,
    generators: GeneratorStore,
    upgrades: UpgradeStore,
    automations: AutomationStore,
    coordinator: ProgressionCoordinator,

    dispatcher: CommandDispatcher,
    schemas: SchemaRegistry,
    queue: CommandQueue,
    recorder: CommandRecorder,
    transport: TransportServer,
    bus: EventBus,
    pool: TransportBufferPool,
    rng: GameRng,
    telemetry: TelemetryHandle,

    current_step: Step,
    next_executable_step: Step,
    accumulator_ms: f64,
    saved_at: Option<String>,
    counters: RuntimeCounters,
    last_metrics: TickMetrics,
}

impl Runtime {
    /// Construct a runtime from a validated configuration.
    pub fn new(config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let telemetry = lode_core::telemetry();
        let pack = Arc::new(config.content_pack);
        let epsilon = config.precision.normalized();

        let resources =
            ResourceStore::new(&pack.pack().resources, epsilon, telemetry.clone())?;
        let generators = GeneratorStore::new(&pack.pack().generators)?;
        let upgrades = UpgradeStore::new(&pack.pack().upgrades)?;
        let automations = AutomationStore::new(&pack.pack().automations)?;
        let coordinator =
            ProgressionCoordinator::new(pack.clone(), &resources, telemetry.clone())?;

        let mut dispatcher = CommandDispatcher::new();
        let mut schemas = SchemaRegistry::new();
        register_builtin(&mut dispatcher, &mut schemas, config.systems);

        let seed = config
            .rng_seed
            .unwrap_or_else(|| seed_from_digest(pack.digest()));

        let recorder = CommandRecorder::new(snapshot_of(
            &resources,
            &generators,
            &upgrades,
            &automations,
            &coordinator,
        ));

        Ok(Self {
            step_size_ms: config.step_size_ms,
            max_steps_per_frame: config.max_steps_per_frame,
            scheduler_interval_ms: config
                .scheduler
                .resolved_interval_ms(config.step_size_ms),
            systems: config.systems,
            queue: CommandQueue::new(config.limits.max_command_queue_size),
            transport: TransportServer::new(TransportConfig::default()),
            bus: EventBus::new(EventBusConfig::default(), telemetry.clone()),
            pool: TransportBufferPool::new(TransportPoolConfig::default(), telemetry.clone()),
            rng: GameRng::new(seed),
            current_step: Step(0),
            next_executable_step: Step(0),
            accumulator_ms: 0.0,
            saved_at: None,
            counters: RuntimeCounters::default(),
            last_metrics: TickMetrics::default(),
            resources,
            generators,
            upgrades,
            automations,
            coordinator,
            dispatcher,
            schemas,
            recorder,
            telemetry,
            pack,
        })
    }

    // ── Accessors ─────────────────────────────────────────────

    /// The configured step size in milliseconds.
    pub fn step_size_ms(&self) -> u64 {
        self.step_size_ms
    }

    /// The resolved scheduler interval for the worker host.
    pub fn scheduler_interval_ms(&self) -> u64 {
        self.scheduler_interval_ms
    }

    /// The step the runtime will execute next.
    pub fn current_step(&self) -> Step {
        self.current_step
    }

    /// Next step eligible for command execution (tracks `current_step`).
    pub fn next_executable_step(&self) -> Step {
        self.next_executable_step
    }

    /// Number of commands waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// The loaded content pack.
    pub fn pack(&self) -> &NormalizedContentPack {
        &self.pack
    }

    /// Lifetime counters.
    pub fn counters(&self) -> &RuntimeCounters {
        &self.counters
    }

    /// Metrics from the most recent tick call.
    pub fn last_metrics(&self) -> &TickMetrics {
        &self.last_metrics
    }

    /// Read access to the resource store.
    pub fn resources(&self) -> &ResourceStore {
        &self.resources
    }

    /// Read access to the generator store.
    pub fn generators(&self) -> &GeneratorStore {
        &self.generators
    }

    /// Read access to the upgrade store.
    pub fn upgrades(&self) -> &UpgradeStore {
        &self.upgrades
    }

    /// Read access to the automation store.
    pub fn automations(&self) -> &AutomationStore {
        &self.automations
    }

    /// The progression coordinator (quotes, status queries).
    pub fn coordinator(&self) -> &ProgressionCoordinator {
        &self.coordinator
    }

    /// Subscribe to a runtime event channel.
    pub fn subscribe(&mut self, channel: impl Into<String>, subscriber: Subscriber) {
        self.bus.subscribe(channel, subscriber);
    }

    // ── Command intake ────────────────────────────────────────

    /// Enqueue a pre-validated command directly (worker bridge and
    /// tests; transport clients go through [`handle_envelope`]).
    ///
    /// [`handle_envelope`]: Runtime::handle_envelope
    pub fn enqueue_command(
        &mut self,
        command: Command,
    ) -> Result<(), lode_core::ExecutionError> {
        self.queue.enqueue(command)
    }

    /// Validate a transport envelope and enqueue its command.
    pub fn handle_envelope(&mut self, envelope: &Value) -> TransportResponse {
        let mut sink = RuntimeSink {
            dispatcher: &self.dispatcher,
            schemas: &self.schemas,
            queue: &mut self.queue,
            step: self.next_executable_step,
        };
        self.transport.handle_envelope(envelope, &mut sink)
    }

    /// Drain resolved transport outcomes for subscribers.
    pub fn drain_outcome_responses(&mut self) -> Vec<OutcomeResponse> {
        self.transport.drain_outcome_responses()
    }

    /// Expire pending transport envelopes older than their timeout.
    pub fn expire_transport(&mut self, now_ms: u64) -> usize {
        self.transport.expire_pending(now_ms)
    }

    // ── Tick loop ─────────────────────────────────────────────

    /// Advance simulated time by `delta_ms`.
    pub fn tick(&mut self, delta_ms: f64) -> TickOutcome {
        let tick_start = Instant::now();
        let mut metrics = TickMetrics::default();

        if delta_ms.is_finite() && delta_ms > 0.0 {
            self.accumulator_ms += delta_ms;
        }

        // Cap the accumulator; excess becomes dropped frames.
        let step_size = self.step_size_ms as f64;
        let cap = step_size * f64::from(self.max_steps_per_frame) * ACCUMULATOR_CAP_FRAMES;
        if self.accumulator_ms > cap {
            let dropped = ((self.accumulator_ms - cap) / step_size).floor() as u64;
            if dropped > 0 {
                self.accumulator_ms -= dropped as f64 * step_size;
                metrics.dropped_frames += dropped;
                self.counters.dropped_frames += dropped;
            }
        }

        let mut steps = 0u32;
        while self.accumulator_ms >= step_size && steps < self.max_steps_per_frame {
            let step = self.next_executable_step;
            self.run_step(step, &mut metrics);
            self.current_step = step.next();
            self.next_executable_step = self.current_step;
            self.accumulator_ms -= step_size;
            steps += 1;
        }
        metrics.steps_executed = steps;
        self.counters.steps += u64::from(steps);

        self.telemetry.record_tick();
        let frames = self.publish_frame(steps, &mut metrics);
        self.bus.dispatch();

        metrics.total_us = tick_start.elapsed().as_micros() as u64;
        let dropped_frames = metrics.dropped_frames;
        self.last_metrics = metrics;
        TickOutcome {
            frames,
            dropped_frames,
            next_step: self.next_executable_step,
        }
    }

    /// Advance `ms` of simulated time with no per-frame step budget.
    ///
    /// Used for offline catch-up; publishes a single frame at the end.
    pub fn fast_forward(&mut self, ms: f64) -> TickOutcome {
        let tick_start = Instant::now();
        let mut metrics = TickMetrics::default();

        if ms.is_finite() && ms > 0.0 {
            self.accumulator_ms += ms;
        }
        let step_size = self.step_size_ms as f64;
        let mut steps = 0u32;
        while self.accumulator_ms >= step_size {
            let step = self.next_executable_step;
            self.run_step(step, &mut metrics);
            self.current_step = step.next();
            self.next_executable_step = self.current_step;
            self.accumulator_ms -= step_size;
            steps = steps.saturating_add(1);
        }
        metrics.steps_executed = steps;
        self.counters.steps += u64::from(steps);

        self.telemetry.record_tick();
        let frames = self.publish_frame(steps, &mut metrics);
        self.bus.dispatch();

        metrics.total_us = tick_start.elapsed().as_micros() as u64;
        let dropped_frames = metrics.dropped_frames;
        self.last_metrics = metrics;
        TickOutcome {
            frames,
            dropped_frames,
            next_step: self.next_executable_step,
        }
    }

    /// Execute one step: drain due commands, dispatch, run the
    /// progression update, buffer events.
    fn run_step(&mut self, step: Step, metrics: &mut TickMetrics) {
        for command in self.queue.drain_due(step) {
            self.execute_and_record(&command, 0, metrics);
        }

        let step_timestamp_ms = step.0.saturating_mul(self.step_size_ms);
        let update = {
            let mut stores = Stores {
                resources: &mut self.resources,
                generators: &mut self.generators,
                upgrades: &mut self.upgrades,
                automations: &mut self.automations,
            };
            self.coordinator
                .update_for_step(step, step_timestamp_ms, &mut stores)
        };

        for event in update.events {
            self.publish_progression_event(event, step);
        }
        if self.systems.automation {
            for command in update.commands {
                if let Err(e) = self.queue.enqueue(command) {
                    self.telemetry.record_warning(
                        "AutomationCommandDropped",
                        Some(&serde_json::json!({ "error": e.to_string() })),
                    );
                }
            }
        }
    }

    /// Record and dispatch one command, running due follow-ups
    /// depth-first so the recorded order matches execution order.
    fn execute_and_record(&mut self, command: &Command, depth: usize, metrics: &mut TickMetrics) {
        self.recorder.record(command, self.rng.seed());

        let outcome = {
            let mut stores = Stores {
                resources: &mut self.resources,
                generators: &mut self.generators,
                upgrades: &mut self.upgrades,
                automations: &mut self.automations,
            };
            let mut ctx = DispatchContext {
                stores: &mut stores,
                coordinator: &mut self.coordinator,
                rng: &mut self.rng,
                telemetry: &self.telemetry,
                phase: ExecutionPhase::Live,
            };
            self.dispatcher.execute(command, &mut ctx)
        };

        match &outcome.result {
            Ok(()) => {
                metrics.commands_executed += 1;
                self.counters.commands_executed += 1;
            }
            Err(_) => {
                metrics.commands_rejected += 1;
                self.counters.commands_rejected += 1;
            }
        }

        if let Some(request_id) = command.request_id() {
            let result = match &outcome.result {
                Ok(()) => Ok(()),
                Err(e) => Err(e),
            };
            self.transport.resolve_outcome(request_id, result);
        }

        for event in outcome.events {
            self.publish_progression_event(event, command.step());
        }

        for followup in outcome.followups {
            if followup.step() <= command.step() && depth < MAX_FOLLOWUP_DEPTH {
                self.execute_and_record(&followup, depth + 1, metrics);
            } else if let Err(e) = self.queue.enqueue(followup) {
                self.telemetry.record_warning(
                    "FollowupCommandDropped",
                    Some(&serde_json::json!({ "error": e.to_string() })),
                );
            }
        }
    }

    fn publish_progression_event(&mut self, event: ProgressionEvent, step: Step) {
        let data = serde_json::to_value(&event).unwrap_or(Value::Null);
        self.bus
            .publish(event.channel(), event.name(), step, data);
    }

    /// Flip the store snapshots and pack the dirty rows into a frame.
    fn publish_frame(&mut self, steps: u32, metrics: &mut TickMetrics) -> Vec<Frame> {
        if steps == 0 {
            return Vec::new();
        }
        let publish_start = Instant::now();
        let published_step = Step(self.current_step.0.saturating_sub(1));
        let rsnap = self.resources.snapshot();
        let gsnap = self.generators.snapshot();
        let frame = Frame::assemble(published_step, "runtime", &rsnap, &gsnap, &mut self.pool);
        // Upgrade/automation deltas ride progression events rather than
        // frame columns; their dirty sets just reset here.
        self.upgrades.clear_dirty();
        self.automations.clear_dirty();
        metrics.snapshot_publish_us = publish_start.elapsed().as_micros() as u64;

        match frame {
            Ok(frame) => {
                self.counters.frames_published += 1;
                vec![frame]
            }
            Err(_) => Vec::new(), // pool exhaustion already reported
        }
    }

    /// Return a frame's buffers to the transport pool.
    pub fn release_frame(&mut self, frame: Frame) {
        self.pool
            .release(frame.resources.lease_id, frame.resources.indices, frame.resources.values);
        self.pool.release(
            frame.generators.lease_id,
            frame.generators.indices,
            frame.generators.values,
        );
    }

    // ── Save / hydrate ────────────────────────────────────────

    /// Serialize the runtime to a v1 save.
    pub fn serialize(&self) -> SaveFormat {
        SaveFormat {
            saved_at: self.saved_at.clone().unwrap_or_else(now_iso8601),
            version: None,
            resources: self.resources.export_amounts(),
            progression: ProgressionBlock {
                resources: self.resources.export_progression(),
                generators: self.generators.export_for_save(),
                upgrades: self.upgrades.export_for_save(),
            },
            automation: self.automations.export_for_save(),
            transforms: self.coordinator.export_transforms(),
            prd: self.coordinator.export_prd(),
            command_queue: self.queue.export_for_save(),
            runtime: RuntimeBlock {
                current_step: self.current_step.0,
                next_executable_step: self.next_executable_step.0,
                rng_seed: self.rng.seed(),
            },
            content_digest: self.pack.digest().to_string(),
        }
    }

    /// Serialize to the canonical byte representation.
    pub fn serialize_canonical(&self) -> Result<String, SaveError> {
        use serde::de::Error as _;
        let value = serde_json::to_value(self.serialize())?;
        to_canonical_json(&value)
            .map_err(|e| SaveError::Parse(serde_json::Error::custom(e.to_string())))
    }

    /// Hydrate from a raw save value.
    ///
    /// Rejects newer versions, digest mismatches, and saves behind the
    /// running runtime's step. On success the queue, stores, RNG, and
    /// step counters are replaced and the recorder restarts from the
    /// hydrated state.
    pub fn hydrate(&mut self, value: Value) -> Result<Step, SaveError> {
        let save = parse_save(value)?;

        if save.content_digest != self.pack.digest() {
            return Err(SaveError::DigestMismatch {
                expected: self.pack.digest().to_string(),
                found: save.content_digest,
            });
        }
        if save.runtime.current_step < self.current_step.0 {
            return Err(SaveError::StepRegression {
                save_step: save.runtime.current_step,
                runtime_step: self.current_step.0,
            });
        }

        self.queue.clear();
        {
            let schemas = &self.schemas;
            self.queue
                .import_from_save(&save.command_queue, |command| {
                    schemas.validate(command.kind(), command.payload())
                })?;
        }

        self.resources.load_amounts(&save.resources)?;
        self.resources
            .load_progression(&save.progression.resources)?;
        self.generators
            .load_from_save(&save.progression.generators)?;
        self.upgrades.load_from_save(&save.progression.upgrades)?;
        self.automations.load_from_save(&save.automation)?;
        self.coordinator.load_transforms(&save.transforms);
        self.coordinator.load_prd(&save.prd);
        {
            let mut stores = Stores {
                resources: &mut self.resources,
                generators: &mut self.generators,
                upgrades: &mut self.upgrades,
                automations: &mut self.automations,
            };
            self.coordinator.recompute_effects(&mut stores);
        }

        self.rng.rebase(save.runtime.rng_seed);
        self.current_step = Step(save.runtime.current_step);
        self.next_executable_step = Step(
            save.runtime
                .next_executable_step
                .max(save.runtime.current_step),
        );
        self.accumulator_ms = 0.0;
        self.saved_at = Some(save.saved_at.clone());
        self.recorder.clear(self.state_snapshot());
        Ok(self.next_executable_step)
    }

    // ── Recording / replay ────────────────────────────────────

    /// Snapshot the current state in the recorder's format.
    pub fn state_snapshot(&self) -> StateSnapshot {
        snapshot_of(
            &self.resources,
            &self.generators,
            &self.upgrades,
            &self.automations,
            &self.coordinator,
        )
    }

    /// Export the command log recorded since the last clear.
    pub fn export_log(&self) -> CommandLog {
        self.recorder.export()
    }

    /// Restart recording from the current state.
    pub fn clear_log(&mut self) {
        let snapshot = self.state_snapshot();
        self.recorder.clear(snapshot);
    }

    /// Replay a command log against this runtime.
    ///
    /// The queue must be empty. On success the step counters advance to
    /// `lastStep + 1`.
    pub fn replay(&mut self, log: &CommandLog) -> Result<ReplaySummary, ReplayError> {
        let summary = {
            let mut stores = Stores {
                resources: &mut self.resources,
                generators: &mut self.generators,
                upgrades: &mut self.upgrades,
                automations: &mut self.automations,
            };
            let mut world = ReplayWorld {
                stores: &mut stores,
                coordinator: &mut self.coordinator,
                rng: &mut self.rng,
                telemetry: &self.telemetry,
            };
            lode_replay::replay(log, &self.dispatcher, &mut self.queue, &mut world)?
        };
        self.current_step = summary.next_step;
        self.next_executable_step = summary.next_step;
        Ok(summary)
    }
}

/// Transport sink over the runtime's disjoint parts.
struct RuntimeSink<'a> {
    dispatcher: &'a CommandDispatcher,
    schemas: &'a SchemaRegistry,
    queue: &'a mut CommandQueue,
    step: Step,
}

impl CommandSink for RuntimeSink<'_> {
    fn has_handler(&self, kind: &str) -> bool {
        self.dispatcher.has_handler(kind)
    }

    fn validate_payload(&self, kind: &str, payload: &Value) -> Result<(), String> {
        self.schemas.validate(kind, payload)
    }

    fn enqueue(&mut self, command: Command) -> Result<(), lode_core::ExecutionError> {
        self.queue.enqueue(command)
    }

    fn current_step(&self) -> Step {
        self.step
    }
}

/// Deterministic default seed derived from the content digest
/// (64-bit FNV-1a over the digest string).
fn seed_from_digest(digest: &str) -> u64 {
    digest.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01B3)
    })
}

/// Current wall-clock time as ISO 8601 (UTC).
fn now_iso8601() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn snapshot_of(
    resources: &ResourceStore,
    generators: &GeneratorStore,
    upgrades: &UpgradeStore,
    automations: &AutomationStore,
    coordinator: &ProgressionCoordinator,
) -> StateSnapshot {
    StateSnapshot {
        resources: resources.export_amounts(),
        progression: ProgressionBlock {
            resources: resources.export_progression(),
            generators: generators.export_for_save(),
            upgrades: upgrades.export_for_save(),
        },
        automation: automations.export_for_save(),
        transforms: coordinator.export_transforms(),
        prd: coordinator.export_prd(),
    }
}
