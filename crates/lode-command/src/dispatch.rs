//! The command dispatcher: type→handler registry and execution surface.
//!
//! [`execute`](CommandDispatcher::execute) authorizes the command
//! against the policy table, resolves its handler, and runs it with a
//! [`HandlerContext`] borrowing the store bundle, the coordinator, and
//! the RNG. Handlers may enqueue follow-up commands through the
//! context; the dispatcher returns them in the [`ExecutionOutcome`] for
//! the runtime to run within the same step (when due) or re-enqueue.
//! The same surface drives live execution and replay — only the
//! [`ExecutionPhase`] differs.

use indexmap::IndexMap;
use serde_json::Value;

use lode_core::telemetry::TelemetryHandle;
use lode_core::{
    AuthorizationTable, Command, CommandPolicy, ExecutionError, ExecutionPhase, GameRng,
    RejectCode, Step,
};
use lode_progression::{ProgressionCoordinator, ProgressionEvent, Stores};

/// A registered command handler.
///
/// Implemented for plain functions/closures of the matching shape, so
/// registration reads `dispatcher.register("KIND", Box::new(|payload, ctx| ...))`.
pub trait CommandHandler: Send {
    /// Execute against the context. Must not mutate state on failure.
    fn execute(
        &self,
        payload: &Value,
        ctx: &mut HandlerContext<'_, '_>,
    ) -> Result<(), ExecutionError>;
}

impl<F> CommandHandler for F
where
    F: Fn(&Value, &mut HandlerContext<'_, '_>) -> Result<(), ExecutionError> + Send,
{
    fn execute(
        &self,
        payload: &Value,
        ctx: &mut HandlerContext<'_, '_>,
    ) -> Result<(), ExecutionError> {
        self(payload, ctx)
    }
}

/// Borrowed world the dispatcher executes against for one command.
pub struct DispatchContext<'w, 'a> {
    /// The authoritative store bundle.
    pub stores: &'a mut Stores<'w>,
    /// The progression coordinator.
    pub coordinator: &'a mut ProgressionCoordinator,
    /// The simulation RNG.
    pub rng: &'a mut GameRng,
    /// Telemetry handle.
    pub telemetry: &'a TelemetryHandle,
    /// Live execution or replay.
    pub phase: ExecutionPhase,
}

/// Per-command execution context handed to handlers.
pub struct HandlerContext<'w, 'a> {
    /// The authoritative store bundle.
    pub stores: &'a mut Stores<'w>,
    /// The progression coordinator.
    pub coordinator: &'a mut ProgressionCoordinator,
    /// The simulation RNG.
    pub rng: &'a mut GameRng,
    /// Telemetry handle.
    pub telemetry: &'a TelemetryHandle,
    /// Live execution or replay.
    pub phase: ExecutionPhase,
    /// The executing command's step.
    pub step: Step,
    /// The executing command's timestamp (milliseconds).
    pub timestamp: u64,
    followups: &'a mut Vec<Command>,
    events: &'a mut Vec<ProgressionEvent>,
}

impl HandlerContext<'_, '_> {
    /// Enqueue a follow-up command.
    ///
    /// Handlers may only target the current or a later step; an earlier
    /// target is clamped up to the current step.
    pub fn enqueue(&mut self, command: Command) {
        if command.step() < self.step {
            log::warn!(
                target: "lode",
                "handler follow-up {} targeted past step {}, clamping to {}",
                command.kind(),
                command.step(),
                self.step
            );
            // Rebuild at the current step; construction cannot fail
            // because the source command already validated.
            if let Ok(clamped) = Command::new(
                command.kind().to_string(),
                command.priority(),
                command.timestamp(),
                self.step,
                command.payload().clone(),
            ) {
                self.followups.push(clamped);
            }
            return;
        }
        self.followups.push(command);
    }

    /// Publish a progression event with the command's outcome.
    pub fn emit(&mut self, event: ProgressionEvent) {
        self.events.push(event);
    }
}

/// Result of dispatching one command.
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Handler result; `Err` means rejected with no state mutation.
    pub result: Result<(), ExecutionError>,
    /// Follow-up commands the handler enqueued, in emission order.
    pub followups: Vec<Command>,
    /// Progression events the handler emitted.
    pub events: Vec<ProgressionEvent>,
}

impl ExecutionOutcome {
    fn rejected(error: ExecutionError) -> Self {
        Self {
            result: Err(error),
            followups: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Whether the command executed successfully.
    pub fn accepted(&self) -> bool {
        self.result.is_ok()
    }
}

/// Type→handler registry with the authorization policy table.
#[derive(Default)]
pub struct CommandDispatcher {
    handlers: IndexMap<String, Box<dyn CommandHandler>>,
    authorizations: AuthorizationTable,
}

impl CommandDispatcher {
    /// An empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for a command type.
    pub fn register(&mut self, kind: impl Into<String>, handler: Box<dyn CommandHandler>) {
        self.handlers.insert(kind.into(), handler);
    }

    /// Register the authorization policy for a command type.
    pub fn register_policy(&mut self, kind: impl Into<String>, policy: CommandPolicy) {
        self.authorizations.insert(kind, policy);
    }

    /// Whether a handler is wired for a command type.
    ///
    /// The transport uses this for the `COMMAND_UNSUPPORTED` shortcut
    /// before a command ever occupies queue capacity.
    pub fn has_handler(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered command types, in registration order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Authorize and execute one command.
    pub fn execute(&self, command: &Command, ctx: &mut DispatchContext<'_, '_>) -> ExecutionOutcome {
        if !self
            .authorizations
            .authorize(command, ctx.phase, ctx.telemetry.as_ref())
        {
            return ExecutionOutcome::rejected(ExecutionError::new(
                RejectCode::CommandUnauthorized,
                format!(
                    "priority {} may not submit {}",
                    command.priority(),
                    command.kind()
                ),
            ));
        }

        let Some(handler) = self.handlers.get(command.kind()) else {
            return ExecutionOutcome::rejected(ExecutionError::new(
                RejectCode::CommandUnsupported,
                format!("no handler registered for {}", command.kind()),
            ));
        };

        let mut followups = Vec::new();
        let mut events = Vec::new();
        let result = {
            let mut handler_ctx = HandlerContext {
                stores: &mut *ctx.stores,
                coordinator: &mut *ctx.coordinator,
                rng: &mut *ctx.rng,
                telemetry: ctx.telemetry,
                phase: ctx.phase,
                step: command.step(),
                timestamp: command.timestamp(),
                followups: &mut followups,
                events: &mut events,
            };
            handler.execute(command.payload(), &mut handler_ctx)
        };

        ExecutionOutcome {
            result,
            followups,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_content::{ContentPack, NormalizedContentPack, ResourceDef};
    use lode_core::telemetry::{CountingTelemetry, NoopTelemetry};
    use lode_core::CommandPriority;
    use lode_state::{
        AutomationStore, DirtyEpsilon, GeneratorStore, ResourceStore, UpgradeStore,
    };
    use serde_json::json;
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

    fn world() -> World {
        let pack = ContentPack {
            id: "test".into(),
            version: "1".into(),
            resources: vec![ResourceDef {
                id: "energy".into(),
                start_amount: 0.0,
                ..Default::default()
            }],
            ..Default::default()
        };
        let pack = Arc::new(NormalizedContentPack::new(pack).unwrap());
        let telemetry: TelemetryHandle = Arc::new(NoopTelemetry);
        let resources = ResourceStore::new(
            &pack.pack().resources,
            DirtyEpsilon::default(),
            telemetry.clone(),
        )
        .unwrap();
        let generators = GeneratorStore::new(&[]).unwrap();
        let upgrades = UpgradeStore::new(&[]).unwrap();
        let automations = AutomationStore::new(&[]).unwrap();
        let coordinator = ProgressionCoordinator::new(pack, &resources, telemetry.clone()).unwrap();
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

    fn cmd(kind: &str, priority: CommandPriority, step: u64, payload: Value) -> Command {
        Command::new(kind, priority, 1_000, Step(step), payload).unwrap()
    }

    macro_rules! dispatch_ctx {
        ($w:ident, $stores:ident, $phase:expr) => {
            DispatchContext {
                stores: &mut $stores,
                coordinator: &mut $w.coordinator,
                rng: &mut $w.rng,
                telemetry: &$w.telemetry,
                phase: $phase,
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
    fn unregistered_command_is_unsupported() {
        let mut w = world();
        let dispatcher = CommandDispatcher::new();
        let mut stores = stores!(w);
        let mut ctx = dispatch_ctx!(w, stores, ExecutionPhase::Live);
        let outcome = dispatcher.execute(
            &cmd("NOPE", CommandPriority::Player, 0, Value::Null),
            &mut ctx,
        );
        assert_eq!(
            outcome.result.unwrap_err().code,
            RejectCode::CommandUnsupported
        );
    }

    #[test]
    fn handler_mutates_state_through_context() {
        let mut w = world();
        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register(
            "GRANT",
            Box::new(|payload: &Value, ctx: &mut HandlerContext<'_, '_>| {
                let amount = payload["amount"].as_f64().unwrap_or(0.0);
                ctx.stores.resources.add_amount(0, amount).map_err(|_| {
                    ExecutionError::new(RejectCode::InvalidPayload, "bad amount")
                })?;
                Ok(())
            }),
        );

        let mut stores = stores!(w);
        let mut ctx = dispatch_ctx!(w, stores, ExecutionPhase::Live);
        let outcome = dispatcher.execute(
            &cmd("GRANT", CommandPriority::System, 0, json!({ "amount": 7.0 })),
            &mut ctx,
        );
        assert!(outcome.accepted());
        drop(stores);
        assert_eq!(w.resources.amount(0), 7.0);
    }

    #[test]
    fn authorization_denial_short_circuits() {
        let counting = Arc::new(CountingTelemetry::default());
        let mut w = world();
        w.telemetry = counting.clone();
        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register(
            "GRANT",
            Box::new(|_: &Value, _: &mut HandlerContext<'_, '_>| Ok(())),
        );
        dispatcher.register_policy("GRANT", CommandPolicy::only(&[CommandPriority::System]));

        let mut stores = stores!(w);
        let mut ctx = dispatch_ctx!(w, stores, ExecutionPhase::Live);
        let outcome = dispatcher.execute(
            &cmd("GRANT", CommandPriority::Player, 0, Value::Null),
            &mut ctx,
        );
        assert_eq!(
            outcome.result.unwrap_err().code,
            RejectCode::CommandUnauthorized
        );
        assert_eq!(counting.warning_count("CommandUnauthorized"), 1);
    }

    #[test]
    fn followups_are_returned_in_emission_order() {
        let mut w = world();
        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register(
            "CHAIN",
            Box::new(|_: &Value, ctx: &mut HandlerContext<'_, '_>| {
                let step = ctx.step;
                let a =
                    Command::new("FIRST", CommandPriority::System, 0, step, Value::Null).unwrap();
                let b =
                    Command::new("SECOND", CommandPriority::System, 0, step, Value::Null).unwrap();
                ctx.enqueue(a);
                ctx.enqueue(b);
                Ok(())
            }),
        );

        let mut stores = stores!(w);
        let mut ctx = dispatch_ctx!(w, stores, ExecutionPhase::Live);
        let outcome = dispatcher.execute(
            &cmd("CHAIN", CommandPriority::Player, 3, Value::Null),
            &mut ctx,
        );
        assert!(outcome.accepted());
        let kinds: Vec<_> = outcome.followups.iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec!["FIRST", "SECOND"]);
    }

    #[test]
    fn past_step_followups_are_clamped_to_current() {
        let mut w = world();
        let mut dispatcher = CommandDispatcher::new();
        dispatcher.register(
            "CHAIN",
            Box::new(|_: &Value, ctx: &mut HandlerContext<'_, '_>| {
                let past =
                    Command::new("LATE", CommandPriority::System, 0, Step(0), Value::Null).unwrap();
                ctx.enqueue(past);
                Ok(())
            }),
        );

        let mut stores = stores!(w);
        let mut ctx = dispatch_ctx!(w, stores, ExecutionPhase::Live);
        let outcome = dispatcher.execute(
            &cmd("CHAIN", CommandPriority::Player, 5, Value::Null),
            &mut ctx,
        );
        assert_eq!(outcome.followups[0].step(), Step(5));
    }

    #[test]
    fn has_handler_reports_wiring() {
        let mut dispatcher = CommandDispatcher::new();
        assert!(!dispatcher.has_handler("X"));
        dispatcher.register(
            "X",
            Box::new(|_: &Value, _: &mut HandlerContext<'_, '_>| Ok(())),
        );
        assert!(dispatcher.has_handler("X"));
        assert_eq!(dispatcher.kinds().collect::<Vec<_>>(), vec!["X"]);
    }
}
