//! The progression coordinator: gate evaluation, production, automation
//! firing, and the sanctioned progression mutators.
//!
//! # Step update phases
//!
//! [`update_for_step`](ProgressionCoordinator::update_for_step) runs
//! three phases in a fixed order, each observing the writes of the
//! previous one:
//!
//! 1. **Gates** — every unlock/visibility/prestige/achievement condition
//!    is evaluated against the state at phase start, then all toggles
//!    apply at once. Two-phase evaluation keeps the result independent
//!    of content pack declaration order.
//! 2. **Production** — every unlocked, enabled generator with level > 0
//!    credits its yields, scaled by level and upgrade effects.
//! 3. **Automations** — edge-triggered command emission with cooldowns.
//!
//! All evaluation goes through the pure evaluators in `lode-content`;
//! all mutation goes through the store setters, which mark the dirty
//! sets feeding snapshot publication.

use std::sync::Arc;

use lode_content::{evaluate_condition, evaluate_formula, EvalContext, NormalizedContentPack};
use lode_core::telemetry::TelemetryHandle;
use lode_core::{Command, CommandPriority, Step};
use lode_state::{
    AutomationStore, GeneratorStore, ResourceStore, StateError, UpgradeStore,
};

use crate::events::ProgressionEvent;
use crate::prd::PrdState;
use crate::prestige::TokenLedger;

/// Host-supplied boolean hook (flag or script evaluation).
pub type BoolHook = Box<dyn Fn(&str) -> Option<bool> + Send + Sync>;

/// Optional host hooks consulted by `flag` and `script` conditions.
///
/// Absent hooks fail closed.
#[derive(Default)]
pub struct HostHooks {
    /// Flag lookup hook.
    pub flag: Option<BoolHook>,
    /// Script evaluation hook.
    pub script: Option<BoolHook>,
}

/// Mutable borrow bundle over the authoritative stores.
///
/// The runtime owns the stores; handlers and the coordinator receive
/// this bundle for the duration of one dispatch or step.
pub struct Stores<'a> {
    /// Resource store.
    pub resources: &'a mut ResourceStore,
    /// Generator store.
    pub generators: &'a mut GeneratorStore,
    /// Upgrade store.
    pub upgrades: &'a mut UpgradeStore,
    /// Automation store.
    pub automations: &'a mut AutomationStore,
}

/// Result of one coordinator step update.
#[derive(Debug, Default)]
pub struct StepUpdate {
    /// Progression transitions, in deterministic emission order.
    pub events: Vec<ProgressionEvent>,
    /// Automation commands to enqueue at `Automation` priority.
    pub commands: Vec<Command>,
}

/// Read-only evaluation view over the stores plus coordinator state.
pub(crate) struct EvalView<'a> {
    pub resources: &'a ResourceStore,
    pub generators: &'a GeneratorStore,
    pub upgrades: &'a UpgradeStore,
    pub pack: &'a NormalizedContentPack,
    pub prestige_unlocked: &'a [u8],
    pub prestige_count_resource: &'a [u32],
    pub hooks: &'a HostHooks,
    pub vars: &'a [(&'a str, f64)],
}

impl EvalContext for EvalView<'_> {
    fn resource_amount(&self, id: &str) -> Option<f64> {
        self.resources.index_of(id).map(|i| self.resources.amount(i))
    }

    fn generator_level(&self, id: &str) -> Option<u32> {
        self.generators.index_of(id).map(|i| self.generators.level(i))
    }

    fn upgrade_owned(&self, id: &str) -> Option<bool> {
        self.upgrades.index_of(id).map(|i| self.upgrades.owned(i))
    }

    fn upgrade_purchases(&self, id: &str) -> Option<u32> {
        self.upgrades.index_of(id).map(|i| self.upgrades.purchases(i))
    }

    fn prestige_count(&self, layer: &str) -> Option<u32> {
        let pi = self.pack.prestige_index(layer)?;
        let resource = *self.prestige_count_resource.get(pi as usize)?;
        Some(self.resources.amount(resource) as u32)
    }

    fn prestige_unlocked(&self, layer: &str) -> Option<bool> {
        let pi = self.pack.prestige_index(layer)?;
        self.prestige_unlocked.get(pi as usize).map(|&v| v != 0)
    }

    fn variable(&self, name: &str) -> Option<f64> {
        // Scoped variables first (level, count, prestigeCount), then
        // resource amounts by id so reward formulas can read the
        // pre-reset economy.
        self.vars
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
            .or_else(|| self.resource_amount(name))
    }

    fn flag(&self, name: &str) -> Option<bool> {
        self.hooks.flag.as_ref().and_then(|hook| hook(name))
    }

    fn script(&self, hook: &str) -> Option<bool> {
        self.hooks.script.as_ref().and_then(|h| h(hook))
    }
}

/// Planned gate toggle collected during phase-1 evaluation.
enum GateChange {
    ResourceUnlock(u32),
    ResourceVisibility(u32, bool),
    GeneratorUnlock(u32),
    GeneratorVisibility(u32, bool),
    UpgradeUnlock(u32),
    AutomationUnlock(u32),
    TransformUnlock(u32),
    PrestigeGate(u32, bool),
    Achievement(u32),
}

/// The progression coordinator. See the module docs for phase ordering.
pub struct ProgressionCoordinator {
    pub(crate) pack: Arc<NormalizedContentPack>,
    pub(crate) prestige_unlocked: Vec<u8>,
    pub(crate) prestige_count_resource: Vec<u32>,
    pub(crate) achievement_unlocked: Vec<u8>,
    pub(crate) transform_unlocked: Vec<u8>,
    pub(crate) transform_applied: Vec<u64>,
    pub(crate) production_multiplier: Vec<f64>,
    pub(crate) production_bonus: Vec<f64>,
    base_capacity: Vec<f64>,
    pub(crate) tokens: TokenLedger,
    pub(crate) prd: PrdState,
    hooks: HostHooks,
    pub(crate) telemetry: TelemetryHandle,
}

impl ProgressionCoordinator {
    /// Build the coordinator against a normalized pack.
    ///
    /// Resolves each prestige layer's companion count resource; a pack
    /// that normalized successfully always has them, so a failure here
    /// indicates the stores were built from a different pack.
    pub fn new(
        pack: Arc<NormalizedContentPack>,
        resources: &ResourceStore,
        telemetry: TelemetryHandle,
    ) -> Result<Self, StateError> {
        let mut prestige_count_resource = Vec::with_capacity(pack.pack().prestige_layers.len());
        for layer in &pack.pack().prestige_layers {
            let id = lode_content::prestige_count_resource_id(&layer.id);
            prestige_count_resource.push(resources.require_index(&id)?);
        }

        let generators = pack.pack().generators.len();
        let transforms = pack.pack().transforms.len();
        let transform_ids: Vec<String> =
            pack.pack().transforms.iter().map(|t| t.id.clone()).collect();
        let base_capacity = pack
            .pack()
            .resources
            .iter()
            .map(|r| r.capacity.unwrap_or(f64::INFINITY))
            .collect();

        Ok(Self {
            prestige_unlocked: vec![0; pack.pack().prestige_layers.len()],
            prestige_count_resource,
            achievement_unlocked: vec![0; pack.pack().achievements.len()],
            transform_unlocked: pack
                .pack()
                .transforms
                .iter()
                .map(|t| u8::from(t.unlock_condition.is_none()))
                .collect(),
            transform_applied: vec![0; transforms],
            production_multiplier: vec![1.0; generators],
            production_bonus: vec![0.0; generators],
            base_capacity,
            tokens: TokenLedger::new(),
            prd: PrdState::new(transform_ids),
            hooks: HostHooks::default(),
            telemetry,
            pack,
        })
    }

    /// Install host flag/script hooks.
    pub fn set_host_hooks(&mut self, hooks: HostHooks) {
        self.hooks = hooks;
    }

    /// The content pack this coordinator runs.
    pub fn pack(&self) -> &NormalizedContentPack {
        &self.pack
    }

    /// Whether a prestige layer's gate is currently satisfied.
    pub fn prestige_gate_open(&self, layer_index: u32) -> bool {
        self.prestige_unlocked
            .get(layer_index as usize)
            .is_some_and(|&v| v != 0)
    }

    /// Whether an achievement has unlocked.
    pub fn achievement_unlocked(&self, index: u32) -> bool {
        self.achievement_unlocked
            .get(index as usize)
            .is_some_and(|&v| v != 0)
    }

    /// Whether a transform is unlocked.
    pub fn transform_unlocked(&self, index: u32) -> bool {
        self.transform_unlocked
            .get(index as usize)
            .is_some_and(|&v| v != 0)
    }

    /// Construct the evaluation view. `vars` scopes formula variables
    /// (e.g. `level` during a quote).
    pub(crate) fn eval_view<'a>(
        &'a self,
        stores: &'a Stores<'_>,
        vars: &'a [(&'a str, f64)],
    ) -> EvalView<'a> {
        EvalView {
            resources: stores.resources,
            generators: stores.generators,
            upgrades: stores.upgrades,
            pack: &self.pack,
            prestige_unlocked: &self.prestige_unlocked,
            prestige_count_resource: &self.prestige_count_resource,
            hooks: &self.hooks,
            vars,
        }
    }

    // ── Step update ───────────────────────────────────────────

    /// Evaluate gates, apply production, and fire automations for one
    /// step. `step_timestamp_ms` stamps emitted automation commands.
    pub fn update_for_step(
        &mut self,
        step: Step,
        step_timestamp_ms: u64,
        stores: &mut Stores<'_>,
    ) -> StepUpdate {
        let mut update = StepUpdate::default();
        self.run_gates(stores, &mut update);
        self.run_production(stores);
        self.run_automations(step, step_timestamp_ms, stores, &mut update);
        update
    }

    fn run_gates(&mut self, stores: &mut Stores<'_>, update: &mut StepUpdate) {
        let mut changes: Vec<GateChange> = Vec::new();
        {
            let view = self.eval_view(stores, &[]);
            let pack = view.pack.pack();

            for (i, def) in pack.resources.iter().enumerate() {
                let i = i as u32;
                if !view.resources.unlocked(i) {
                    if let Some(cond) = &def.unlock_condition {
                        if evaluate_condition(cond, &view) {
                            changes.push(GateChange::ResourceUnlock(i));
                        }
                    }
                }
                if let Some(cond) = &def.visible_condition {
                    let visible = evaluate_condition(cond, &view);
                    if visible != view.resources.visible(i) {
                        changes.push(GateChange::ResourceVisibility(i, visible));
                    }
                }
            }

            for (i, def) in pack.generators.iter().enumerate() {
                let i = i as u32;
                if !view.generators.unlocked(i) {
                    if let Some(cond) = &def.unlock_condition {
                        if evaluate_condition(cond, &view) {
                            changes.push(GateChange::GeneratorUnlock(i));
                        }
                    }
                }
                if let Some(cond) = &def.visible_condition {
                    let visible = evaluate_condition(cond, &view);
                    if visible != view.generators.visible(i) {
                        changes.push(GateChange::GeneratorVisibility(i, visible));
                    }
                }
            }

            for (i, def) in pack.upgrades.iter().enumerate() {
                let i = i as u32;
                if !view.upgrades.unlocked(i) {
                    if let Some(cond) = &def.unlock_condition {
                        if evaluate_condition(cond, &view) {
                            changes.push(GateChange::UpgradeUnlock(i));
                        }
                    }
                }
            }

            for (i, def) in pack.automations.iter().enumerate() {
                let i = i as u32;
                if !stores.automations.unlocked(i) {
                    if let Some(cond) = &def.unlock_condition {
                        if evaluate_condition(cond, &view) {
                            changes.push(GateChange::AutomationUnlock(i));
                        }
                    }
                }
            }

            for (i, def) in pack.transforms.iter().enumerate() {
                if self.transform_unlocked[i] == 0 {
                    if let Some(cond) = &def.unlock_condition {
                        if evaluate_condition(cond, &view) {
                            changes.push(GateChange::TransformUnlock(i as u32));
                        }
                    }
                }
            }

            for (i, layer) in pack.prestige_layers.iter().enumerate() {
                let open = evaluate_condition(&layer.unlock_condition, &view);
                if open != (self.prestige_unlocked[i] != 0) {
                    changes.push(GateChange::PrestigeGate(i as u32, open));
                }
            }

            for (i, def) in pack.achievements.iter().enumerate() {
                if self.achievement_unlocked[i] == 0 && evaluate_condition(&def.condition, &view)
                {
                    changes.push(GateChange::Achievement(i as u32));
                }
            }
        }

        for change in changes {
            match change {
                GateChange::ResourceUnlock(i) => {
                    stores.resources.set_unlocked(i, true);
                    update.events.push(ProgressionEvent::ResourceUnlocked {
                        id: stores.resources.ids()[i as usize].clone(),
                    });
                }
                GateChange::ResourceVisibility(i, visible) => {
                    stores.resources.set_visible(i, visible);
                    update
                        .events
                        .push(ProgressionEvent::ResourceVisibilityChanged {
                            id: stores.resources.ids()[i as usize].clone(),
                            visible,
                        });
                }
                GateChange::GeneratorUnlock(i) => {
                    stores.generators.set_unlocked(i, true);
                    update.events.push(ProgressionEvent::GeneratorUnlocked {
                        id: stores.generators.ids()[i as usize].clone(),
                    });
                }
                GateChange::GeneratorVisibility(i, visible) => {
                    stores.generators.set_visible(i, visible);
                    update
                        .events
                        .push(ProgressionEvent::GeneratorVisibilityChanged {
                            id: stores.generators.ids()[i as usize].clone(),
                            visible,
                        });
                }
                GateChange::UpgradeUnlock(i) => {
                    stores.upgrades.set_unlocked(i, true);
                    update.events.push(ProgressionEvent::UpgradeUnlocked {
                        id: stores.upgrades.ids()[i as usize].clone(),
                    });
                }
                GateChange::AutomationUnlock(i) => {
                    stores.automations.set_unlocked(i, true);
                    update.events.push(ProgressionEvent::AutomationUnlocked {
                        id: stores.automations.ids()[i as usize].clone(),
                    });
                }
                GateChange::TransformUnlock(i) => {
                    self.transform_unlocked[i as usize] = 1;
                    update.events.push(ProgressionEvent::TransformUnlocked {
                        id: self.pack.pack().transforms[i as usize].id.clone(),
                    });
                }
                GateChange::PrestigeGate(i, open) => {
                    self.prestige_unlocked[i as usize] = u8::from(open);
                    if open {
                        update.events.push(ProgressionEvent::PrestigeUnlocked {
                            layer: self.pack.pack().prestige_layers[i as usize].id.clone(),
                        });
                    }
                }
                GateChange::Achievement(i) => {
                    self.achievement_unlocked[i as usize] = 1;
                    let id = self.pack.pack().achievements[i as usize].id.clone();
                    self.telemetry.record_progress(
                        "AchievementUnlocked",
                        Some(&serde_json::json!({ "id": id })),
                    );
                    update
                        .events
                        .push(ProgressionEvent::AchievementUnlocked { id });
                }
            }
        }
    }

    fn run_production(&mut self, stores: &mut Stores<'_>) {
        let mut credits: Vec<(u32, f64)> = Vec::new();
        {
            let pack = self.pack.clone();
            for (gi, def) in pack.pack().generators.iter().enumerate() {
                let g = gi as u32;
                let level = stores.generators.level(g);
                if level == 0
                    || !stores.generators.unlocked(g)
                    || !stores.generators.enabled(g)
                {
                    continue;
                }
                let vars = [("level", f64::from(level))];
                let view = self.eval_view(stores, &vars);
                let multiplier = self.production_multiplier[gi];
                let bonus = self.production_bonus[gi];
                for yield_def in &def.production {
                    let Some(resource) = view.resources.index_of(&yield_def.resource) else {
                        continue;
                    };
                    let rate = evaluate_formula(&yield_def.rate, &view);
                    let amount = rate * f64::from(level) * multiplier + bonus;
                    if amount != 0.0 {
                        credits.push((resource, amount));
                    }
                }
            }
        }
        for (resource, amount) in credits {
            if stores.resources.add_amount(resource, amount).is_err() {
                // Non-finite production (overflowing formula); already
                // reported via store telemetry. Skip the credit.
                log::warn!(target: "lode", "skipping non-finite production credit");
            }
        }
    }

    fn run_automations(
        &mut self,
        step: Step,
        step_timestamp_ms: u64,
        stores: &mut Stores<'_>,
        update: &mut StepUpdate,
    ) {
        struct Decision {
            index: u32,
            satisfied: bool,
            fire: bool,
        }

        let mut decisions: Vec<Decision> = Vec::new();
        {
            let view = self.eval_view(stores, &[]);
            for (i, def) in self.pack.pack().automations.iter().enumerate() {
                let index = i as u32;
                if !stores.automations.unlocked(index) {
                    continue;
                }
                let satisfied = evaluate_condition(&def.trigger, &view);
                let fire = satisfied
                    && stores.automations.enabled(index)
                    && !stores.automations.last_threshold_satisfied(index)
                    && stores.automations.cooldown_ready(index, step);
                decisions.push(Decision {
                    index,
                    satisfied,
                    fire,
                });
            }
        }

        for decision in decisions {
            let i = decision.index as usize;
            let def = &self.pack.pack().automations[i];
            if decision.fire {
                match Command::new(
                    def.command.kind.clone(),
                    CommandPriority::Automation,
                    step_timestamp_ms,
                    step,
                    def.command.payload.clone(),
                ) {
                    Ok(command) => {
                        stores
                            .automations
                            .record_fired(decision.index, step, def.cooldown_steps);
                        update.events.push(ProgressionEvent::AutomationFired {
                            id: def.id.clone(),
                            step,
                        });
                        update.commands.push(command);
                    }
                    Err(e) => {
                        self.telemetry.record_warning(
                            "AutomationCommandInvalid",
                            Some(&serde_json::json!({ "id": def.id, "error": e.to_string() })),
                        );
                    }
                }
            }
            stores
                .automations
                .set_threshold_satisfied(decision.index, decision.satisfied);
        }
    }

    // ── Sanctioned mutators ───────────────────────────────────

    /// Add generator levels. Marks dirty; returns the levels applied.
    pub fn increment_generator_owned(
        &mut self,
        stores: &mut Stores<'_>,
        index: u32,
        count: u32,
    ) -> u32 {
        stores.generators.increment_level(index, count)
    }

    /// Toggle a generator's enabled flag.
    pub fn set_generator_enabled(&mut self, stores: &mut Stores<'_>, index: u32, enabled: bool) {
        stores.generators.set_enabled(index, enabled);
    }

    /// Add upgrade purchases and recompute derived effects.
    pub fn increment_upgrade_purchases(
        &mut self,
        stores: &mut Stores<'_>,
        index: u32,
        count: u32,
    ) -> u32 {
        let applied = stores.upgrades.increment_purchases(index, count);
        if applied > 0 {
            self.recompute_effects(stores);
        }
        applied
    }

    /// Set an upgrade's purchase count and recompute derived effects.
    pub fn set_upgrade_purchases(&mut self, stores: &mut Stores<'_>, index: u32, count: u32) {
        stores.upgrades.set_purchases(index, count);
        self.recompute_effects(stores);
    }

    /// Recompute upgrade-derived production multipliers, bonuses, and
    /// capacity adjustments from the current purchase counts.
    ///
    /// Called after any purchase-count change and after hydration.
    pub fn recompute_effects(&mut self, stores: &mut Stores<'_>) {
        self.production_multiplier.fill(1.0);
        self.production_bonus.fill(0.0);
        let mut capacity_bonus = vec![0.0f64; stores.resources.len()];

        for (ui, def) in self.pack.pack().upgrades.iter().enumerate() {
            let purchases = stores.upgrades.purchases(ui as u32);
            if purchases == 0 {
                continue;
            }
            for effect in &def.effects {
                match effect {
                    lode_content::EffectDef::ProductionMultiplier {
                        generator,
                        multiplier,
                    } => {
                        if let Some(g) = self.pack.generator_index(generator) {
                            self.production_multiplier[g as usize] *=
                                multiplier.powi(purchases as i32);
                        }
                    }
                    lode_content::EffectDef::ProductionBonus { generator, bonus } => {
                        if let Some(g) = self.pack.generator_index(generator) {
                            self.production_bonus[g as usize] += bonus * f64::from(purchases);
                        }
                    }
                    lode_content::EffectDef::CapacityBonus { resource, amount } => {
                        if let Some(r) = stores.resources.index_of(resource) {
                            capacity_bonus[r as usize] += amount * f64::from(purchases);
                        }
                    }
                }
            }
        }

        for (ri, bonus) in capacity_bonus.iter().enumerate() {
            let base = self.base_capacity[ri];
            let target = if base.is_finite() {
                Some(base + bonus)
            } else {
                None // uncapped stays uncapped
            };
            // set_capacity is change-detecting, so this is cheap when
            // nothing moved.
            let _ = stores.resources.set_capacity(ri as u32, target);
        }
    }
}
