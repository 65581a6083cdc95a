//! Condition nodes and their pure evaluator.
//!
//! Conditions gate unlocks, visibility, automation triggers, prestige
//! availability, and achievement tracks. Evaluation is side-effect-free
//! and fails *closed*: an unknown entity id, a missing variable, or an
//! absent host hook makes the condition false rather than erroring, so a
//! malformed gate can never unlock content by accident.

use serde::{Deserialize, Serialize};

/// Comparison operator for threshold conditions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Comparison {
    /// `observed >= threshold` (the default).
    #[default]
    AtLeast,
    /// `observed > threshold`.
    Above,
    /// `observed <= threshold`.
    AtMost,
    /// `observed < threshold`.
    Below,
}

impl Comparison {
    fn apply(self, observed: f64, threshold: f64) -> bool {
        match self {
            Self::AtLeast => observed >= threshold,
            Self::Above => observed > threshold,
            Self::AtMost => observed <= threshold,
            Self::Below => observed < threshold,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::AtLeast => "at least",
            Self::Above => "more than",
            Self::AtMost => "at most",
            Self::Below => "less than",
        }
    }
}

/// A condition node from the content pack.
///
/// The serde tag matches the content DSL's `kind` discriminator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Condition {
    /// Always satisfied.
    Always,
    /// Never satisfied.
    Never,
    /// A resource amount compared against a threshold.
    ResourceThreshold {
        /// Resource id to inspect.
        resource: String,
        /// Threshold amount.
        amount: f64,
        /// Comparison operator (default: at least).
        #[serde(default)]
        comparison: Comparison,
    },
    /// A generator has reached a level.
    GeneratorLevel {
        /// Generator id to inspect.
        generator: String,
        /// Minimum level (inclusive).
        level: u32,
    },
    /// An upgrade has been purchased at least once.
    UpgradeOwned {
        /// Upgrade id to inspect.
        upgrade: String,
    },
    /// A prestige layer has been completed at least `count` times.
    PrestigeCountThreshold {
        /// Prestige layer id.
        layer: String,
        /// Minimum completion count (inclusive).
        count: u32,
    },
    /// A prestige layer has been completed at least once.
    PrestigeCompleted {
        /// Prestige layer id.
        layer: String,
    },
    /// A prestige layer's unlock gate is currently satisfied.
    PrestigeUnlocked {
        /// Prestige layer id.
        layer: String,
    },
    /// A host-supplied boolean flag. Fails closed when the host supplies
    /// no flag hook or the flag is unknown.
    Flag {
        /// Flag name passed to the host hook.
        flag: String,
    },
    /// A host-supplied script hook. Fails closed when absent.
    Script {
        /// Hook name passed to the host.
        hook: String,
    },
    /// All child conditions must hold. Empty list is satisfied.
    AllOf {
        /// Child conditions.
        conditions: Vec<Condition>,
    },
    /// At least one child condition must hold. Empty list is unsatisfied.
    AnyOf {
        /// Child conditions.
        conditions: Vec<Condition>,
    },
    /// Negation of the child condition.
    Not {
        /// Child condition.
        condition: Box<Condition>,
    },
}

/// Read-only world view supplied to the condition and formula evaluators.
///
/// Implementations return `None` for unknown ids; the evaluators treat
/// that as "fails closed".
pub trait EvalContext {
    /// Current amount of a resource.
    fn resource_amount(&self, id: &str) -> Option<f64>;
    /// Current level of a generator.
    fn generator_level(&self, id: &str) -> Option<u32>;
    /// Whether an upgrade has been purchased at least once.
    fn upgrade_owned(&self, id: &str) -> Option<bool>;
    /// Purchase count of an upgrade.
    fn upgrade_purchases(&self, id: &str) -> Option<u32>;
    /// Completion count of a prestige layer.
    fn prestige_count(&self, layer: &str) -> Option<u32>;
    /// Whether a prestige layer's unlock gate currently holds.
    fn prestige_unlocked(&self, layer: &str) -> Option<bool>;
    /// A scoped formula variable (e.g. `level` during a cost quote).
    fn variable(&self, name: &str) -> Option<f64>;
    /// Host flag hook. Default: absent (fails closed).
    fn flag(&self, _name: &str) -> Option<bool> {
        None
    }
    /// Host script hook. Default: absent (fails closed).
    fn script(&self, _hook: &str) -> Option<bool> {
        None
    }
}

/// Evaluate a condition against the supplied context.
pub fn evaluate_condition(condition: &Condition, ctx: &dyn EvalContext) -> bool {
    match condition {
        Condition::Always => true,
        Condition::Never => false,
        Condition::ResourceThreshold {
            resource,
            amount,
            comparison,
        } => ctx
            .resource_amount(resource)
            .is_some_and(|observed| comparison.apply(observed, *amount)),
        Condition::GeneratorLevel { generator, level } => ctx
            .generator_level(generator)
            .is_some_and(|observed| observed >= *level),
        Condition::UpgradeOwned { upgrade } => ctx.upgrade_owned(upgrade).unwrap_or(false),
        Condition::PrestigeCountThreshold { layer, count } => ctx
            .prestige_count(layer)
            .is_some_and(|observed| observed >= *count),
        Condition::PrestigeCompleted { layer } => {
            ctx.prestige_count(layer).is_some_and(|count| count >= 1)
        }
        Condition::PrestigeUnlocked { layer } => ctx.prestige_unlocked(layer).unwrap_or(false),
        Condition::Flag { flag } => ctx.flag(flag).unwrap_or(false),
        Condition::Script { hook } => ctx.script(hook).unwrap_or(false),
        Condition::AllOf { conditions } => {
            conditions.iter().all(|c| evaluate_condition(c, ctx))
        }
        Condition::AnyOf { conditions } => {
            conditions.iter().any(|c| evaluate_condition(c, ctx))
        }
        Condition::Not { condition } => !evaluate_condition(condition, ctx),
    }
}

/// Produce a short human-readable hint for an unmet condition.
///
/// Stable for identical inputs; used by shells to annotate locked
/// entries ("requires at least 100 energy").
pub fn describe_condition(condition: &Condition, ctx: &dyn EvalContext) -> String {
    match condition {
        Condition::Always => "always available".to_string(),
        Condition::Never => "not available".to_string(),
        Condition::ResourceThreshold {
            resource,
            amount,
            comparison,
        } => format!("requires {} {} {}", comparison.describe(), amount, resource),
        Condition::GeneratorLevel { generator, level } => {
            format!("requires {generator} level {level}")
        }
        Condition::UpgradeOwned { upgrade } => format!("requires upgrade {upgrade}"),
        Condition::PrestigeCountThreshold { layer, count } => {
            format!("requires {count} {layer} resets")
        }
        Condition::PrestigeCompleted { layer } => format!("requires a {layer} reset"),
        Condition::PrestigeUnlocked { layer } => format!("requires {layer} to be unlocked"),
        Condition::Flag { flag } => format!("requires flag {flag}"),
        Condition::Script { hook } => format!("requires {hook}"),
        Condition::AllOf { conditions } => {
            // Name the first unmet child; that is the actionable hint.
            conditions
                .iter()
                .find(|c| !evaluate_condition(c, ctx))
                .map_or_else(|| "all requirements met".to_string(), |c| {
                    describe_condition(c, ctx)
                })
        }
        Condition::AnyOf { conditions } => match conditions.first() {
            Some(first) => describe_condition(first, ctx),
            None => "not available".to_string(),
        },
        Condition::Not { condition } => format!("blocked: {}", describe_condition(condition, ctx)),
    }
}
