//! Content pack model and pure evaluators for the Lode idle-game engine.
//!
//! A content pack describes the playable economy: resources, generators,
//! upgrades, automations, transforms, prestige layers, and achievements.
//! Packs arrive as JSON produced by the (external) content DSL validator;
//! this crate normalizes them, builds the id→index interning used by the
//! columnar stores, and computes the FNV-1a digest that guards save
//! compatibility.
//!
//! The [`condition`] and [`formula`] modules hold the pure evaluators the
//! progression coordinator runs every step. They are side-effect-free
//! functions over `(node, context)` — the context supplies entity lookups
//! and scoped variables, never mutation.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod condition;
pub mod digest;
pub mod formula;
pub mod pack;

pub use condition::{describe_condition, evaluate_condition, Comparison, Condition, EvalContext};
pub use digest::content_digest;
pub use formula::{evaluate_formula, Expr, Formula};
pub use pack::{
    prestige_count_resource_id, AchievementDef, AutomationDef, BonusDef, CommandTemplate,
    ContentError, ContentPack, CostDef, EffectDef, GeneratorDef, NormalizedContentPack,
    PrestigeLayerDef, ResourceDef, TransformDef, UpgradeDef, YieldDef,
};
