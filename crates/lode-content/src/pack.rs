//! Content pack model, validation, and normalization.
//!
//! A [`ContentPack`] is the deserialized output of the (external) content
//! DSL validator. [`NormalizedContentPack::new`] re-checks the structural
//! invariants the runtime depends on — unique trimmed ids, resolvable
//! cross-references, prestige companion resources — and interns every id
//! into the index maps the columnar stores are built from. Schema-level
//! balance validation is *not* run here; it belongs to the content
//! tooling.

use std::error::Error;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::Condition;
use crate::digest::content_digest;
use crate::formula::Formula;

fn default_true() -> bool {
    true
}

fn default_one() -> u32 {
    1
}

/// The id of the companion resource tracking completions of a prestige
/// layer (`<layerId>-prestige-count`).
pub fn prestige_count_resource_id(layer_id: &str) -> String {
    format!("{layer_id}-prestige-count")
}

// ── Definitions ───────────────────────────────────────────────────

/// A resource definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDef {
    /// Unique resource id.
    pub id: String,
    /// Amount at runtime start.
    #[serde(default)]
    pub start_amount: f64,
    /// Storage cap; `None` = uncapped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
    /// Whether the resource starts unlocked.
    #[serde(default = "default_true")]
    pub unlocked: bool,
    /// Whether the resource starts visible.
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Gate re-evaluated each step to unlock the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_condition: Option<Condition>,
    /// Gate re-evaluated each step to reveal the resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_condition: Option<Condition>,
}

impl Default for ResourceDef {
    fn default() -> Self {
        Self {
            id: String::new(),
            start_amount: 0.0,
            capacity: None,
            unlocked: true,
            visible: true,
            unlock_condition: None,
            visible_condition: None,
        }
    }
}

/// One resource debit in a cost vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostDef {
    /// Resource debited.
    pub resource: String,
    /// Amount formula (typically over `level` or `count`).
    pub amount: Formula,
}

/// One resource credit in a production or output vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YieldDef {
    /// Resource credited.
    pub resource: String,
    /// Per-step (or per-application) rate formula.
    pub rate: Formula,
}

/// A generator definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorDef {
    /// Unique generator id.
    pub id: String,
    /// Level cap; 0 = unlimited.
    #[serde(default)]
    pub max_level: u32,
    /// Cost vector for the next level.
    #[serde(default)]
    pub cost: Vec<CostDef>,
    /// Per-step production while enabled, scaled by level.
    #[serde(default)]
    pub production: Vec<YieldDef>,
    /// Whether the generator starts unlocked.
    #[serde(default = "default_true")]
    pub unlocked: bool,
    /// Whether the generator starts visible.
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Whether the generator starts enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Gate re-evaluated each step to unlock the generator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_condition: Option<Condition>,
    /// Gate re-evaluated each step to reveal the generator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_condition: Option<Condition>,
}

/// An upgrade effect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EffectDef {
    /// Multiply a generator's production per purchase.
    ProductionMultiplier {
        /// Target generator id.
        generator: String,
        /// Multiplier applied once per purchase.
        multiplier: f64,
    },
    /// Add a flat per-step production bonus per purchase.
    ProductionBonus {
        /// Target generator id.
        generator: String,
        /// Flat bonus applied once per purchase.
        bonus: f64,
    },
    /// Raise a resource's capacity per purchase.
    CapacityBonus {
        /// Target resource id.
        resource: String,
        /// Capacity added once per purchase.
        amount: f64,
    },
}

/// An upgrade definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeDef {
    /// Unique upgrade id.
    pub id: String,
    /// Cost vector (the `count` variable is the current purchase count).
    #[serde(default)]
    pub cost: Vec<CostDef>,
    /// Purchase cap; 1 = single-purchase upgrade.
    #[serde(default = "default_one")]
    pub max_purchases: u32,
    /// Effects applied per purchase.
    #[serde(default)]
    pub effects: Vec<EffectDef>,
    /// Gate re-evaluated each step to unlock the upgrade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_condition: Option<Condition>,
}

/// The command an automation emits when it fires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandTemplate {
    /// Command type string.
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload forwarded verbatim.
    #[serde(default)]
    pub payload: Value,
}

/// An automation definition.
///
/// Automations are edge-triggered: they fire when their trigger
/// transitions from unsatisfied to satisfied, then hold until the
/// cooldown expires and the trigger has re-armed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationDef {
    /// Unique automation id.
    pub id: String,
    /// Trigger condition, re-evaluated each step.
    pub trigger: Condition,
    /// Command emitted at `Automation` priority when the trigger fires.
    pub command: CommandTemplate,
    /// Steps to wait after firing before the automation may fire again.
    #[serde(default)]
    pub cooldown_steps: u64,
    /// Whether the automation starts enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Gate re-evaluated each step to unlock the automation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_condition: Option<Condition>,
}

/// PRD-smoothed bonus outputs for a transform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BonusDef {
    /// Nominal bonus chance in `[0, 1]`, smoothed by the PRD accumulator.
    pub chance: f64,
    /// Extra outputs credited when the bonus procs.
    pub outputs: Vec<YieldDef>,
}

/// A transform (resource conversion) definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformDef {
    /// Unique transform id.
    pub id: String,
    /// Resources consumed per application.
    #[serde(default)]
    pub inputs: Vec<CostDef>,
    /// Resources produced per application.
    #[serde(default)]
    pub outputs: Vec<YieldDef>,
    /// Optional PRD-smoothed bonus outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bonus: Option<BonusDef>,
    /// Gate re-evaluated each step to unlock the transform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_condition: Option<Condition>,
}

/// A prestige layer definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrestigeLayerDef {
    /// Unique layer id. The pack must also define the companion
    /// resource [`prestige_count_resource_id`]`(id)`.
    pub id: String,
    /// Gate deciding when the layer becomes available.
    pub unlock_condition: Condition,
    /// Resource credited with the reward.
    pub reward_resource: String,
    /// Reward formula, evaluated against the *pre-reset* state.
    pub reward: Formula,
    /// Resources reset to their start amounts on apply.
    #[serde(default)]
    pub reset_targets: Vec<String>,
    /// Resources exempted from the reset even when listed as targets.
    #[serde(default)]
    pub retained: Vec<String>,
    /// Whether generator levels reset on apply.
    #[serde(default = "default_true")]
    pub reset_generators: bool,
    /// Whether upgrade purchases reset on apply.
    #[serde(default = "default_true")]
    pub reset_upgrades: bool,
}

/// An achievement definition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementDef {
    /// Unique achievement id.
    pub id: String,
    /// Condition that (one-way) unlocks the achievement.
    pub condition: Condition,
    /// Hidden achievements are omitted from progression snapshots until
    /// unlocked.
    #[serde(default)]
    pub hidden: bool,
}

// ── ContentPack ───────────────────────────────────────────────────

/// A complete deserialized content pack.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPack {
    /// Pack id; part of the save-compatibility digest.
    pub id: String,
    /// Pack version; part of the save-compatibility digest.
    pub version: String,
    /// Module ids the pack was assembled from, in assembly order; part
    /// of the save-compatibility digest.
    #[serde(default)]
    pub module_ids: Vec<String>,
    /// Resource definitions.
    #[serde(default)]
    pub resources: Vec<ResourceDef>,
    /// Generator definitions.
    #[serde(default)]
    pub generators: Vec<GeneratorDef>,
    /// Upgrade definitions.
    #[serde(default)]
    pub upgrades: Vec<UpgradeDef>,
    /// Automation definitions.
    #[serde(default)]
    pub automations: Vec<AutomationDef>,
    /// Transform definitions.
    #[serde(default)]
    pub transforms: Vec<TransformDef>,
    /// Prestige layer definitions.
    #[serde(default)]
    pub prestige_layers: Vec<PrestigeLayerDef>,
    /// Achievement definitions.
    #[serde(default)]
    pub achievements: Vec<AchievementDef>,
}

// ── ContentError ──────────────────────────────────────────────────

/// Errors detected while normalizing a content pack.
#[derive(Clone, Debug, PartialEq)]
pub enum ContentError {
    /// An entity id is empty or has surrounding whitespace.
    InvalidId {
        /// Collection the id belongs to.
        collection: &'static str,
        /// The offending id.
        id: String,
    },
    /// Two entities in the same collection share an id.
    DuplicateId {
        /// Collection the ids belong to.
        collection: &'static str,
        /// The duplicated id.
        id: String,
    },
    /// A definition references an entity that does not exist.
    UnknownReference {
        /// The referring entity.
        referrer: String,
        /// The missing target id.
        target: String,
        /// The collection the target was expected in.
        collection: &'static str,
    },
    /// A prestige layer has no companion count resource.
    MissingPrestigeCountResource {
        /// The layer id.
        layer: String,
        /// The resource id the pack must define.
        expected: String,
    },
    /// A numeric field is out of its valid domain.
    InvalidNumeric {
        /// Description of the offending field.
        context: String,
    },
}

impl fmt::Display for ContentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidId { collection, id } => {
                write!(f, "invalid {collection} id {id:?}")
            }
            Self::DuplicateId { collection, id } => {
                write!(f, "duplicate {collection} id {id:?}")
            }
            Self::UnknownReference {
                referrer,
                target,
                collection,
            } => write!(f, "{referrer} references unknown {collection} {target:?}"),
            Self::MissingPrestigeCountResource { layer, expected } => write!(
                f,
                "prestige layer {layer:?} requires count resource {expected:?}"
            ),
            Self::InvalidNumeric { context } => write!(f, "invalid numeric value: {context}"),
        }
    }
}

impl Error for ContentError {}

// ── NormalizedContentPack ─────────────────────────────────────────

/// A validated content pack with interned id→index maps and a
/// precomputed digest.
///
/// The index maps are built once here; the columnar stores and the
/// progression coordinator index through them for the lifetime of the
/// runtime, so lookups never allocate.
#[derive(Clone, Debug)]
pub struct NormalizedContentPack {
    pack: ContentPack,
    digest: String,
    resource_index: IndexMap<String, u32>,
    generator_index: IndexMap<String, u32>,
    upgrade_index: IndexMap<String, u32>,
    automation_index: IndexMap<String, u32>,
    transform_index: IndexMap<String, u32>,
    prestige_index: IndexMap<String, u32>,
}

impl NormalizedContentPack {
    /// Validate and normalize a content pack.
    pub fn new(pack: ContentPack) -> Result<Self, ContentError> {
        let resource_index = intern("resource", pack.resources.iter().map(|r| r.id.as_str()))?;
        let generator_index =
            intern("generator", pack.generators.iter().map(|g| g.id.as_str()))?;
        let upgrade_index = intern("upgrade", pack.upgrades.iter().map(|u| u.id.as_str()))?;
        let automation_index =
            intern("automation", pack.automations.iter().map(|a| a.id.as_str()))?;
        let transform_index =
            intern("transform", pack.transforms.iter().map(|t| t.id.as_str()))?;
        let prestige_index = intern(
            "prestige layer",
            pack.prestige_layers.iter().map(|p| p.id.as_str()),
        )?;

        validate_numerics(&pack)?;
        validate_references(&pack, &resource_index, &generator_index)?;

        for layer in &pack.prestige_layers {
            let expected = prestige_count_resource_id(&layer.id);
            if !resource_index.contains_key(expected.as_str()) {
                return Err(ContentError::MissingPrestigeCountResource {
                    layer: layer.id.clone(),
                    expected,
                });
            }
        }

        let digest = content_digest(&pack);
        Ok(Self {
            pack,
            digest,
            resource_index,
            generator_index,
            upgrade_index,
            automation_index,
            transform_index,
            prestige_index,
        })
    }

    /// The underlying pack.
    pub fn pack(&self) -> &ContentPack {
        &self.pack
    }

    /// The save-compatibility digest (`fnv1a-XXXXXXXX`).
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Index of a resource id.
    pub fn resource_index(&self, id: &str) -> Option<u32> {
        self.resource_index.get(id).copied()
    }

    /// Index of a generator id.
    pub fn generator_index(&self, id: &str) -> Option<u32> {
        self.generator_index.get(id).copied()
    }

    /// Index of an upgrade id.
    pub fn upgrade_index(&self, id: &str) -> Option<u32> {
        self.upgrade_index.get(id).copied()
    }

    /// Index of an automation id.
    pub fn automation_index(&self, id: &str) -> Option<u32> {
        self.automation_index.get(id).copied()
    }

    /// Index of a transform id.
    pub fn transform_index(&self, id: &str) -> Option<u32> {
        self.transform_index.get(id).copied()
    }

    /// Index of a prestige layer id.
    pub fn prestige_index(&self, id: &str) -> Option<u32> {
        self.prestige_index.get(id).copied()
    }
}

/// Build an id→index map, rejecting invalid and duplicate ids.
fn intern<'a>(
    collection: &'static str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<IndexMap<String, u32>, ContentError> {
    let mut map = IndexMap::new();
    for (i, id) in ids.enumerate() {
        if id.trim().is_empty() || id.trim() != id {
            return Err(ContentError::InvalidId {
                collection,
                id: id.to_string(),
            });
        }
        if map.insert(id.to_string(), i as u32).is_some() {
            return Err(ContentError::DuplicateId {
                collection,
                id: id.to_string(),
            });
        }
    }
    Ok(map)
}

fn validate_numerics(pack: &ContentPack) -> Result<(), ContentError> {
    for r in &pack.resources {
        if !r.start_amount.is_finite() || r.start_amount < 0.0 {
            return Err(ContentError::InvalidNumeric {
                context: format!("resource {:?} startAmount {}", r.id, r.start_amount),
            });
        }
        if let Some(cap) = r.capacity {
            if !cap.is_finite() || cap < 0.0 {
                return Err(ContentError::InvalidNumeric {
                    context: format!("resource {:?} capacity {cap}", r.id),
                });
            }
        }
    }
    for t in &pack.transforms {
        if let Some(bonus) = &t.bonus {
            if !bonus.chance.is_finite() || !(0.0..=1.0).contains(&bonus.chance) {
                return Err(ContentError::InvalidNumeric {
                    context: format!("transform {:?} bonus chance {}", t.id, bonus.chance),
                });
            }
        }
    }
    Ok(())
}

fn validate_references(
    pack: &ContentPack,
    resources: &IndexMap<String, u32>,
    generators: &IndexMap<String, u32>,
) -> Result<(), ContentError> {
    let check_resource = |referrer: &str, target: &str| -> Result<(), ContentError> {
        if resources.contains_key(target) {
            Ok(())
        } else {
            Err(ContentError::UnknownReference {
                referrer: referrer.to_string(),
                target: target.to_string(),
                collection: "resource",
            })
        }
    };

    for g in &pack.generators {
        let referrer = format!("generator {:?}", g.id);
        for cost in &g.cost {
            check_resource(&referrer, &cost.resource)?;
        }
        for y in &g.production {
            check_resource(&referrer, &y.resource)?;
        }
    }
    for u in &pack.upgrades {
        let referrer = format!("upgrade {:?}", u.id);
        for cost in &u.cost {
            check_resource(&referrer, &cost.resource)?;
        }
        for effect in &u.effects {
            match effect {
                EffectDef::ProductionMultiplier { generator, .. }
                | EffectDef::ProductionBonus { generator, .. } => {
                    if !generators.contains_key(generator.as_str()) {
                        return Err(ContentError::UnknownReference {
                            referrer,
                            target: generator.clone(),
                            collection: "generator",
                        });
                    }
                }
                EffectDef::CapacityBonus { resource, .. } => {
                    check_resource(&referrer, resource)?;
                }
            }
        }
    }
    for t in &pack.transforms {
        let referrer = format!("transform {:?}", t.id);
        for cost in &t.inputs {
            check_resource(&referrer, &cost.resource)?;
        }
        for y in &t.outputs {
            check_resource(&referrer, &y.resource)?;
        }
        if let Some(bonus) = &t.bonus {
            for y in &bonus.outputs {
                check_resource(&referrer, &y.resource)?;
            }
        }
    }
    for p in &pack.prestige_layers {
        let referrer = format!("prestige layer {:?}", p.id);
        check_resource(&referrer, &p.reward_resource)?;
        for target in p.reset_targets.iter().chain(p.retained.iter()) {
            check_resource(&referrer, target)?;
        }
    }
    Ok(())
}
