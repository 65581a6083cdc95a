//! Test utilities and fixture content packs for Lode development.
//!
//! Not published; test code across the workspace shares these fixtures
//! so scenario packs stay consistent between unit and integration
//! tests.

#![forbid(unsafe_code)]

use serde_json::{json, Value};

use lode_content::{
    AutomationDef, BonusDef, Comparison, CommandTemplate, Condition, ContentPack, CostDef,
    Formula, GeneratorDef, NormalizedContentPack, PrestigeLayerDef, ResourceDef, TransformDef,
    UpgradeDef, YieldDef,
};
use lode_core::{Command, CommandPriority, Step};

/// The canonical single-generator fixture: one `energy` resource
/// (start 1) and one `mine` generator producing 1 energy/step at
/// constant cost 1.
pub fn minimal_pack() -> NormalizedContentPack {
    let pack = ContentPack {
        id: "fixture-minimal".into(),
        version: "1.0.0".into(),
        module_ids: vec!["core".into()],
        resources: vec![ResourceDef {
            id: "energy".into(),
            start_amount: 1.0,
            ..Default::default()
        }],
        generators: vec![GeneratorDef {
            id: "mine".into(),
            max_level: 0,
            cost: vec![CostDef {
                resource: "energy".into(),
                amount: Formula::Constant { value: 1.0 },
            }],
            production: vec![YieldDef {
                resource: "energy".into(),
                rate: Formula::Constant { value: 1.0 },
            }],
            unlocked: true,
            visible: true,
            enabled: true,
            unlock_condition: None,
            visible_condition: None,
        }],
        ..Default::default()
    };
    NormalizedContentPack::new(pack).expect("minimal fixture pack is valid")
}

/// A single-resource pack with no generators, for command-effect-only
/// tests (replay, grants).
pub fn value_pack() -> NormalizedContentPack {
    let pack = ContentPack {
        id: "fixture-value".into(),
        version: "1.0.0".into(),
        module_ids: vec!["core".into()],
        resources: vec![ResourceDef {
            id: "value".into(),
            start_amount: 0.0,
            ..Default::default()
        }],
        ..Default::default()
    };
    NormalizedContentPack::new(pack).expect("value fixture pack is valid")
}

/// A full-economy fixture exercising every subsystem: upgrade,
/// automation, transform with PRD bonus, prestige layer, achievement.
pub fn rich_pack() -> NormalizedContentPack {
    let pack = ContentPack {
        id: "fixture-rich".into(),
        version: "1.0.0".into(),
        module_ids: vec!["core".into(), "prestige".into()],
        resources: vec![
            ResourceDef {
                id: "energy".into(),
                start_amount: 10.0,
                ..Default::default()
            },
            ResourceDef {
                id: "ingot".into(),
                start_amount: 0.0,
                ..Default::default()
            },
            ResourceDef {
                id: "shards".into(),
                start_amount: 0.0,
                ..Default::default()
            },
            ResourceDef {
                id: "ascension-prestige-count".into(),
                start_amount: 0.0,
                ..Default::default()
            },
        ],
        generators: vec![GeneratorDef {
            id: "mine".into(),
            max_level: 0,
            cost: vec![CostDef {
                resource: "energy".into(),
                amount: Formula::Exponential {
                    base: 10.0,
                    growth: 1.15,
                    variable: "level".into(),
                },
            }],
            production: vec![YieldDef {
                resource: "energy".into(),
                rate: Formula::Constant { value: 1.0 },
            }],
            unlocked: true,
            visible: true,
            enabled: true,
            unlock_condition: None,
            visible_condition: None,
        }],
        upgrades: vec![UpgradeDef {
            id: "drill".into(),
            cost: vec![CostDef {
                resource: "energy".into(),
                amount: Formula::Constant { value: 5.0 },
            }],
            max_purchases: 1,
            effects: vec![lode_content::EffectDef::ProductionMultiplier {
                generator: "mine".into(),
                multiplier: 2.0,
            }],
            unlock_condition: None,
        }],
        automations: vec![AutomationDef {
            id: "auto-mine".into(),
            trigger: Condition::ResourceThreshold {
                resource: "energy".into(),
                amount: 100.0,
                comparison: Comparison::AtLeast,
            },
            command: CommandTemplate {
                kind: "PURCHASE_GENERATOR".into(),
                payload: json!({ "generatorId": "mine", "count": 1 }),
            },
            cooldown_steps: 5,
            enabled: true,
            unlock_condition: None,
        }],
        transforms: vec![TransformDef {
            id: "smelt".into(),
            inputs: vec![CostDef {
                resource: "energy".into(),
                amount: Formula::Constant { value: 2.0 },
            }],
            outputs: vec![YieldDef {
                resource: "ingot".into(),
                rate: Formula::Constant { value: 1.0 },
            }],
            bonus: Some(BonusDef {
                chance: 0.25,
                outputs: vec![YieldDef {
                    resource: "ingot".into(),
                    rate: Formula::Constant { value: 1.0 },
                }],
            }),
            unlock_condition: None,
        }],
        prestige_layers: vec![PrestigeLayerDef {
            id: "ascension".into(),
            unlock_condition: Condition::ResourceThreshold {
                resource: "energy".into(),
                amount: 1_000.0,
                comparison: Comparison::AtLeast,
            },
            reward_resource: "shards".into(),
            reward: Formula::Linear {
                base: 1.0,
                slope: 0.0,
                variable: "prestigeCount".into(),
            },
            reset_targets: vec!["energy".into(), "ingot".into()],
            retained: vec![],
            reset_generators: true,
            reset_upgrades: true,
        }],
        achievements: vec![lode_content::AchievementDef {
            id: "first-strike".into(),
            condition: Condition::GeneratorLevel {
                generator: "mine".into(),
                level: 1,
            },
            hidden: false,
        }],
        ..Default::default()
    };
    NormalizedContentPack::new(pack).expect("rich fixture pack is valid")
}

/// A player-priority command at the given step.
pub fn player_command(kind: &str, payload: Value, step: u64) -> Command {
    Command::new(kind, CommandPriority::Player, step * 100, Step(step), payload)
        .expect("fixture command is valid")
}

/// A system-priority command at the given step.
pub fn system_command(kind: &str, payload: Value, step: u64) -> Command {
    Command::new(kind, CommandPriority::System, step * 100, Step(step), payload)
        .expect("fixture command is valid")
}

/// A well-formed transport envelope for the given command fields.
pub fn envelope(
    request_id: &str,
    client_id: &str,
    kind: &str,
    payload: Value,
    step: u64,
) -> Value {
    json!({
        "requestId": request_id,
        "clientId": client_id,
        "sentAt": 1_000,
        "command": {
            "type": kind,
            "priority": 2,
            "timestamp": 1_000,
            "step": step,
            "payload": payload,
        },
    })
}
