//! Progression events emitted on state transitions.
//!
//! Events are collected per step and published to the runtime event bus
//! in emission order, which is deterministic: gates evaluate in content
//! pack order, then production, then automations.

use serde::Serialize;

use lode_core::Step;

/// A progression state transition.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProgressionEvent {
    /// A resource's unlock gate was satisfied.
    ResourceUnlocked {
        /// Resource id.
        id: String,
    },
    /// A resource's visibility changed.
    ResourceVisibilityChanged {
        /// Resource id.
        id: String,
        /// New visibility.
        visible: bool,
    },
    /// A generator's unlock gate was satisfied.
    GeneratorUnlocked {
        /// Generator id.
        id: String,
    },
    /// A generator's visibility changed.
    GeneratorVisibilityChanged {
        /// Generator id.
        id: String,
        /// New visibility.
        visible: bool,
    },
    /// A generator purchase was applied.
    GeneratorPurchased {
        /// Generator id.
        id: String,
        /// Levels bought in this purchase.
        count: u32,
        /// Level after the purchase.
        level: u32,
    },
    /// An upgrade's unlock gate was satisfied.
    UpgradeUnlocked {
        /// Upgrade id.
        id: String,
    },
    /// An upgrade purchase was applied.
    UpgradePurchased {
        /// Upgrade id.
        id: String,
        /// Purchase count after the purchase.
        purchases: u32,
    },
    /// An automation's unlock gate was satisfied.
    AutomationUnlocked {
        /// Automation id.
        id: String,
    },
    /// An automation fired its command.
    AutomationFired {
        /// Automation id.
        id: String,
        /// Step the automation fired at.
        step: Step,
    },
    /// A transform was applied.
    TransformApplied {
        /// Transform id.
        id: String,
        /// Whether the PRD bonus procced.
        bonus: bool,
    },
    /// A transform's unlock gate was satisfied.
    TransformUnlocked {
        /// Transform id.
        id: String,
    },
    /// A prestige layer's unlock gate was satisfied for the first time
    /// since it last regressed.
    PrestigeUnlocked {
        /// Layer id.
        layer: String,
    },
    /// A prestige reset completed.
    PrestigeApplied {
        /// Layer id.
        layer: String,
        /// Reward credited.
        reward: f64,
    },
    /// An achievement unlocked (one-way).
    AchievementUnlocked {
        /// Achievement id.
        id: String,
    },
}

impl ProgressionEvent {
    /// The event bus channel this event publishes on.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::PrestigeUnlocked { .. } | Self::PrestigeApplied { .. } => "prestige",
            Self::AchievementUnlocked { .. } => "achievements",
            Self::AutomationFired { .. } | Self::AutomationUnlocked { .. } => "automation",
            _ => "progression",
        }
    }

    /// Stable event name for telemetry.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ResourceUnlocked { .. } => "ResourceUnlocked",
            Self::ResourceVisibilityChanged { .. } => "ResourceVisibilityChanged",
            Self::GeneratorUnlocked { .. } => "GeneratorUnlocked",
            Self::GeneratorVisibilityChanged { .. } => "GeneratorVisibilityChanged",
            Self::GeneratorPurchased { .. } => "GeneratorPurchased",
            Self::UpgradeUnlocked { .. } => "UpgradeUnlocked",
            Self::UpgradePurchased { .. } => "UpgradePurchased",
            Self::AutomationUnlocked { .. } => "AutomationUnlocked",
            Self::AutomationFired { .. } => "AutomationFired",
            Self::TransformApplied { .. } => "TransformApplied",
            Self::TransformUnlocked { .. } => "TransformUnlocked",
            Self::PrestigeUnlocked { .. } => "PrestigeUnlocked",
            Self::PrestigeApplied { .. } => "PrestigeApplied",
            Self::AchievementUnlocked { .. } => "AchievementUnlocked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_route_by_subsystem() {
        assert_eq!(
            ProgressionEvent::ResourceUnlocked { id: "x".into() }.channel(),
            "progression"
        );
        assert_eq!(
            ProgressionEvent::PrestigeApplied {
                layer: "a".into(),
                reward: 1.0
            }
            .channel(),
            "prestige"
        );
        assert_eq!(
            ProgressionEvent::AutomationFired {
                id: "a".into(),
                step: Step(3)
            }
            .channel(),
            "automation"
        );
    }

    #[test]
    fn serializes_with_kind_tag() {
        let event = ProgressionEvent::GeneratorPurchased {
            id: "mine".into(),
            count: 2,
            level: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], serde_json::json!("generatorPurchased"));
        assert_eq!(json["level"], serde_json::json!(5));
    }
}
