//! Generator and upgrade purchase evaluators: quote, then apply.
//!
//! A quote computes the full cost vector without touching state; apply
//! re-quotes, verifies funds, and only then mutates. Failures are typed
//! rejections with no partial mutation — either every debit and the
//! level/purchase increment land, or nothing does.

use smallvec::SmallVec;

use lode_content::evaluate_formula;
use lode_core::{ExecutionError, RejectCode};

use crate::coordinator::{ProgressionCoordinator, Stores};
use crate::events::ProgressionEvent;

/// A priced purchase: resource index → total amount, summed over the
/// levels (or purchase counts) bought.
#[derive(Clone, Debug, PartialEq)]
pub struct PurchaseQuote {
    /// Entity id the quote is for.
    pub id: String,
    /// Units (levels or purchases) priced.
    pub count: u32,
    /// Cost vector as `(resource index, amount)` pairs.
    pub costs: SmallVec<[(u32, f64); 4]>,
}

impl ProgressionCoordinator {
    /// Price `count` levels of a generator against the current state.
    ///
    /// Costs are summed level by level, so exponential curves price each
    /// step at its own level.
    pub fn quote_generator(
        &self,
        stores: &Stores<'_>,
        id: &str,
        count: u32,
    ) -> Result<PurchaseQuote, ExecutionError> {
        let Some(g) = stores.generators.index_of(id) else {
            return Err(unknown_id("generator", id));
        };
        if count == 0 {
            return Err(ExecutionError::new(
                RejectCode::InvalidPayload,
                "purchase count must be at least 1",
            ));
        }
        if !stores.generators.unlocked(g) {
            return Err(locked("generator", id));
        }
        if stores.generators.level_headroom(g) < count {
            return Err(ExecutionError::with_details(
                RejectCode::Locked,
                format!("generator {id:?} is at max level"),
                serde_json::json!({
                    "level": stores.generators.level(g),
                    "maxLevel": stores.generators.max_level(g),
                }),
            ));
        }

        let def = &self.pack.pack().generators[g as usize];
        let base_level = stores.generators.level(g);
        let mut costs: SmallVec<[(u32, f64); 4]> = SmallVec::new();
        for k in 0..count {
            let vars = [("level", f64::from(base_level + k))];
            let view = self.eval_view(stores, &vars);
            for cost in &def.cost {
                let Some(resource) = stores.resources.index_of(&cost.resource) else {
                    return Err(unknown_id("resource", &cost.resource));
                };
                let amount = evaluate_formula(&cost.amount, &view);
                accumulate(&mut costs, resource, amount);
            }
        }
        Ok(PurchaseQuote {
            id: id.to_string(),
            count,
            costs,
        })
    }

    /// Purchase `count` levels of a generator.
    ///
    /// Quotes, checks every debit against current amounts, then debits
    /// and increments atomically. Emits [`ProgressionEvent::GeneratorPurchased`].
    pub fn apply_generator(
        &mut self,
        stores: &mut Stores<'_>,
        id: &str,
        count: u32,
    ) -> Result<(PurchaseQuote, ProgressionEvent), ExecutionError> {
        let quote = self.quote_generator(stores, id, count)?;
        check_funds(stores, &quote.costs)?;

        let g = stores
            .generators
            .index_of(id)
            .expect("quoted generator exists");
        for &(resource, amount) in &quote.costs {
            // Funds were just verified; debit cannot clamp below zero.
            let _ = stores.resources.add_amount(resource, -amount);
        }
        let applied = stores.generators.increment_level(g, count);
        debug_assert_eq!(applied, count);

        let event = ProgressionEvent::GeneratorPurchased {
            id: quote.id.clone(),
            count,
            level: stores.generators.level(g),
        };
        Ok((quote, event))
    }

    /// Price `count` purchases of an upgrade against the current state.
    ///
    /// Single-purchase upgrades refuse when already owned.
    pub fn quote_upgrade(
        &self,
        stores: &Stores<'_>,
        id: &str,
        count: u32,
    ) -> Result<PurchaseQuote, ExecutionError> {
        let Some(u) = stores.upgrades.index_of(id) else {
            return Err(unknown_id("upgrade", id));
        };
        if count == 0 {
            return Err(ExecutionError::new(
                RejectCode::InvalidPayload,
                "purchase count must be at least 1",
            ));
        }
        if !stores.upgrades.unlocked(u) {
            return Err(locked("upgrade", id));
        }
        if stores.upgrades.max_purchases(u) == 1 && stores.upgrades.owned(u) {
            return Err(ExecutionError::new(
                RejectCode::Locked,
                format!("upgrade {id:?} is already owned"),
            ));
        }
        if stores.upgrades.purchase_headroom(u) < count {
            return Err(ExecutionError::new(
                RejectCode::Locked,
                format!("upgrade {id:?} is at max purchases"),
            ));
        }

        let def = &self.pack.pack().upgrades[u as usize];
        let base = stores.upgrades.purchases(u);
        let mut costs: SmallVec<[(u32, f64); 4]> = SmallVec::new();
        for k in 0..count {
            let vars = [("count", f64::from(base + k))];
            let view = self.eval_view(stores, &vars);
            for cost in &def.cost {
                let Some(resource) = stores.resources.index_of(&cost.resource) else {
                    return Err(unknown_id("resource", &cost.resource));
                };
                let amount = evaluate_formula(&cost.amount, &view);
                accumulate(&mut costs, resource, amount);
            }
        }
        Ok(PurchaseQuote {
            id: id.to_string(),
            count,
            costs,
        })
    }

    /// Purchase `count` counts of an upgrade and recompute effects.
    pub fn apply_upgrade(
        &mut self,
        stores: &mut Stores<'_>,
        id: &str,
        count: u32,
    ) -> Result<(PurchaseQuote, ProgressionEvent), ExecutionError> {
        let quote = self.quote_upgrade(stores, id, count)?;
        check_funds(stores, &quote.costs)?;

        let u = stores.upgrades.index_of(id).expect("quoted upgrade exists");
        for &(resource, amount) in &quote.costs {
            let _ = stores.resources.add_amount(resource, -amount);
        }
        let applied = stores.upgrades.increment_purchases(u, count);
        debug_assert_eq!(applied, count);
        self.recompute_effects(stores);

        let event = ProgressionEvent::UpgradePurchased {
            id: quote.id.clone(),
            purchases: stores.upgrades.purchases(u),
        };
        Ok((quote, event))
    }
}

fn accumulate(costs: &mut SmallVec<[(u32, f64); 4]>, resource: u32, amount: f64) {
    if let Some(entry) = costs.iter_mut().find(|(r, _)| *r == resource) {
        entry.1 += amount;
    } else {
        costs.push((resource, amount));
    }
}

fn check_funds(stores: &Stores<'_>, costs: &[(u32, f64)]) -> Result<(), ExecutionError> {
    for &(resource, amount) in costs {
        if !amount.is_finite() {
            return Err(ExecutionError::new(
                RejectCode::InvalidPayload,
                "cost formula produced a non-finite amount",
            ));
        }
        let available = stores.resources.amount(resource);
        if available < amount {
            let id = stores.resources.ids()[resource as usize].clone();
            return Err(ExecutionError::with_details(
                RejectCode::InsufficientFunds,
                format!("need {amount} {id}, have {available}"),
                serde_json::json!({
                    "resourceId": id,
                    "required": amount,
                    "available": available,
                }),
            ));
        }
    }
    Ok(())
}

fn unknown_id(kind: &str, id: &str) -> ExecutionError {
    ExecutionError::new(RejectCode::UnknownId, format!("unknown {kind} {id:?}"))
}

fn locked(kind: &str, id: &str) -> ExecutionError {
    ExecutionError::new(RejectCode::Locked, format!("{kind} {id:?} is locked"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_content::{
        Comparison, Condition, ContentPack, CostDef, Formula, GeneratorDef,
        NormalizedContentPack, ResourceDef, UpgradeDef,
    };
    use lode_core::telemetry::NoopTelemetry;
    use lode_state::{
        AutomationStore, DirtyEpsilon, GeneratorStore, ResourceStore, UpgradeStore,
    };
    use std::sync::Arc;

    struct World {
        resources: ResourceStore,
        generators: GeneratorStore,
        upgrades: UpgradeStore,
        automations: AutomationStore,
        coordinator: ProgressionCoordinator,
    }

    fn world() -> World {
        let pack = ContentPack {
            id: "test".into(),
            version: "1".into(),
            resources: vec![ResourceDef {
                id: "energy".into(),
                start_amount: 100.0,
                ..Default::default()
            }],
            generators: vec![
                GeneratorDef {
                    id: "mine".into(),
                    max_level: 3,
                    cost: vec![CostDef {
                        resource: "energy".into(),
                        amount: Formula::Linear {
                            base: 10.0,
                            slope: 10.0,
                            variable: "level".into(),
                        },
                    }],
                    production: vec![],
                    unlocked: true,
                    visible: true,
                    enabled: true,
                    unlock_condition: None,
                    visible_condition: None,
                },
                GeneratorDef {
                    id: "reactor".into(),
                    max_level: 0,
                    cost: vec![],
                    production: vec![],
                    unlocked: false,
                    visible: false,
                    enabled: true,
                    unlock_condition: Some(Condition::ResourceThreshold {
                        resource: "energy".into(),
                        amount: 1e9,
                        comparison: Comparison::AtLeast,
                    }),
                    visible_condition: None,
                },
            ],
            upgrades: vec![UpgradeDef {
                id: "drill".into(),
                cost: vec![CostDef {
                    resource: "energy".into(),
                    amount: Formula::Constant { value: 30.0 },
                }],
                max_purchases: 1,
                effects: vec![],
                unlock_condition: None,
            }],
            ..Default::default()
        };
        let pack = Arc::new(NormalizedContentPack::new(pack).unwrap());
        let telemetry: lode_core::TelemetryHandle = Arc::new(NoopTelemetry);
        let resources = ResourceStore::new(
            &pack.pack().resources,
            DirtyEpsilon::default(),
            telemetry.clone(),
        )
        .unwrap();
        let generators = GeneratorStore::new(&pack.pack().generators).unwrap();
        let upgrades = UpgradeStore::new(&pack.pack().upgrades).unwrap();
        let automations = AutomationStore::new(&[]).unwrap();
        let coordinator = ProgressionCoordinator::new(pack, &resources, telemetry).unwrap();
        World {
            resources,
            generators,
            upgrades,
            automations,
            coordinator,
        }
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

    // ── generator quotes ───────────────────────────────────────

    #[test]
    fn quote_sums_per_level_costs() {
        let mut w = world();
        let stores = stores!(w);
        // Levels 0 and 1: (10 + 0) + (10 + 10) = 30.
        let quote = w.coordinator.quote_generator(&stores, "mine", 2).unwrap();
        assert_eq!(quote.costs.len(), 1);
        assert_eq!(quote.costs[0], (0, 30.0));
    }

    #[test]
    fn quote_does_not_mutate() {
        let mut w = world();
        let stores = stores!(w);
        let _ = w.coordinator.quote_generator(&stores, "mine", 2).unwrap();
        drop(stores);
        assert_eq!(w.resources.amount(0), 100.0);
        assert_eq!(w.generators.level(0), 0);
    }

    #[test]
    fn quote_unknown_generator() {
        let mut w = world();
        let stores = stores!(w);
        let err = w.coordinator.quote_generator(&stores, "ghost", 1).unwrap_err();
        assert_eq!(err.code, RejectCode::UnknownId);
    }

    #[test]
    fn quote_locked_generator() {
        let mut w = world();
        let stores = stores!(w);
        let err = w
            .coordinator
            .quote_generator(&stores, "reactor", 1)
            .unwrap_err();
        assert_eq!(err.code, RejectCode::Locked);
    }

    #[test]
    fn quote_beyond_max_level() {
        let mut w = world();
        let stores = stores!(w);
        let err = w.coordinator.quote_generator(&stores, "mine", 4).unwrap_err();
        assert_eq!(err.code, RejectCode::Locked);
    }

    // ── generator purchases ────────────────────────────────────

    #[test]
    fn apply_debits_and_levels_atomically() {
        let mut w = world();
        let mut stores = stores!(w);
        let (quote, event) = w
            .coordinator
            .apply_generator(&mut stores, "mine", 2)
            .unwrap();
        assert_eq!(quote.costs[0].1, 30.0);
        drop(stores);
        assert_eq!(w.resources.amount(0), 70.0);
        assert_eq!(w.generators.level(0), 2);
        assert!(matches!(
            event,
            ProgressionEvent::GeneratorPurchased { count: 2, level: 2, .. }
        ));
    }

    #[test]
    fn insufficient_funds_leaves_state_untouched() {
        let mut w = world();
        w.resources.set_amount(0, 5.0).unwrap();
        let mut stores = stores!(w);
        let err = w
            .coordinator
            .apply_generator(&mut stores, "mine", 1)
            .unwrap_err();
        assert_eq!(err.code, RejectCode::InsufficientFunds);
        drop(stores);
        assert_eq!(w.resources.amount(0), 5.0);
        assert_eq!(w.generators.level(0), 0);
    }

    // ── upgrades ───────────────────────────────────────────────

    #[test]
    fn single_purchase_upgrade_refuses_second_buy() {
        let mut w = world();
        let mut stores = stores!(w);
        w.coordinator.apply_upgrade(&mut stores, "drill", 1).unwrap();
        let err = w
            .coordinator
            .apply_upgrade(&mut stores, "drill", 1)
            .unwrap_err();
        assert_eq!(err.code, RejectCode::Locked);
        assert!(err.message.contains("already owned"));
        drop(stores);
        assert_eq!(w.resources.amount(0), 70.0);
        assert_eq!(w.upgrades.purchases(0), 1);
    }

    #[test]
    fn upgrade_quote_prices_with_count_variable() {
        let mut w = world();
        let stores = stores!(w);
        let quote = w.coordinator.quote_upgrade(&stores, "drill", 1).unwrap();
        assert_eq!(quote.costs[0], (0, 30.0));
    }
}
