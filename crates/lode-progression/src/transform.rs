//! Transform evaluation: resource conversion with PRD bonus procs.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use lode_content::evaluate_formula;
use lode_core::{ExecutionError, GameRng, RejectCode};

use crate::coordinator::{ProgressionCoordinator, Stores};
use crate::events::ProgressionEvent;

/// Serialized transform state (the save's `transforms` key).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedTransforms {
    /// Transform ids in column order.
    pub ids: Vec<String>,
    /// Application counters.
    pub applied: Vec<u64>,
    /// Unlock column (0/1).
    pub unlocked: Vec<u8>,
}

impl ProgressionCoordinator {
    /// Apply a transform once: debit inputs, credit outputs, roll the
    /// PRD bonus. No state changes on failure.
    pub fn apply_transform(
        &mut self,
        stores: &mut Stores<'_>,
        id: &str,
        rng: &mut GameRng,
    ) -> Result<ProgressionEvent, ExecutionError> {
        let Some(ti) = self.pack.transform_index(id) else {
            return Err(ExecutionError::new(
                RejectCode::UnknownId,
                format!("unknown transform {id:?}"),
            ));
        };
        if !self.transform_unlocked(ti) {
            return Err(ExecutionError::new(
                RejectCode::Locked,
                format!("transform {id:?} is locked"),
            ));
        }
        let def = self.pack.pack().transforms[ti as usize].clone();

        // Price inputs and outputs against the current state.
        let mut debits: SmallVec<[(u32, f64); 4]> = SmallVec::new();
        let mut credits: SmallVec<[(u32, f64); 4]> = SmallVec::new();
        {
            let applied = self.transform_applied[ti as usize];
            let vars = [("applied", applied as f64)];
            let view = self.eval_view(stores, &vars);
            for input in &def.inputs {
                let Some(r) = stores.resources.index_of(&input.resource) else {
                    return Err(ExecutionError::new(
                        RejectCode::UnknownId,
                        format!("unknown resource {:?}", input.resource),
                    ));
                };
                debits.push((r, evaluate_formula(&input.amount, &view)));
            }
            for output in &def.outputs {
                let Some(r) = stores.resources.index_of(&output.resource) else {
                    return Err(ExecutionError::new(
                        RejectCode::UnknownId,
                        format!("unknown resource {:?}", output.resource),
                    ));
                };
                credits.push((r, evaluate_formula(&output.rate, &view)));
            }
        }

        for &(resource, amount) in &debits {
            if !amount.is_finite() {
                return Err(ExecutionError::new(
                    RejectCode::InvalidPayload,
                    "transform input formula produced a non-finite amount",
                ));
            }
            let available = stores.resources.amount(resource);
            if available < amount {
                let rid = stores.resources.ids()[resource as usize].clone();
                return Err(ExecutionError::with_details(
                    RejectCode::InsufficientFunds,
                    format!("need {amount} {rid}, have {available}"),
                    serde_json::json!({ "resourceId": rid, "required": amount }),
                ));
            }
        }

        for &(resource, amount) in &debits {
            let _ = stores.resources.add_amount(resource, -amount);
        }
        for &(resource, amount) in &credits {
            if amount.is_finite() {
                let _ = stores.resources.add_amount(resource, amount);
            }
        }

        // PRD-smoothed bonus outputs.
        let mut bonus_procced = false;
        if let Some(bonus) = &def.bonus {
            if self.prd.roll(ti, bonus.chance, rng) {
                bonus_procced = true;
                let applied = self.transform_applied[ti as usize];
                let vars = [("applied", applied as f64)];
                let mut bonus_credits: SmallVec<[(u32, f64); 4]> = SmallVec::new();
                {
                    let view = self.eval_view(stores, &vars);
                    for output in &bonus.outputs {
                        if let Some(r) = stores.resources.index_of(&output.resource) {
                            bonus_credits.push((r, evaluate_formula(&output.rate, &view)));
                        }
                    }
                }
                for &(resource, amount) in &bonus_credits {
                    if amount.is_finite() {
                        let _ = stores.resources.add_amount(resource, amount);
                    }
                }
            }
        }

        self.transform_applied[ti as usize] += 1;
        Ok(ProgressionEvent::TransformApplied {
            id: id.to_string(),
            bonus: bonus_procced,
        })
    }

    /// Export transform counters for the save file.
    pub fn export_transforms(&self) -> SerializedTransforms {
        SerializedTransforms {
            ids: self
                .pack
                .pack()
                .transforms
                .iter()
                .map(|t| t.id.clone())
                .collect(),
            applied: self.transform_applied.clone(),
            unlocked: self.transform_unlocked.clone(),
        }
    }

    /// Load transform counters from a save. Shape mismatches reset the
    /// counters instead of failing (they are cosmetic, not economy
    /// state).
    pub fn load_transforms(&mut self, data: &SerializedTransforms) {
        let n = self.transform_applied.len();
        if data.ids.len() == n && data.applied.len() == n && data.unlocked.len() == n {
            self.transform_applied.copy_from_slice(&data.applied);
            for (i, &u) in data.unlocked.iter().enumerate() {
                self.transform_unlocked[i] = u8::from(u != 0);
            }
        } else {
            self.transform_applied.fill(0);
        }
    }

    /// Export PRD counters for the save file.
    pub fn export_prd(&self) -> crate::prd::SerializedPrd {
        self.prd.export_for_save()
    }

    /// Load PRD counters from a save.
    pub fn load_prd(&mut self, data: &crate::prd::SerializedPrd) {
        self.prd.load_from_save(data);
    }
}
