//! Prestige evaluation: status quotes and the confirmed reset.
//!
//! A prestige reset is destructive and irreversible, so applying one
//! requires a confirmation token from the shell. Tokens are single-use
//! within a 60-second window measured on *command timestamps* — wall
//! clock never enters the simulation — so a double-submitted reset
//! command can never fire twice.
//!
//! Reward semantics: the reward formula evaluates against the pre-reset
//! state, then reset targets fall to their start amounts, generators and
//! upgrades reset (when configured), the reward lands, and the layer's
//! companion `<layerId>-prestige-count` resource increments.

use indexmap::IndexMap;

use lode_content::{evaluate_condition, evaluate_formula};
use lode_core::{ExecutionError, RejectCode};

use crate::coordinator::{ProgressionCoordinator, Stores};
use crate::events::ProgressionEvent;

/// Confirmation tokens expire this many milliseconds after first use.
pub(crate) const TOKEN_TTL_MS: u64 = 60_000;

/// Availability of a prestige layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrestigeStatus {
    /// The unlock gate is unsatisfied and the layer has never completed.
    Locked,
    /// The unlock gate is satisfied; the layer may be applied.
    Available,
    /// The layer has completed at least once and the gate is currently
    /// unsatisfied (the usual post-reset state).
    Completed,
}

/// A prestige status quote with the reward preview.
#[derive(Clone, Debug, PartialEq)]
pub struct PrestigeQuote {
    /// Layer id.
    pub layer: String,
    /// Current availability.
    pub status: PrestigeStatus,
    /// Reward the player would receive right now.
    pub reward: f64,
    /// Resource the reward credits.
    pub reward_resource: String,
    /// Times the layer has completed.
    pub count: u32,
}

/// Single-use confirmation-token ledger with TTL pruning.
#[derive(Debug, Default)]
pub(crate) struct TokenLedger {
    used: IndexMap<String, u64>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a token at `now_ms`. Fails when the token was already
    /// used inside the TTL window.
    pub fn consume(&mut self, token: &str, now_ms: u64) -> Result<(), ()> {
        self.used
            .retain(|_, &mut used_at| now_ms.saturating_sub(used_at) < TOKEN_TTL_MS);
        if self.used.contains_key(token) {
            return Err(());
        }
        self.used.insert(token.to_string(), now_ms);
        Ok(())
    }
}

impl ProgressionCoordinator {
    /// Quote a prestige layer: status and reward preview.
    pub fn quote_prestige(
        &self,
        stores: &Stores<'_>,
        layer_id: &str,
    ) -> Result<PrestigeQuote, ExecutionError> {
        let Some(li) = self.pack.prestige_index(layer_id) else {
            return Err(ExecutionError::new(
                RejectCode::UnknownId,
                format!("unknown prestige layer {layer_id:?}"),
            ));
        };
        let layer = &self.pack.pack().prestige_layers[li as usize];
        let count_resource = self.prestige_count_resource[li as usize];
        let count = stores.resources.amount(count_resource) as u32;

        let vars = [("prestigeCount", f64::from(count))];
        let view = self.eval_view(stores, &vars);
        let gate_open = evaluate_condition(&layer.unlock_condition, &view);
        let status = if gate_open {
            PrestigeStatus::Available
        } else if count > 0 {
            PrestigeStatus::Completed
        } else {
            PrestigeStatus::Locked
        };
        let reward = evaluate_formula(&layer.reward, &view);

        Ok(PrestigeQuote {
            layer: layer_id.to_string(),
            status,
            reward,
            reward_resource: layer.reward_resource.clone(),
            count,
        })
    }

    /// Apply a prestige reset.
    ///
    /// `confirmation_token` is mandatory, single-use, and expires
    /// [`TOKEN_TTL_MS`] after first use; `now_ms` is the submitting
    /// command's timestamp. No state changes on any failure path.
    pub fn apply_prestige(
        &mut self,
        stores: &mut Stores<'_>,
        layer_id: &str,
        confirmation_token: &str,
        now_ms: u64,
    ) -> Result<ProgressionEvent, ExecutionError> {
        let quote = self.quote_prestige(stores, layer_id)?;

        if confirmation_token.trim().is_empty() {
            return Err(ExecutionError::new(
                RejectCode::ConfirmationRequired,
                "prestige requires a confirmation token",
            ));
        }
        if quote.status != PrestigeStatus::Available {
            return Err(ExecutionError::new(
                RejectCode::Locked,
                format!("prestige layer {layer_id:?} is not available"),
            ));
        }
        if !quote.reward.is_finite() {
            return Err(ExecutionError::new(
                RejectCode::InvalidPayload,
                "prestige reward formula produced a non-finite value",
            ));
        }
        if self.tokens.consume(confirmation_token, now_ms).is_err() {
            self.telemetry.record_error(
                "PrestigeResetDuplicateToken",
                Some(&serde_json::json!({ "layer": layer_id })),
            );
            return Err(ExecutionError::new(
                RejectCode::ConfirmationRequired,
                "Confirmation token has already been used",
            ));
        }

        let li = self
            .pack
            .prestige_index(layer_id)
            .expect("quoted layer exists");
        let layer = self.pack.pack().prestige_layers[li as usize].clone();

        // Reset targeted resources, honoring the retained list.
        for target in &layer.reset_targets {
            if layer.retained.iter().any(|r| r == target) {
                continue;
            }
            if let Some(ri) = stores.resources.index_of(target) {
                stores.resources.reset_to_start(ri);
            }
        }
        if layer.reset_generators {
            for gi in 0..stores.generators.len() as u32 {
                stores.generators.set_level(gi, 0);
            }
        }
        if layer.reset_upgrades {
            for ui in 0..stores.upgrades.len() as u32 {
                stores.upgrades.set_purchases(ui, 0);
            }
            self.recompute_effects(stores);
        }

        // Credit the reward and bump the completion counter.
        if let Some(reward_resource) = stores.resources.index_of(&layer.reward_resource) {
            let _ = stores.resources.add_amount(reward_resource, quote.reward);
        }
        let count_resource = self.prestige_count_resource[li as usize];
        let _ = stores.resources.add_amount(count_resource, 1.0);

        self.telemetry.record_progress(
            "PrestigeApplied",
            Some(&serde_json::json!({ "layer": layer_id, "reward": quote.reward })),
        );
        Ok(ProgressionEvent::PrestigeApplied {
            layer: layer_id.to_string(),
            reward: quote.reward,
        })
    }
}
