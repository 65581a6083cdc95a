//! Built-in command handlers, payload schemas, and authorization
//! policies.
//!
//! Registration is gated by the `systems` toggles: a shell that ships
//! without transforms simply never wires `APPLY_TRANSFORM`, and the
//! transport then short-circuits such envelopes with
//! `COMMAND_UNSUPPORTED`.

use serde_json::Value;

use lode_command::{
    CommandDispatcher, FieldKind, FieldSpec, HandlerContext, PayloadSchema, SchemaRegistry,
};
use lode_core::{CommandPolicy, CommandPriority, ExecutionError, RejectCode};

use crate::config::Systems;

/// Command type: purchase generator levels.
pub const PURCHASE_GENERATOR: &str = "PURCHASE_GENERATOR";
/// Command type: toggle a generator's enabled flag.
pub const SET_GENERATOR_ENABLED: &str = "SET_GENERATOR_ENABLED";
/// Command type: purchase an upgrade.
pub const PURCHASE_UPGRADE: &str = "PURCHASE_UPGRADE";
/// Command type: apply a prestige reset.
pub const APPLY_PRESTIGE: &str = "APPLY_PRESTIGE";
/// Command type: toggle an automation's enabled flag.
pub const SET_AUTOMATION_ENABLED: &str = "SET_AUTOMATION_ENABLED";
/// Command type: apply a transform.
pub const APPLY_TRANSFORM: &str = "APPLY_TRANSFORM";
/// Command type: credit a resource directly (system only).
pub const GRANT_RESOURCE: &str = "GRANT_RESOURCE";

fn str_field<'a>(payload: &'a Value, name: &str) -> Result<&'a str, ExecutionError> {
    payload.get(name).and_then(Value::as_str).ok_or_else(|| {
        ExecutionError::new(
            RejectCode::InvalidPayload,
            format!("missing field {name:?}"),
        )
    })
}

fn count_field(payload: &Value) -> Result<u32, ExecutionError> {
    match payload.get("count") {
        None => Ok(1),
        Some(v) => match v.as_u64() {
            // Integer columns truncate toward zero; counts additionally
            // clamp into u32 range.
            Some(n) => Ok(n.min(u64::from(u32::MAX)) as u32),
            None => Err(ExecutionError::new(
                RejectCode::InvalidPayload,
                "count must be a non-negative integer",
            )),
        },
    }
}

fn bool_field(payload: &Value, name: &str) -> Result<bool, ExecutionError> {
    payload.get(name).and_then(Value::as_bool).ok_or_else(|| {
        ExecutionError::new(
            RejectCode::InvalidPayload,
            format!("missing boolean field {name:?}"),
        )
    })
}

/// Register the built-in handlers, schemas, and policies.
pub fn register_builtin(
    dispatcher: &mut CommandDispatcher,
    schemas: &mut SchemaRegistry,
    systems: Systems,
) {
    // PURCHASE_GENERATOR — player and automation.
    schemas.register(
        PURCHASE_GENERATOR,
        PayloadSchema::object(&[
            FieldSpec::required("generatorId", FieldKind::Identifier),
            FieldSpec::optional("count", FieldKind::UInt),
        ]),
    );
    dispatcher.register(
        PURCHASE_GENERATOR,
        Box::new(|payload: &Value, ctx: &mut HandlerContext<'_, '_>| {
            let id = str_field(payload, "generatorId")?;
            let count = count_field(payload)?;
            let (_, event) = ctx.coordinator.apply_generator(ctx.stores, id, count)?;
            ctx.emit(event);
            Ok(())
        }),
    );

    // SET_GENERATOR_ENABLED.
    schemas.register(
        SET_GENERATOR_ENABLED,
        PayloadSchema::object(&[
            FieldSpec::required("generatorId", FieldKind::Identifier),
            FieldSpec::required("enabled", FieldKind::Bool),
        ]),
    );
    dispatcher.register(
        SET_GENERATOR_ENABLED,
        Box::new(|payload: &Value, ctx: &mut HandlerContext<'_, '_>| {
            let id = str_field(payload, "generatorId")?;
            let enabled = bool_field(payload, "enabled")?;
            let index = ctx.stores.generators.require_index(id).map_err(|_| {
                ExecutionError::new(RejectCode::UnknownId, format!("unknown generator {id:?}"))
            })?;
            ctx.coordinator
                .set_generator_enabled(ctx.stores, index, enabled);
            Ok(())
        }),
    );

    // PURCHASE_UPGRADE.
    schemas.register(
        PURCHASE_UPGRADE,
        PayloadSchema::object(&[
            FieldSpec::required("upgradeId", FieldKind::Identifier),
            FieldSpec::optional("count", FieldKind::UInt),
        ]),
    );
    dispatcher.register(
        PURCHASE_UPGRADE,
        Box::new(|payload: &Value, ctx: &mut HandlerContext<'_, '_>| {
            let id = str_field(payload, "upgradeId")?;
            let count = count_field(payload)?;
            let (_, event) = ctx.coordinator.apply_upgrade(ctx.stores, id, count)?;
            ctx.emit(event);
            Ok(())
        }),
    );

    // APPLY_PRESTIGE — player only; automation must never trigger a
    // destructive reset.
    schemas.register(
        APPLY_PRESTIGE,
        PayloadSchema::object(&[
            FieldSpec::required("layerId", FieldKind::Identifier),
            FieldSpec::required("confirmationToken", FieldKind::String),
        ]),
    );
    dispatcher.register_policy(
        APPLY_PRESTIGE,
        CommandPolicy::only(&[CommandPriority::Player]).with_event("PrestigeUnauthorized"),
    );
    dispatcher.register(
        APPLY_PRESTIGE,
        Box::new(|payload: &Value, ctx: &mut HandlerContext<'_, '_>| {
            let layer = str_field(payload, "layerId")?;
            let token = str_field(payload, "confirmationToken")?;
            let timestamp = ctx.timestamp;
            let event = ctx
                .coordinator
                .apply_prestige(ctx.stores, layer, token, timestamp)?;
            ctx.emit(event);
            Ok(())
        }),
    );

    // GRANT_RESOURCE — system only (offline catch-up, migrations).
    schemas.register(
        GRANT_RESOURCE,
        PayloadSchema::object(&[
            FieldSpec::required("resourceId", FieldKind::Identifier),
            FieldSpec::required("amount", FieldKind::Number),
        ]),
    );
    dispatcher.register_policy(
        GRANT_RESOURCE,
        CommandPolicy::only(&[CommandPriority::System]),
    );
    dispatcher.register(
        GRANT_RESOURCE,
        Box::new(|payload: &Value, ctx: &mut HandlerContext<'_, '_>| {
            let id = str_field(payload, "resourceId")?;
            let amount = payload
                .get("amount")
                .and_then(Value::as_f64)
                .ok_or_else(|| {
                    ExecutionError::new(RejectCode::InvalidPayload, "amount must be a number")
                })?;
            let index = ctx.stores.resources.require_index(id).map_err(|_| {
                ExecutionError::new(RejectCode::UnknownId, format!("unknown resource {id:?}"))
            })?;
            ctx.stores
                .resources
                .add_amount(index, amount)
                .map_err(|_| {
                    ExecutionError::new(RejectCode::InvalidPayload, "amount must be finite")
                })?;
            Ok(())
        }),
    );

    if systems.automation {
        schemas.register(
            SET_AUTOMATION_ENABLED,
            PayloadSchema::object(&[
                FieldSpec::required("automationId", FieldKind::Identifier),
                FieldSpec::required("enabled", FieldKind::Bool),
            ]),
        );
        dispatcher.register(
            SET_AUTOMATION_ENABLED,
            Box::new(|payload: &Value, ctx: &mut HandlerContext<'_, '_>| {
                let id = str_field(payload, "automationId")?;
                let enabled = bool_field(payload, "enabled")?;
                let index = ctx.stores.automations.require_index(id).map_err(|_| {
                    ExecutionError::new(
                        RejectCode::UnknownId,
                        format!("unknown automation {id:?}"),
                    )
                })?;
                ctx.stores.automations.set_enabled(index, enabled);
                Ok(())
            }),
        );
    }

    if systems.transforms {
        schemas.register(
            APPLY_TRANSFORM,
            PayloadSchema::object(&[FieldSpec::required(
                "transformId",
                FieldKind::Identifier,
            )]),
        );
        dispatcher.register(
            APPLY_TRANSFORM,
            Box::new(|payload: &Value, ctx: &mut HandlerContext<'_, '_>| {
                let id = str_field(payload, "transformId")?;
                let event = ctx.coordinator.apply_transform(ctx.stores, id, ctx.rng)?;
                ctx.emit(event);
                Ok(())
            }),
        );
    }
}
