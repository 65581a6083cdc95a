//! Lode: a deterministic idle-game simulation engine.
//!
//! This is the top-level facade crate that re-exports the public API
//! from all Lode sub-crates. For most users, adding `lode` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use lode::prelude::*;
//! use lode::content::{ContentPack, CostDef, Formula, GeneratorDef, ResourceDef, YieldDef};
//! use serde_json::json;
//!
//! // A one-resource, one-generator economy.
//! let pack = ContentPack {
//!     id: "demo".into(),
//!     version: "1.0.0".into(),
//!     resources: vec![ResourceDef { id: "energy".into(), start_amount: 1.0, ..Default::default() }],
//!     generators: vec![GeneratorDef {
//!         id: "mine".into(),
//!         max_level: 0,
//!         cost: vec![CostDef { resource: "energy".into(), amount: Formula::Constant { value: 1.0 } }],
//!         production: vec![YieldDef { resource: "energy".into(), rate: Formula::Constant { value: 1.0 } }],
//!         unlocked: true,
//!         visible: true,
//!         enabled: true,
//!         unlock_condition: None,
//!         visible_condition: None,
//!     }],
//!     ..Default::default()
//! };
//!
//! let mut runtime = Runtime::new(RuntimeConfig::new(
//!     NormalizedContentPack::new(pack).unwrap(),
//! ))
//! .unwrap();
//!
//! // Buy a level and advance one step.
//! let cmd = Command::new(
//!     "PURCHASE_GENERATOR",
//!     CommandPriority::Player,
//!     0,
//!     Step(0),
//!     json!({ "generatorId": "mine", "count": 1 }),
//! )
//! .unwrap();
//! runtime.enqueue_command(cmd).unwrap();
//! let outcome = runtime.tick(100.0);
//! assert_eq!(outcome.next_step, Step(1));
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in
//! the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`core`] | `lode-core` | Steps, commands, priorities, RNG, telemetry |
//! | [`content`] | `lode-content` | Content pack model, condition/formula evaluators, digest |
//! | [`state`] | `lode-state` | Columnar stores, dirty sets, buffer pool |
//! | [`progression`] | `lode-progression` | Coordinator, purchase/prestige/transform evaluators |
//! | [`command`] | `lode-command` | Priority queue, dispatcher, payload schemas |
//! | [`save`] | `lode-save` | SaveFormat v1, canonical JSON, v0 migration |
//! | [`replay`] | `lode-replay` | Command recording and deterministic replay |
//! | [`engine`] | `lode-engine` | The runtime, event bus, worker host |
//! | [`proto`] | `lode-proto` | Transport envelopes and the worker protocol |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, RNG, and telemetry (`lode-core`).
pub use lode_core as core;

/// Content pack model and pure evaluators (`lode-content`).
pub use lode_content as content;

/// Columnar state stores and the transport buffer pool (`lode-state`).
pub use lode_state as state;

/// Progression coordination (`lode-progression`).
pub use lode_progression as progression;

/// Command queue and dispatch (`lode-command`).
pub use lode_command as command;

/// Save serialization and hydration (`lode-save`).
pub use lode_save as save;

/// Command recording and replay (`lode-replay`).
pub use lode_replay as replay;

/// The runtime and worker host (`lode-engine`).
pub use lode_engine as engine;

/// Transport envelopes and the worker protocol (`lode-proto`).
pub use lode_proto as proto;

/// Common imports for typical Lode usage.
///
/// ```rust
/// use lode::prelude::*;
/// ```
pub mod prelude {
    // Core model
    pub use lode_core::{
        Command, CommandPriority, ExecutionError, ExecutionPhase, GameRng, RejectCode, Step,
    };

    // Telemetry
    pub use lode_core::{install_telemetry, Telemetry, TelemetryHandle};

    // Content
    pub use lode_content::{
        evaluate_condition, evaluate_formula, Condition, ContentPack, Formula,
        NormalizedContentPack,
    };

    // Runtime
    pub use lode_engine::{
        Runtime, RuntimeConfig, TickOutcome, WorkerCapabilities, WorkerHost,
    };

    // Replay
    pub use lode_replay::{CommandLog, ReplaySummary};

    // Save
    pub use lode_save::{SaveError, SaveFormat};

    // Transport
    pub use lode_proto::{TransportResponse, WorkerRequest, WorkerResponse};
}
