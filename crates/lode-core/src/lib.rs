//! Core types and facades for the Lode idle-game simulation engine.
//!
//! This is the leaf crate with zero internal Lode dependencies. It defines
//! the fundamental abstractions used throughout the Lode workspace: the
//! step counter, validated identifiers, the immutable command model with
//! its priority classes and authorization table, the deterministic RNG,
//! shared error kinds, and the pluggable telemetry facade.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod command;
pub mod error;
pub mod ident;
pub mod rng;
pub mod step;
pub mod telemetry;

// Re-export core types at crate root for convenience.
pub use command::{
    AuthorizationTable, Command, CommandPolicy, CommandPriority, ExecutionPhase,
    MAX_PAYLOAD_DEPTH,
};
pub use error::{CommandError, ExecutionError, RejectCode};
pub use ident::{validate_identifier, IdentifierError, MAX_IDENTIFIER_LEN};
pub use rng::GameRng;
pub use step::Step;
pub use telemetry::{
    install_telemetry, telemetry, CountingTelemetry, LogTelemetry, NoopTelemetry, Telemetry,
    TelemetryHandle,
};
