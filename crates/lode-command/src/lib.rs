//! Prioritized command queue and dispatch for the Lode idle-game engine.
//!
//! Commands flow in exactly one direction: the transport (or the
//! automation system) enqueues into [`CommandQueue`]; the runtime drains
//! due entries each step in `(priority, step, insertion)` order and
//! hands them to the [`CommandDispatcher`], which authorizes, resolves
//! the registered handler, and executes it against the store bundle.
//! Handlers never mutate state on failure and never panic — every
//! rejection is a typed [`lode_core::ExecutionError`].

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod dispatch;
pub mod queue;
pub mod schema;

pub use dispatch::{
    CommandDispatcher, CommandHandler, DispatchContext, ExecutionOutcome, HandlerContext,
};
pub use queue::{CommandQueue, QueueImportError, SerializedQueue, QUEUE_SCHEMA_VERSION};
pub use schema::{FieldKind, FieldSpec, PayloadSchema, SchemaRegistry};
