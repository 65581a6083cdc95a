//! Deterministic fixed-step runtime for the Lode idle-game engine.
//!
//! [`Runtime`] wires the columnar stores, progression coordinator,
//! command pipeline, recorder, transport server, and event bus into a
//! single-threaded cooperative simulation: a tick is indivisible, state
//! mutates only through command handlers and the coordinator, and
//! snapshot publication is one atomic flip per tick.
//!
//! [`WorkerHost`] moves a runtime onto its own thread behind the worker
//! protocol for shells that render elsewhere.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod events;
pub mod frame;
pub mod handlers;
pub mod metrics;
pub mod runtime;
pub mod worker;

pub use config::{ConfigError, Limits, Precision, RuntimeConfig, SchedulerConfig, Systems};
pub use events::{BusEvent, EventBus, EventBusConfig, PublishReceipt, PublishState, Subscriber};
pub use frame::{Frame, FrameDelta};
pub use metrics::{RuntimeCounters, TickMetrics};
pub use runtime::{Runtime, TickOutcome};
pub use worker::{handle_request, WorkerCapabilities, WorkerHost};
