//! Transport envelopes and worker protocol schemas for the Lode engine.
//!
//! The [`server`] module implements the command transport boundary:
//! ordered envelope validation with stable error codes, composite
//! `(clientId, requestId)` idempotency, and outcome resolution for
//! subscribers. The [`worker`] module defines the protocol-version-2
//! message schemas exchanged between a rendering host and the compute
//! worker hosting the runtime.
//!
//! Everything here validates at the boundary and never trusts the
//! payload again downstream — queue capacity is spent only on
//! well-formed commands.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod server;
pub mod worker;

pub use server::{
    CommandSink, EnvelopeStatus, OutcomeResponse, TransportConfig, TransportResponse,
    TransportServer,
};
pub use worker::{
    parse_request, ProtocolError, WorkerRequest, WorkerResponse, PROTOCOL_VERSION,
};
