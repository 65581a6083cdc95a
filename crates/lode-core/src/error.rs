//! Shared error kinds for command construction and handler rejection.
//!
//! Command handlers never panic and never propagate errors as exceptions:
//! they return an [`ExecutionError`] carrying a stable [`RejectCode`], a
//! human-readable message, and optional structured details. Only integrity
//! violations (duplicate IDs at init, replay preconditions, digest
//! mismatches) surface as hard errors from the owning subsystems.

use std::error::Error;
use std::fmt;

use serde_json::Value;

use crate::ident::IdentifierError;

/// Stable rejection codes surfaced to command submitters.
///
/// These map one-to-one onto the wire-level `error.code` strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RejectCode {
    /// The command queue is at capacity (`COMMAND_REJECTED`).
    CommandRejected,
    /// The command's priority is not permitted for its type
    /// (`COMMAND_UNAUTHORIZED`).
    CommandUnauthorized,
    /// No handler is registered for the command type
    /// (`COMMAND_UNSUPPORTED`).
    CommandUnsupported,
    /// The payload failed the command type's schema check
    /// (`INVALID_COMMAND_PAYLOAD`).
    InvalidPayload,
    /// A purchase could not be funded (`INSUFFICIENT_FUNDS`).
    InsufficientFunds,
    /// The target entity exists but is still locked (`LOCKED`).
    Locked,
    /// The referenced entity id is unknown (`UNKNOWN_ID`).
    UnknownId,
    /// A mandatory confirmation token was missing or invalid
    /// (`CONFIRMATION_REQUIRED`).
    ConfirmationRequired,
}

impl RejectCode {
    /// The stable wire string for this code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CommandRejected => "COMMAND_REJECTED",
            Self::CommandUnauthorized => "COMMAND_UNAUTHORIZED",
            Self::CommandUnsupported => "COMMAND_UNSUPPORTED",
            Self::InvalidPayload => "INVALID_COMMAND_PAYLOAD",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::Locked => "LOCKED",
            Self::UnknownId => "UNKNOWN_ID",
            Self::ConfirmationRequired => "CONFIRMATION_REQUIRED",
        }
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed rejection returned by command handlers.
///
/// Carries no partial-mutation implication: a handler returning this
/// guarantees it left the authoritative state untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionError {
    /// Stable rejection code.
    pub code: RejectCode,
    /// Human-readable explanation.
    pub message: String,
    /// Optional structured context (entity ids, shortfalls, ...).
    pub details: Option<Value>,
}

impl ExecutionError {
    /// Construct a rejection with no structured details.
    pub fn new(code: RejectCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Construct a rejection carrying structured details.
    pub fn with_details(code: RejectCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl Error for ExecutionError {}

/// Errors detected while constructing a [`Command`](crate::Command).
#[derive(Clone, Debug, PartialEq)]
pub enum CommandError {
    /// The command type is empty or whitespace-only.
    EmptyKind,
    /// The command type has leading or trailing whitespace.
    UntrimmedKind {
        /// The offending type string.
        kind: String,
    },
    /// The payload nests deeper than the supported limit.
    PayloadTooDeep {
        /// Observed nesting depth.
        depth: usize,
    },
    /// The embedded request id failed identifier validation.
    InvalidRequestId(IdentifierError),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyKind => write!(f, "command type is empty"),
            Self::UntrimmedKind { kind } => {
                write!(f, "command type {kind:?} has surrounding whitespace")
            }
            Self::PayloadTooDeep { depth } => {
                write!(f, "command payload nests {depth} levels deep")
            }
            Self::InvalidRequestId(e) => write!(f, "command requestId: {e}"),
        }
    }
}

impl Error for CommandError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidRequestId(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IdentifierError> for CommandError {
    fn from(e: IdentifierError) -> Self {
        Self::InvalidRequestId(e)
    }
}
