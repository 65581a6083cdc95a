//! Error types for the columnar state stores.

use std::error::Error;
use std::fmt;

/// Errors from store construction, mutation, and save loading.
///
/// Construction and load errors are integrity violations: the runtime
/// aborts startup or hydration when it sees one. Mutation errors
/// (`NonFinite`) are returned to the offending handler, which must treat
/// them as a rejected command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateError {
    /// Two definitions share an id at construction.
    DuplicateId {
        /// Store kind ("resources", "generators", ...).
        store: &'static str,
        /// The duplicated id.
        id: String,
    },
    /// A lookup referenced an id the store does not contain.
    UnknownId {
        /// Store kind.
        store: &'static str,
        /// The missing id.
        id: String,
    },
    /// A numeric input was NaN or infinite.
    NonFinite {
        /// Store kind.
        store: &'static str,
        /// Column the write targeted.
        column: &'static str,
        /// Id of the row the write targeted.
        id: String,
    },
    /// Serialized column data does not line up with the store's id set.
    LoadMismatch {
        /// Store kind.
        store: &'static str,
        /// Description of the mismatch.
        reason: String,
    },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateId { store, id } => write!(f, "duplicate {store} id {id:?}"),
            Self::UnknownId { store, id } => write!(f, "unknown {store} id {id:?}"),
            Self::NonFinite { store, column, id } => {
                write!(f, "non-finite value for {store}.{column} on {id:?}")
            }
            Self::LoadMismatch { store, reason } => {
                write!(f, "serialized {store} data mismatch: {reason}")
            }
        }
    }
}

impl Error for StateError {}
