//! Identifier validation shared by the transport, the worker protocol,
//! and prestige confirmation tokens.
//!
//! Identifiers conform to `^[A-Za-z0-9_-]{1,64}$`. Validation is split
//! into three ordered checks so callers can map each failure to its own
//! wire error code: empty/whitespace-only, character set, then length.

use std::error::Error;
use std::fmt;

/// Maximum identifier length in bytes (the character set is ASCII, so
/// bytes and characters coincide).
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Reasons an identifier fails validation, in check order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentifierError {
    /// The identifier is empty or contains only whitespace
    /// (`INVALID_IDENTIFIER`).
    Empty,
    /// The identifier contains a character outside `[A-Za-z0-9_-]`,
    /// including surrounding whitespace (`INVALID_IDENTIFIER_FORMAT`).
    InvalidFormat,
    /// The identifier exceeds [`MAX_IDENTIFIER_LEN`]
    /// (`IDENTIFIER_TOO_LONG`).
    TooLong {
        /// Actual length of the rejected identifier.
        len: usize,
    },
}

impl fmt::Display for IdentifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "identifier is empty"),
            Self::InvalidFormat => {
                write!(f, "identifier contains characters outside [A-Za-z0-9_-]")
            }
            Self::TooLong { len } => {
                write!(f, "identifier length {len} exceeds {MAX_IDENTIFIER_LEN}")
            }
        }
    }
}

impl Error for IdentifierError {}

/// Validate an identifier against `^[A-Za-z0-9_-]{1,64}$`.
///
/// Checks run in a fixed order — empty, format, length — so the first
/// failure determines the reported error. An identifier with leading or
/// trailing whitespace is a *format* error, not an empty error, as long
/// as it contains any non-whitespace character.
pub fn validate_identifier(raw: &str) -> Result<(), IdentifierError> {
    if raw.trim().is_empty() {
        return Err(IdentifierError::Empty);
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(IdentifierError::InvalidFormat);
    }
    if raw.len() > MAX_IDENTIFIER_LEN {
        return Err(IdentifierError::TooLong { len: raw.len() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_identifiers() {
        assert_eq!(validate_identifier("r1"), Ok(()));
        assert_eq!(validate_identifier("client_A-7"), Ok(()));
        assert_eq!(validate_identifier(&"x".repeat(64)), Ok(()));
    }

    #[test]
    fn rejects_empty_and_whitespace_only() {
        assert_eq!(validate_identifier(""), Err(IdentifierError::Empty));
        assert_eq!(validate_identifier("   "), Err(IdentifierError::Empty));
        assert_eq!(validate_identifier("\t\n"), Err(IdentifierError::Empty));
    }

    #[test]
    fn leading_whitespace_is_a_format_error() {
        // " r1" contains a non-whitespace character, so it passes the
        // empty check and fails on format instead.
        assert_eq!(validate_identifier(" r1"), Err(IdentifierError::InvalidFormat));
        assert_eq!(validate_identifier("r1 "), Err(IdentifierError::InvalidFormat));
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert_eq!(validate_identifier("a.b"), Err(IdentifierError::InvalidFormat));
        assert_eq!(validate_identifier("a/b"), Err(IdentifierError::InvalidFormat));
        assert_eq!(validate_identifier("naïve"), Err(IdentifierError::InvalidFormat));
    }

    #[test]
    fn rejects_overlong_identifiers() {
        let id = "y".repeat(65);
        assert_eq!(
            validate_identifier(&id),
            Err(IdentifierError::TooLong { len: 65 })
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn valid_identifiers_always_pass(id in "[A-Za-z0-9_-]{1,64}") {
                prop_assert_eq!(validate_identifier(&id), Ok(()));
            }

            #[test]
            fn validation_never_panics(raw in ".{0,128}") {
                let _ = validate_identifier(&raw);
            }
        }
    }
}
