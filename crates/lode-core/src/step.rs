//! The simulation step counter.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Monotonically increasing simulation step counter.
///
/// One step advances the simulation clock by `step_size_ms`. A tick (a
/// single call into the runtime) may execute zero or more steps.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Step(pub u64);

impl Step {
    /// The step immediately after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Signed representation, used where `-1` encodes "no step yet"
    /// (e.g. command-log metadata and automation bookkeeping).
    pub fn as_signed(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Step {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_increments() {
        assert_eq!(Step(0).next(), Step(1));
        assert_eq!(Step(41).next(), Step(42));
    }

    #[test]
    fn ordering_follows_inner_value() {
        assert!(Step(1) < Step(2));
        assert!(Step(100) > Step(99));
    }

    #[test]
    fn serializes_transparently() {
        let json = serde_json::to_string(&Step(7)).unwrap();
        assert_eq!(json, "7");
        let back: Step = serde_json::from_str("7").unwrap();
        assert_eq!(back, Step(7));
    }
}
