//! Dirty-marking precision policy.
//!
//! Idle-game resource amounts change every step, usually by amounts far
//! below what a renderer can display. The epsilon policy suppresses
//! dirty marks for sub-threshold deltas while accumulating the
//! suppressed drift; once the drift crosses `override_max` the row is
//! force-marked so the published view never diverges visibly from the
//! authoritative value.

/// Normalized dirty-epsilon thresholds.
///
/// Invariant after [`normalized`](DirtyEpsilon::normalized):
/// `absolute <= ceiling <= override_max`, all finite and non-negative.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirtyEpsilon {
    /// Minimum absolute delta that marks a row dirty.
    pub absolute: f64,
    /// Relative component: deltas below `relative * |current|` are
    /// suppressed.
    pub relative: f64,
    /// Upper bound on the effective threshold, so large amounts still
    /// publish reasonably often.
    pub ceiling: f64,
    /// Accumulated suppressed drift that force-marks the row.
    pub override_max: f64,
}

impl Default for DirtyEpsilon {
    fn default() -> Self {
        Self {
            absolute: 1e-9,
            relative: 1e-9,
            ceiling: 1e-6,
            override_max: 1e-3,
        }
    }
}

impl DirtyEpsilon {
    /// Build a policy from raw configuration values.
    ///
    /// Non-finite or negative inputs fall back to the default for that
    /// field; the result is then normalized so
    /// `absolute <= ceiling <= override_max`.
    pub fn normalized(absolute: f64, relative: f64, ceiling: f64, override_max: f64) -> Self {
        let defaults = Self::default();
        let pick = |raw: f64, fallback: f64| {
            if raw.is_finite() && raw >= 0.0 {
                raw
            } else {
                fallback
            }
        };
        let absolute = pick(absolute, defaults.absolute);
        let relative = pick(relative, defaults.relative);
        let mut ceiling = pick(ceiling, defaults.ceiling);
        let mut override_max = pick(override_max, defaults.override_max);

        ceiling = ceiling.max(absolute);
        override_max = override_max.max(ceiling);
        Self {
            absolute,
            relative,
            ceiling,
            override_max,
        }
    }

    /// The effective dirty threshold around a current value.
    pub fn threshold(&self, current: f64) -> f64 {
        self.absolute.max(self.relative * current.abs()).min(self.ceiling)
    }
}
