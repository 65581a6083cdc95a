//! Runtime configuration and validation.

use std::error::Error;
use std::fmt;

use lode_content::NormalizedContentPack;
use lode_state::DirtyEpsilon;

/// Scheduler settings for the worker-host thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct SchedulerConfig {
    /// Tick interval in milliseconds. `None`, zero, negative, or
    /// non-finite values fall back to `step_size_ms`.
    pub interval_ms: Option<f64>,
}

impl SchedulerConfig {
    /// The effective interval, clamped to at least 1 ms.
    pub fn resolved_interval_ms(&self, step_size_ms: u64) -> u64 {
        match self.interval_ms {
            Some(v) if v.is_finite() && v > 0.0 => (v as u64).max(1),
            _ => step_size_ms.max(1),
        }
    }
}

/// Hard limits.
#[derive(Clone, Copy, Debug)]
pub struct Limits {
    /// Maximum commands buffered in the queue.
    pub max_command_queue_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_command_queue_size: 256,
        }
    }
}

/// Raw dirty-epsilon settings; normalized into a
/// [`DirtyEpsilon`] at runtime construction.
#[derive(Clone, Copy, Debug)]
pub struct Precision {
    /// Minimum absolute delta that marks a resource dirty.
    pub dirty_epsilon_absolute: f64,
    /// Relative threshold component.
    pub dirty_epsilon_relative: f64,
    /// Upper bound on the effective threshold.
    pub dirty_epsilon_ceiling: f64,
    /// Suppressed-drift budget that forces a publish.
    pub dirty_epsilon_override_max: f64,
}

impl Default for Precision {
    fn default() -> Self {
        let defaults = DirtyEpsilon::default();
        Self {
            dirty_epsilon_absolute: defaults.absolute,
            dirty_epsilon_relative: defaults.relative,
            dirty_epsilon_ceiling: defaults.ceiling,
            dirty_epsilon_override_max: defaults.override_max,
        }
    }
}

impl Precision {
    /// Normalize into the store-level policy. Non-conforming values
    /// fall back to defaults and the ordering invariant is enforced.
    pub fn normalized(&self) -> DirtyEpsilon {
        DirtyEpsilon::normalized(
            self.dirty_epsilon_absolute,
            self.dirty_epsilon_relative,
            self.dirty_epsilon_ceiling,
            self.dirty_epsilon_override_max,
        )
    }
}

/// Optional subsystem toggles gating handler registration.
#[derive(Clone, Copy, Debug)]
pub struct Systems {
    /// Register automation handlers and run the automation phase.
    pub automation: bool,
    /// Register transform handlers.
    pub transforms: bool,
}

impl Default for Systems {
    fn default() -> Self {
        Self {
            automation: true,
            transforms: true,
        }
    }
}

/// Complete configuration for constructing a [`Runtime`](crate::Runtime).
pub struct RuntimeConfig {
    /// The validated content pack.
    pub content_pack: NormalizedContentPack,
    /// Simulation step size in milliseconds. Default: 100.
    pub step_size_ms: u64,
    /// Maximum steps executed per tick call. Default: 20.
    pub max_steps_per_frame: u32,
    /// Worker-host scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Hard limits.
    pub limits: Limits,
    /// Dirty-epsilon precision settings.
    pub precision: Precision,
    /// Subsystem toggles.
    pub systems: Systems,
    /// RNG seed; `None` seeds from the content digest for determinism
    /// without configuration.
    pub rng_seed: Option<u64>,
}

impl RuntimeConfig {
    /// A configuration with defaults for everything but the pack.
    pub fn new(content_pack: NormalizedContentPack) -> Self {
        Self {
            content_pack,
            step_size_ms: 100,
            max_steps_per_frame: 20,
            scheduler: SchedulerConfig::default(),
            limits: Limits::default(),
            precision: Precision::default(),
            systems: Systems::default(),
            rng_seed: None,
        }
    }

    /// Validate all structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_size_ms == 0 {
            return Err(ConfigError::ZeroStepSize);
        }
        if self.max_steps_per_frame == 0 {
            return Err(ConfigError::ZeroStepBudget);
        }
        if self.limits.max_command_queue_size == 0 {
            return Err(ConfigError::QueueCapacityZero);
        }
        Ok(())
    }
}

/// Errors detected during [`RuntimeConfig::validate`] or runtime
/// construction.
#[derive(Debug)]
pub enum ConfigError {
    /// `step_size_ms` is zero.
    ZeroStepSize,
    /// `max_steps_per_frame` is zero.
    ZeroStepBudget,
    /// `limits.max_command_queue_size` is zero.
    QueueCapacityZero,
    /// A store rejected the content pack at construction.
    State(lode_state::StateError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroStepSize => write!(f, "stepSizeMs must be a positive integer"),
            Self::ZeroStepBudget => write!(f, "maxStepsPerFrame must be a positive integer"),
            Self::QueueCapacityZero => {
                write!(f, "limits.maxCommandQueueSize must be at least 1")
            }
            Self::State(e) => write!(f, "store construction failed: {e}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::State(e) => Some(e),
            _ => None,
        }
    }
}

impl From<lode_state::StateError> for ConfigError {
    fn from(e: lode_state::StateError) -> Self {
        Self::State(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_content::ContentPack;

    fn pack() -> NormalizedContentPack {
        NormalizedContentPack::new(ContentPack {
            id: "p".into(),
            version: "1".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn defaults_validate() {
        assert!(RuntimeConfig::new(pack()).validate().is_ok());
    }

    #[test]
    fn zero_settings_are_rejected() {
        let mut config = RuntimeConfig::new(pack());
        config.step_size_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroStepSize)));

        let mut config = RuntimeConfig::new(pack());
        config.max_steps_per_frame = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroStepBudget)));

        let mut config = RuntimeConfig::new(pack());
        config.limits.max_command_queue_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::QueueCapacityZero)
        ));
    }

    #[test]
    fn scheduler_interval_falls_back_to_step_size() {
        let scheduler = SchedulerConfig { interval_ms: None };
        assert_eq!(scheduler.resolved_interval_ms(100), 100);

        let scheduler = SchedulerConfig {
            interval_ms: Some(0.0),
        };
        assert_eq!(scheduler.resolved_interval_ms(100), 100);

        let scheduler = SchedulerConfig {
            interval_ms: Some(-5.0),
        };
        assert_eq!(scheduler.resolved_interval_ms(100), 100);

        let scheduler = SchedulerConfig {
            interval_ms: Some(f64::NAN),
        };
        assert_eq!(scheduler.resolved_interval_ms(100), 100);

        let scheduler = SchedulerConfig {
            interval_ms: Some(16.0),
        };
        assert_eq!(scheduler.resolved_interval_ms(100), 16);

        // Sub-millisecond intervals clamp to 1 ms.
        let scheduler = SchedulerConfig {
            interval_ms: Some(0.5),
        };
        assert_eq!(scheduler.resolved_interval_ms(100), 1);
    }

    #[test]
    fn precision_normalization_applies_defaults() {
        let precision = Precision {
            dirty_epsilon_absolute: f64::NAN,
            dirty_epsilon_relative: -1.0,
            dirty_epsilon_ceiling: f64::INFINITY,
            dirty_epsilon_override_max: -2.0,
        };
        assert_eq!(precision.normalized(), DirtyEpsilon::default());
    }
}
