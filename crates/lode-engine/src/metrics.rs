//! Per-tick runtime metrics.
//!
//! [`TickMetrics`] captures timing and counter data for a single tick
//! call; [`RuntimeCounters`] accumulates across the runtime's lifetime.
//! Both feed the telemetry facade's counter groups.

/// Timing and counts for one tick call.
#[derive(Clone, Debug, Default)]
pub struct TickMetrics {
    /// Wall-clock time for the entire tick, in microseconds.
    pub total_us: u64,
    /// Steps executed this tick.
    pub steps_executed: u32,
    /// Commands dispatched this tick.
    pub commands_executed: u32,
    /// Commands rejected this tick.
    pub commands_rejected: u32,
    /// Time spent publishing the frame, in microseconds.
    pub snapshot_publish_us: u64,
    /// Steps discarded by the accumulator cap this tick.
    pub dropped_frames: u64,
}

/// Cumulative counters across the runtime's lifetime.
#[derive(Clone, Debug, Default)]
pub struct RuntimeCounters {
    /// Total steps executed.
    pub steps: u64,
    /// Total commands dispatched.
    pub commands_executed: u64,
    /// Total commands rejected.
    pub commands_rejected: u64,
    /// Total steps discarded by the accumulator cap.
    pub dropped_frames: u64,
    /// Total frames published.
    pub frames_published: u64,
}
