//! Pluggable telemetry facade.
//!
//! The engine reports errors, warnings, progress markers, counter groups,
//! and tick heartbeats through the [`Telemetry`] trait. A process-global
//! facade defaults to [`NoopTelemetry`]; hosts install a backend with
//! [`install_telemetry`]. Components capture a [`TelemetryHandle`] at
//! construction so tests can inject a private [`CountingTelemetry`]
//! without touching the global.
//!
//! All methods take `&self` and implementations must be reentrant-safe:
//! a backend may itself trigger engine calls that report telemetry.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use indexmap::IndexMap;
use serde_json::Value;

/// Shared, clonable handle to a telemetry backend.
pub type TelemetryHandle = Arc<dyn Telemetry>;

/// Sink for engine diagnostics.
pub trait Telemetry: Send + Sync + fmt::Debug {
    /// Record an error event with optional structured data.
    fn record_error(&self, event: &str, data: Option<&Value>);

    /// Record a warning event with optional structured data.
    fn record_warning(&self, event: &str, data: Option<&Value>);

    /// Record a progress marker (unlocks, prestige completions, ...).
    fn record_progress(&self, event: &str, data: Option<&Value>);

    /// Record a named group of numeric counters.
    fn record_counters(&self, group: &str, counters: &[(&str, f64)]);

    /// Record one tick heartbeat. Called once per runtime tick.
    fn record_tick(&self);
}

// ── Global facade ─────────────────────────────────────────────────

fn sink_cell() -> &'static RwLock<TelemetryHandle> {
    static SINK: OnceLock<RwLock<TelemetryHandle>> = OnceLock::new();
    SINK.get_or_init(|| RwLock::new(Arc::new(NoopTelemetry)))
}

/// Install a process-global telemetry backend.
///
/// Components constructed after this call pick up the new backend;
/// components holding an older handle keep reporting to it.
pub fn install_telemetry(backend: TelemetryHandle) {
    if let Ok(mut slot) = sink_cell().write() {
        *slot = backend;
    }
}

/// The currently installed global backend (no-op by default).
pub fn telemetry() -> TelemetryHandle {
    sink_cell()
        .read()
        .map(|slot| Arc::clone(&slot))
        .unwrap_or_else(|_| Arc::new(NoopTelemetry))
}

// ── Backends ──────────────────────────────────────────────────────

/// Backend that discards everything. The default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record_error(&self, _event: &str, _data: Option<&Value>) {}
    fn record_warning(&self, _event: &str, _data: Option<&Value>) {}
    fn record_progress(&self, _event: &str, _data: Option<&Value>) {}
    fn record_counters(&self, _group: &str, _counters: &[(&str, f64)]) {}
    fn record_tick(&self) {}
}

/// Backend forwarding everything through the `log` crate.
///
/// Errors map to `log::error!`, warnings to `log::warn!`, progress and
/// counters to `log::debug!`, and tick heartbeats to `log::trace!`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn record_error(&self, event: &str, data: Option<&Value>) {
        match data {
            Some(d) => log::error!(target: "lode", "{event}: {d}"),
            None => log::error!(target: "lode", "{event}"),
        }
    }

    fn record_warning(&self, event: &str, data: Option<&Value>) {
        match data {
            Some(d) => log::warn!(target: "lode", "{event}: {d}"),
            None => log::warn!(target: "lode", "{event}"),
        }
    }

    fn record_progress(&self, event: &str, data: Option<&Value>) {
        match data {
            Some(d) => log::debug!(target: "lode", "{event}: {d}"),
            None => log::debug!(target: "lode", "{event}"),
        }
    }

    fn record_counters(&self, group: &str, counters: &[(&str, f64)]) {
        log::debug!(target: "lode", "counters {group}: {counters:?}");
    }

    fn record_tick(&self) {
        log::trace!(target: "lode", "tick");
    }
}

/// Recorded event with its most recent data payload.
#[derive(Debug, Default)]
struct EventRecord {
    count: u64,
    last_data: Option<Value>,
}

/// In-memory counting backend for tests and local inspection.
#[derive(Debug, Default)]
pub struct CountingTelemetry {
    errors: Mutex<IndexMap<String, EventRecord>>,
    warnings: Mutex<IndexMap<String, EventRecord>>,
    progress: Mutex<IndexMap<String, EventRecord>>,
    counters: Mutex<IndexMap<String, IndexMap<String, f64>>>,
    ticks: Mutex<u64>,
}

impl CountingTelemetry {
    /// Times `event` was recorded as an error.
    pub fn error_count(&self, event: &str) -> u64 {
        self.errors
            .lock()
            .map(|m| m.get(event).map_or(0, |r| r.count))
            .unwrap_or(0)
    }

    /// Times `event` was recorded as a warning.
    pub fn warning_count(&self, event: &str) -> u64 {
        self.warnings
            .lock()
            .map(|m| m.get(event).map_or(0, |r| r.count))
            .unwrap_or(0)
    }

    /// Times `event` was recorded as a progress marker.
    pub fn progress_count(&self, event: &str) -> u64 {
        self.progress
            .lock()
            .map(|m| m.get(event).map_or(0, |r| r.count))
            .unwrap_or(0)
    }

    /// Data attached to the most recent error with this event name.
    pub fn last_error_data(&self, event: &str) -> Option<Value> {
        self.errors
            .lock()
            .ok()
            .and_then(|m| m.get(event).and_then(|r| r.last_data.clone()))
    }

    /// Data attached to the most recent warning with this event name.
    pub fn last_warning_data(&self, event: &str) -> Option<Value> {
        self.warnings
            .lock()
            .ok()
            .and_then(|m| m.get(event).and_then(|r| r.last_data.clone()))
    }

    /// The most recent value recorded for `group`/`name`.
    pub fn counter(&self, group: &str, name: &str) -> Option<f64> {
        self.counters
            .lock()
            .ok()
            .and_then(|m| m.get(group).and_then(|g| g.get(name).copied()))
    }

    /// Number of tick heartbeats recorded.
    pub fn tick_count(&self) -> u64 {
        self.ticks.lock().map(|t| *t).unwrap_or(0)
    }

    fn bump(slot: &Mutex<IndexMap<String, EventRecord>>, event: &str, data: Option<&Value>) {
        if let Ok(mut map) = slot.lock() {
            let record = map.entry(event.to_string()).or_default();
            record.count += 1;
            if let Some(d) = data {
                record.last_data = Some(d.clone());
            }
        }
    }
}

impl Telemetry for CountingTelemetry {
    fn record_error(&self, event: &str, data: Option<&Value>) {
        Self::bump(&self.errors, event, data);
    }

    fn record_warning(&self, event: &str, data: Option<&Value>) {
        Self::bump(&self.warnings, event, data);
    }

    fn record_progress(&self, event: &str, data: Option<&Value>) {
        Self::bump(&self.progress, event, data);
    }

    fn record_counters(&self, group: &str, counters: &[(&str, f64)]) {
        if let Ok(mut map) = self.counters.lock() {
            let slot = map.entry(group.to_string()).or_default();
            for (name, value) in counters {
                slot.insert((*name).to_string(), *value);
            }
        }
    }

    fn record_tick(&self) {
        if let Ok(mut t) = self.ticks.lock() {
            *t += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counting_backend_tracks_events() {
        let t = CountingTelemetry::default();
        t.record_error("StoreInvalid", Some(&json!({ "id": "energy" })));
        t.record_error("StoreInvalid", None);
        t.record_warning("QueueSoftLimit", None);
        t.record_progress("GeneratorUnlocked", None);
        t.record_tick();
        t.record_tick();

        assert_eq!(t.error_count("StoreInvalid"), 2);
        assert_eq!(t.warning_count("QueueSoftLimit"), 1);
        assert_eq!(t.progress_count("GeneratorUnlocked"), 1);
        assert_eq!(t.tick_count(), 2);
        // Last data sticks even when a later record carries none.
        assert_eq!(t.last_error_data("StoreInvalid").unwrap()["id"], json!("energy"));
    }

    #[test]
    fn counters_overwrite_by_name() {
        let t = CountingTelemetry::default();
        t.record_counters("eventBus", &[("published", 3.0), ("dropped", 0.0)]);
        t.record_counters("eventBus", &[("published", 5.0)]);
        assert_eq!(t.counter("eventBus", "published"), Some(5.0));
        assert_eq!(t.counter("eventBus", "dropped"), Some(0.0));
        assert_eq!(t.counter("eventBus", "missing"), None);
    }

    #[test]
    fn unknown_events_count_zero() {
        let t = CountingTelemetry::default();
        assert_eq!(t.error_count("nope"), 0);
        assert_eq!(t.last_warning_data("nope"), None);
    }

    #[test]
    fn global_facade_defaults_to_noop() {
        // Must not panic; the default sink discards silently.
        telemetry().record_error("anything", None);
        telemetry().record_tick();
    }
}
