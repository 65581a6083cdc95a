//! The command model: immutable intents, priority classes, and the
//! authorization policy table.
//!
//! A [`Command`] is a validated intent submitted to the runtime; it is
//! never executed at submission time. Commands are drained from the queue
//! in `(priority, step, insertion sequence)` order, dispatched to their
//! registered handler, and recorded for replay.
//!
//! # Priority
//!
//! [`CommandPriority`] discriminants are the wire encoding: lower values
//! drain first, so `System` commands always execute before `Automation`
//! commands, which execute before `Player` commands within a step.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CommandError;
use crate::ident::validate_identifier;
use crate::step::Step;
use crate::telemetry::Telemetry;

/// Maximum nesting depth accepted for command payloads.
///
/// `serde_json::Value` already guarantees acyclic, finite-number JSON;
/// the depth cap bounds recursion in schema checks and canonicalization.
pub const MAX_PAYLOAD_DEPTH: usize = 32;

// ── CommandPriority ───────────────────────────────────────────────

/// Ordering class for command execution: `System > Automation > Player`.
///
/// The numeric discriminant doubles as the wire encoding; lower values
/// are drained first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum CommandPriority {
    /// Engine-internal commands (highest priority).
    System = 0,
    /// Commands emitted by the automation system.
    Automation = 1,
    /// Commands originating from the player (lowest priority).
    Player = 2,
}

impl CommandPriority {
    /// Decode a wire discriminant, rejecting unknown values.
    pub fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::System),
            1 => Some(Self::Automation),
            2 => Some(Self::Player),
            _ => None,
        }
    }

    /// The wire discriminant for this priority.
    pub fn as_wire(self) -> u8 {
        self as u8
    }

    /// Stable label used in telemetry payloads.
    pub fn label(self) -> &'static str {
        match self {
            Self::System => "SYSTEM",
            Self::Automation => "AUTOMATION",
            Self::Player => "PLAYER",
        }
    }
}

impl fmt::Display for CommandPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl Serialize for CommandPriority {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_wire())
    }
}

impl<'de> Deserialize<'de> for CommandPriority {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        Self::from_wire(raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown command priority {raw}")))
    }
}

// ── Command ───────────────────────────────────────────────────────

/// Mirror struct used to validate commands during deserialization.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommand {
    #[serde(rename = "type")]
    kind: String,
    priority: CommandPriority,
    timestamp: u64,
    step: Step,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    request_id: Option<String>,
}

/// A validated, immutable intent submitted to the runtime.
///
/// Fields are private; construction goes through [`Command::new`] (or
/// deserialization, which funnels through the same validation), so every
/// `Command` in the system satisfies the model invariants: non-empty
/// trimmed type, bounded payload depth, and a well-formed request id
/// when present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawCommand")]
pub struct Command {
    #[serde(rename = "type")]
    kind: String,
    priority: CommandPriority,
    timestamp: u64,
    step: Step,
    payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

impl Command {
    /// Construct a command, validating the model invariants.
    pub fn new(
        kind: impl Into<String>,
        priority: CommandPriority,
        timestamp: u64,
        step: Step,
        payload: Value,
    ) -> Result<Self, CommandError> {
        let kind = kind.into();
        if kind.trim().is_empty() {
            return Err(CommandError::EmptyKind);
        }
        if kind.trim() != kind {
            return Err(CommandError::UntrimmedKind { kind });
        }
        validate_payload_depth(&payload)?;
        Ok(Self {
            kind,
            priority,
            timestamp,
            step,
            payload,
            request_id: None,
        })
    }

    /// Attach a request id, validating its format.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Result<Self, CommandError> {
        let request_id = request_id.into();
        validate_identifier(&request_id)?;
        self.request_id = Some(request_id);
        Ok(self)
    }

    /// The command type string (handler registry key).
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The command's priority class.
    pub fn priority(&self) -> CommandPriority {
        self.priority
    }

    /// Submission timestamp in milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// The earliest step at which this command may execute.
    pub fn step(&self) -> Step {
        self.step
    }

    /// The JSON payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The request id, when the command was submitted via the transport.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}

impl TryFrom<RawCommand> for Command {
    type Error = CommandError;

    fn try_from(raw: RawCommand) -> Result<Self, Self::Error> {
        let cmd = Command::new(raw.kind, raw.priority, raw.timestamp, raw.step, raw.payload)?;
        match raw.request_id {
            Some(id) => cmd.with_request_id(id),
            None => Ok(cmd),
        }
    }
}

/// Check the payload nesting depth against [`MAX_PAYLOAD_DEPTH`].
fn validate_payload_depth(payload: &Value) -> Result<(), CommandError> {
    fn depth(value: &Value) -> usize {
        match value {
            Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
            Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
            _ => 0,
        }
    }
    let d = depth(payload);
    if d > MAX_PAYLOAD_DEPTH {
        return Err(CommandError::PayloadTooDeep { depth: d });
    }
    Ok(())
}

// ── Authorization ─────────────────────────────────────────────────

/// Whether a command executes against live state or a replay sandbox.
///
/// Surfaced in authorization warnings so operators can tell a live
/// misbehaving client from a stale recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionPhase {
    /// Normal execution against authoritative state.
    Live,
    /// Execution driven by the replay engine.
    Replay,
}

impl ExecutionPhase {
    /// Stable label used in telemetry payloads.
    pub fn label(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Replay => "replay",
        }
    }
}

/// Per-command-type authorization policy.
#[derive(Clone, Debug)]
pub struct CommandPolicy {
    /// Priorities permitted to submit this command type.
    pub allowed: Vec<CommandPriority>,
    /// Optional telemetry event name recorded on denial, in addition to
    /// the standard unauthorized warning.
    pub unauthorized_event: Option<&'static str>,
}

impl CommandPolicy {
    /// A policy permitting only the listed priorities.
    pub fn only(allowed: &[CommandPriority]) -> Self {
        Self {
            allowed: allowed.to_vec(),
            unauthorized_event: None,
        }
    }

    /// Attach a dedicated telemetry event recorded on denial.
    pub fn with_event(mut self, event: &'static str) -> Self {
        self.unauthorized_event = Some(event);
        self
    }
}

/// The authorization policy table: command type → permitted priorities.
///
/// A command type with no registered policy is permitted at every
/// priority. Denials record a warning carrying the command type, the
/// attempted priority, and the execution phase.
#[derive(Clone, Debug, Default)]
pub struct AuthorizationTable {
    policies: IndexMap<String, CommandPolicy>,
}

impl AuthorizationTable {
    /// An empty table (every command permitted).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the policy for a command type.
    pub fn insert(&mut self, kind: impl Into<String>, policy: CommandPolicy) {
        self.policies.insert(kind.into(), policy);
    }

    /// The policy registered for a command type, if any.
    pub fn policy(&self, kind: &str) -> Option<&CommandPolicy> {
        self.policies.get(kind)
    }

    /// Check whether `command` may execute, recording a warning on denial.
    pub fn authorize(
        &self,
        command: &Command,
        phase: ExecutionPhase,
        telemetry: &dyn Telemetry,
    ) -> bool {
        let Some(policy) = self.policies.get(command.kind()) else {
            return true;
        };
        if policy.allowed.contains(&command.priority()) {
            return true;
        }
        let data = serde_json::json!({
            "type": command.kind(),
            "attemptedPriority": command.priority().label(),
            "phase": phase.label(),
        });
        telemetry.record_warning("CommandUnauthorized", Some(&data));
        if let Some(event) = policy.unauthorized_event {
            telemetry.record_warning(event, Some(&data));
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::CountingTelemetry;
    use serde_json::json;

    fn player_cmd(kind: &str) -> Command {
        Command::new(kind, CommandPriority::Player, 1_000, Step(0), Value::Null).unwrap()
    }

    // ── construction tests ─────────────────────────────────────

    #[test]
    fn rejects_empty_kind() {
        let err = Command::new("", CommandPriority::Player, 0, Step(0), Value::Null);
        assert_eq!(err, Err(CommandError::EmptyKind));
        let err = Command::new("  ", CommandPriority::Player, 0, Step(0), Value::Null);
        assert_eq!(err, Err(CommandError::EmptyKind));
    }

    #[test]
    fn rejects_untrimmed_kind() {
        let err = Command::new(" BUY ", CommandPriority::Player, 0, Step(0), Value::Null);
        assert!(matches!(err, Err(CommandError::UntrimmedKind { .. })));
    }

    #[test]
    fn rejects_overly_deep_payload() {
        let mut payload = json!(1);
        for _ in 0..=MAX_PAYLOAD_DEPTH {
            payload = json!([payload]);
        }
        let err = Command::new("X", CommandPriority::Player, 0, Step(0), payload);
        assert!(matches!(err, Err(CommandError::PayloadTooDeep { .. })));
    }

    #[test]
    fn request_id_is_validated() {
        let cmd = player_cmd("X");
        assert!(cmd.clone().with_request_id("r1").is_ok());
        assert!(cmd.clone().with_request_id(" r1").is_err());
        assert!(cmd.with_request_id("").is_err());
    }

    // ── wire encoding tests ────────────────────────────────────

    #[test]
    fn priority_wire_round_trip() {
        for p in [
            CommandPriority::System,
            CommandPriority::Automation,
            CommandPriority::Player,
        ] {
            assert_eq!(CommandPriority::from_wire(p.as_wire()), Some(p));
        }
        assert_eq!(CommandPriority::from_wire(3), None);
    }

    #[test]
    fn system_drains_before_player() {
        assert!(CommandPriority::System < CommandPriority::Automation);
        assert!(CommandPriority::Automation < CommandPriority::Player);
    }

    #[test]
    fn serde_round_trip_preserves_fields() {
        let cmd = Command::new(
            "PURCHASE_GENERATOR",
            CommandPriority::Player,
            1_234,
            Step(5),
            json!({ "generatorId": "mine", "count": 1 }),
        )
        .unwrap()
        .with_request_id("req-9")
        .unwrap();

        let encoded = serde_json::to_value(&cmd).unwrap();
        assert_eq!(encoded["type"], json!("PURCHASE_GENERATOR"));
        assert_eq!(encoded["priority"], json!(2));
        assert_eq!(encoded["step"], json!(5));
        assert_eq!(encoded["requestId"], json!("req-9"));

        let decoded: Command = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn deserialization_enforces_validation() {
        let raw = json!({
            "type": "  ",
            "priority": 2,
            "timestamp": 0,
            "step": 0,
            "payload": null,
        });
        assert!(serde_json::from_value::<Command>(raw).is_err());

        let raw = json!({
            "type": "X",
            "priority": 9,
            "timestamp": 0,
            "step": 0,
            "payload": null,
        });
        assert!(serde_json::from_value::<Command>(raw).is_err());
    }

    // ── authorization tests ────────────────────────────────────

    #[test]
    fn missing_policy_permits_all() {
        let table = AuthorizationTable::new();
        let telemetry = CountingTelemetry::default();
        assert!(table.authorize(&player_cmd("ANY"), ExecutionPhase::Live, &telemetry));
        assert_eq!(telemetry.warning_count("CommandUnauthorized"), 0);
    }

    #[test]
    fn denial_records_warning_with_phase() {
        let mut table = AuthorizationTable::new();
        table.insert(
            "GRANT_RESOURCE",
            CommandPolicy::only(&[CommandPriority::System]),
        );
        let telemetry = CountingTelemetry::default();

        let cmd = player_cmd("GRANT_RESOURCE");
        assert!(!table.authorize(&cmd, ExecutionPhase::Replay, &telemetry));
        assert_eq!(telemetry.warning_count("CommandUnauthorized"), 1);
        let data = telemetry.last_warning_data("CommandUnauthorized").unwrap();
        assert_eq!(data["attemptedPriority"], json!("PLAYER"));
        assert_eq!(data["phase"], json!("replay"));
    }

    #[test]
    fn dedicated_event_fires_alongside_standard_warning() {
        let mut table = AuthorizationTable::new();
        table.insert(
            "APPLY_PRESTIGE",
            CommandPolicy::only(&[CommandPriority::Player]).with_event("PrestigeUnauthorized"),
        );
        let telemetry = CountingTelemetry::default();

        let cmd = Command::new(
            "APPLY_PRESTIGE",
            CommandPriority::Automation,
            0,
            Step(0),
            Value::Null,
        )
        .unwrap();
        assert!(!table.authorize(&cmd, ExecutionPhase::Live, &telemetry));
        assert_eq!(telemetry.warning_count("CommandUnauthorized"), 1);
        assert_eq!(telemetry.warning_count("PrestigeUnauthorized"), 1);
    }
}
