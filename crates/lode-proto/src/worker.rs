//! Compute worker protocol, schema version 2.
//!
//! The rendering host drives the worker-hosted runtime exclusively
//! through these messages; there is no shared state. Inbound requests
//! parse from raw JSON with explicit validation (a malformed `init`
//! must produce a protocol error, not a serde error string), outbound
//! responses serialize with `kind` tags matching the wire contract.

use std::error::Error;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use lode_core::{validate_identifier, Command};

/// Worker protocol schema version.
pub const PROTOCOL_VERSION: u32 = 2;

/// A malformed protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolError {
    /// Stable error string (e.g. `protocol:init invalid stepSizeMs`).
    pub message: String,
}

impl ProtocolError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ProtocolError {}

/// Host→worker requests.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkerRequest {
    /// Configure and start the runtime.
    Init {
        /// Step size in milliseconds (positive integer).
        step_size_ms: u64,
        /// Step budget per tick call (positive integer).
        max_steps_per_frame: u32,
    },
    /// Advance simulated time.
    Tick {
        /// Elapsed milliseconds since the previous tick.
        delta_ms: f64,
    },
    /// Enqueue pre-validated commands.
    EnqueueCommands {
        /// Commands to enqueue.
        commands: Vec<Command>,
    },
    /// Stop the worker loop.
    Shutdown,
    /// Serialize the current state.
    Serialize {
        /// Correlates the `saveData` response.
        request_id: String,
    },
    /// Hydrate from a save.
    Hydrate {
        /// Correlates the `hydrateResult` response.
        request_id: String,
        /// The raw save value.
        save: Value,
    },
}

/// Worker→host responses.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WorkerResponse {
    /// Emitted once after a successful `init`.
    #[serde(rename_all = "camelCase")]
    Ready {
        /// Protocol schema version (2).
        protocol_version: u32,
        /// Configured step size.
        step_size_ms: u64,
        /// First step the runtime will execute.
        next_step: u64,
        /// Capability strings (`"serialize"`, `"hydrate"`, ...).
        capabilities: Vec<String>,
    },
    /// Emitted after each tick.
    #[serde(rename_all = "camelCase")]
    Frame {
        /// The published frame, when any step executed.
        #[serde(skip_serializing_if = "Option::is_none")]
        frame: Option<Value>,
        /// Steps dropped by the accumulator cap.
        dropped_frames: u64,
        /// Next step the runtime will execute.
        next_step: u64,
    },
    /// Response to `serialize`.
    #[serde(rename_all = "camelCase")]
    SaveData {
        /// Correlation id.
        request_id: String,
        /// Whether serialization succeeded.
        ok: bool,
        /// The save payload on success.
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        /// Error description on failure.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Response to `hydrate`.
    #[serde(rename_all = "camelCase")]
    HydrateResult {
        /// Correlation id.
        request_id: String,
        /// Whether hydration succeeded.
        ok: bool,
        /// Next step after hydration, on success.
        #[serde(skip_serializing_if = "Option::is_none")]
        next_step: Option<u64>,
        /// Error code on failure (e.g. `INVALID_SAVE_DATA`).
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Protocol-level failure.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Stable error string.
        error: String,
    },
}

/// Parse and validate an inbound request.
pub fn parse_request(value: &Value) -> Result<WorkerRequest, ProtocolError> {
    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::new("protocol:message missing kind"))?;

    match kind {
        "init" => {
            let step_size_ms = match value.get("stepSizeMs").and_then(Value::as_u64) {
                Some(v) if v > 0 => v,
                _ => return Err(ProtocolError::new("protocol:init invalid stepSizeMs")),
            };
            let max_steps_per_frame =
                match value.get("maxStepsPerFrame").and_then(Value::as_u64) {
                    Some(v) if v > 0 && v <= u64::from(u32::MAX) => v as u32,
                    _ => {
                        return Err(ProtocolError::new(
                            "protocol:init invalid maxStepsPerFrame",
                        ))
                    }
                };
            Ok(WorkerRequest::Init {
                step_size_ms,
                max_steps_per_frame,
            })
        }
        "tick" => {
            let delta_ms = match value.get("deltaMs").and_then(Value::as_f64) {
                Some(v) if v.is_finite() && v >= 0.0 => v,
                _ => return Err(ProtocolError::new("protocol:tick invalid deltaMs")),
            };
            Ok(WorkerRequest::Tick { delta_ms })
        }
        "enqueueCommands" => {
            let raw = value
                .get("commands")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    ProtocolError::new("protocol:enqueueCommands missing commands")
                })?;
            let mut commands = Vec::with_capacity(raw.len());
            for (i, entry) in raw.iter().enumerate() {
                match serde_json::from_value::<Command>(entry.clone()) {
                    Ok(c) => commands.push(c),
                    Err(e) => {
                        return Err(ProtocolError::new(format!(
                            "protocol:enqueueCommands invalid command {i}: {e}"
                        )))
                    }
                }
            }
            Ok(WorkerRequest::EnqueueCommands { commands })
        }
        "shutdown" => Ok(WorkerRequest::Shutdown),
        "serialize" => Ok(WorkerRequest::Serialize {
            request_id: parse_request_id(value, "serialize")?,
        }),
        "hydrate" => {
            let request_id = parse_request_id(value, "hydrate")?;
            let save = value
                .get("save")
                .cloned()
                .ok_or_else(|| ProtocolError::new("protocol:hydrate missing save"))?;
            Ok(WorkerRequest::Hydrate { request_id, save })
        }
        other => Err(ProtocolError::new(format!(
            "protocol:unknown message kind {other:?}"
        ))),
    }
}

fn parse_request_id(value: &Value, kind: &str) -> Result<String, ProtocolError> {
    let raw = value
        .get("requestId")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::new(format!("protocol:{kind} missing requestId")))?;
    validate_identifier(raw)
        .map_err(|_| ProtocolError::new(format!("protocol:{kind} invalid requestId")))?;
    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn init_parses_and_validates() {
        let request = parse_request(&json!({
            "kind": "init",
            "stepSizeMs": 100,
            "maxStepsPerFrame": 20,
        }))
        .unwrap();
        assert_eq!(
            request,
            WorkerRequest::Init {
                step_size_ms: 100,
                max_steps_per_frame: 20
            }
        );
    }

    #[test]
    fn init_rejects_bad_step_size() {
        for bad in [json!(0), json!(-5), json!(1.5), json!("fast"), json!(null)] {
            let err = parse_request(&json!({
                "kind": "init",
                "stepSizeMs": bad,
                "maxStepsPerFrame": 20,
            }))
            .unwrap_err();
            assert_eq!(err.message, "protocol:init invalid stepSizeMs");
        }
    }

    #[test]
    fn init_rejects_bad_step_budget() {
        let err = parse_request(&json!({
            "kind": "init",
            "stepSizeMs": 100,
            "maxStepsPerFrame": 0,
        }))
        .unwrap_err();
        assert_eq!(err.message, "protocol:init invalid maxStepsPerFrame");
    }

    #[test]
    fn tick_requires_finite_delta() {
        let ok = parse_request(&json!({ "kind": "tick", "deltaMs": 16.6 })).unwrap();
        assert_eq!(ok, WorkerRequest::Tick { delta_ms: 16.6 });
        assert!(parse_request(&json!({ "kind": "tick", "deltaMs": -1 })).is_err());
        assert!(parse_request(&json!({ "kind": "tick" })).is_err());
    }

    #[test]
    fn enqueue_commands_parses_command_records() {
        let request = parse_request(&json!({
            "kind": "enqueueCommands",
            "commands": [{
                "type": "SET",
                "priority": 2,
                "timestamp": 0,
                "step": 0,
                "payload": null,
            }],
        }))
        .unwrap();
        match request {
            WorkerRequest::EnqueueCommands { commands } => {
                assert_eq!(commands.len(), 1);
                assert_eq!(commands[0].kind(), "SET");
            }
            other => panic!("expected enqueueCommands, got {other:?}"),
        }
    }

    #[test]
    fn enqueue_commands_rejects_invalid_entries() {
        let err = parse_request(&json!({
            "kind": "enqueueCommands",
            "commands": [{ "type": "  ", "priority": 2, "timestamp": 0, "step": 0 }],
        }))
        .unwrap_err();
        assert!(err.message.contains("invalid command 0"));
    }

    #[test]
    fn serialize_and_hydrate_validate_request_ids() {
        assert!(parse_request(&json!({ "kind": "serialize", "requestId": "s1" })).is_ok());
        let err =
            parse_request(&json!({ "kind": "serialize", "requestId": " s1" })).unwrap_err();
        assert_eq!(err.message, "protocol:serialize invalid requestId");

        let err = parse_request(&json!({ "kind": "hydrate", "requestId": "h1" })).unwrap_err();
        assert_eq!(err.message, "protocol:hydrate missing save");
    }

    #[test]
    fn unknown_kind_is_a_protocol_error() {
        let err = parse_request(&json!({ "kind": "dance" })).unwrap_err();
        assert!(err.message.contains("unknown message kind"));
        let err = parse_request(&json!({})).unwrap_err();
        assert_eq!(err.message, "protocol:message missing kind");
    }

    #[test]
    fn responses_serialize_with_kind_tags() {
        let ready = WorkerResponse::Ready {
            protocol_version: PROTOCOL_VERSION,
            step_size_ms: 100,
            next_step: 0,
            capabilities: vec!["serialize".into(), "hydrate".into()],
        };
        let json = serde_json::to_value(&ready).unwrap();
        assert_eq!(json["kind"], "ready");
        assert_eq!(json["protocolVersion"], 2);

        let frame = WorkerResponse::Frame {
            frame: None,
            dropped_frames: 0,
            next_step: 5,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["kind"], "frame");
        assert!(json.get("frame").is_none());
        assert_eq!(json["nextStep"], 5);
    }
}
