//! The command transport server: envelope validation and idempotency.
//!
//! Envelopes arrive as raw JSON. Validation runs in a fixed order and
//! the first failure determines the error code, so clients can rely on
//! the precedence (identifier problems before command problems, shape
//! problems before capacity problems). Accepted envelopes enqueue a
//! fully validated [`Command`]; their responses are cached under the
//! composite `(clientId, requestId)` key so a retried envelope never
//! enqueues twice.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use lode_core::{
    validate_identifier, Command, CommandPriority, ExecutionError, IdentifierError, Step,
};

// ── Responses ─────────────────────────────────────────────────────

/// Envelope disposition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    /// Validated and enqueued.
    Accepted,
    /// Refused; `error` carries the code.
    Rejected,
    /// A retry of an envelope this server already accepted.
    Duplicate,
}

/// Error block in a transport response.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseError {
    /// Stable wire code (`INVALID_IDENTIFIER`, `COMMAND_REJECTED`, ...).
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

/// Response to one envelope submission.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportResponse {
    /// Echo of the envelope's request id ("" when it was unusable).
    pub request_id: String,
    /// Disposition.
    pub status: EnvelopeStatus,
    /// Simulation step at response time.
    pub server_step: u64,
    /// Error details when rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

/// A resolved execution outcome for subscribers.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeResponse {
    /// Request id of the originating envelope.
    pub request_id: String,
    /// Client that submitted the envelope.
    pub client_id: String,
    /// Whether execution succeeded.
    pub accepted: bool,
    /// Rejection details when execution failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

// ── Sink ──────────────────────────────────────────────────────────

/// The runtime-side surface the transport enqueues into.
pub trait CommandSink {
    /// Whether a handler is wired for this command type (the
    /// `COMMAND_UNSUPPORTED` shortcut).
    fn has_handler(&self, kind: &str) -> bool;

    /// Validate a payload against the command type's schema.
    fn validate_payload(&self, kind: &str, payload: &Value) -> Result<(), String>;

    /// Enqueue a validated command. Fails when the queue is full.
    fn enqueue(&mut self, command: Command) -> Result<(), ExecutionError>;

    /// The current simulation step.
    fn current_step(&self) -> Step;
}

// ── Server ────────────────────────────────────────────────────────

/// Transport server limits.
#[derive(Clone, Copy, Debug)]
pub struct TransportConfig {
    /// Milliseconds after `sentAt` before a pending envelope expires.
    pub pending_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            pending_timeout_ms: 30_000,
        }
    }
}

struct Pending {
    client_id: String,
    deadline_ms: u64,
}

/// The command transport server.
pub struct TransportServer {
    config: TransportConfig,
    /// `(clientId, requestId)` → cached response.
    cache: IndexMap<(String, String), TransportResponse>,
    /// requestId → owning clientId, for `REQUEST_ID_IN_USE`.
    by_request: IndexMap<String, String>,
    /// Accepted envelopes awaiting execution outcomes.
    pending: IndexMap<String, Pending>,
    /// Resolved outcomes awaiting subscriber drain.
    outcomes: Vec<OutcomeResponse>,
}

impl TransportServer {
    /// Create a server with the given limits.
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            cache: IndexMap::new(),
            by_request: IndexMap::new(),
            pending: IndexMap::new(),
            outcomes: Vec::new(),
        }
    }

    /// Validate an envelope and, when well-formed and new, enqueue its
    /// command. See the module docs for the validation order.
    pub fn handle_envelope(
        &mut self,
        envelope: &Value,
        sink: &mut dyn CommandSink,
    ) -> TransportResponse {
        let server_step = sink.current_step().0;
        let echoed_request_id = envelope
            .get("requestId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match self.validate(envelope, sink) {
            Err((code, message)) => TransportResponse {
                request_id: echoed_request_id,
                status: EnvelopeStatus::Rejected,
                server_step,
                error: Some(ResponseError {
                    code: code.to_string(),
                    message,
                }),
            },
            Ok(Validated::Duplicate(mut cached)) => {
                // A retry of an accepted envelope reports `duplicate`;
                // a retry of a rejected one repeats the rejection
                // verbatim.
                if cached.status == EnvelopeStatus::Accepted {
                    cached.status = EnvelopeStatus::Duplicate;
                }
                cached
            }
            Ok(Validated::Fresh {
                client_id,
                request_id,
                sent_at_ms,
                command,
            }) => {
                let response = match sink.enqueue(command) {
                    Ok(()) => TransportResponse {
                        request_id: request_id.clone(),
                        status: EnvelopeStatus::Accepted,
                        server_step,
                        error: None,
                    },
                    Err(e) => TransportResponse {
                        request_id: request_id.clone(),
                        status: EnvelopeStatus::Rejected,
                        server_step,
                        error: Some(ResponseError {
                            code: e.code.as_str().to_string(),
                            message: e.message,
                        }),
                    },
                };

                self.cache.insert(
                    (client_id.clone(), request_id.clone()),
                    response.clone(),
                );
                self.by_request.insert(request_id.clone(), client_id.clone());
                if response.status == EnvelopeStatus::Accepted {
                    self.pending.insert(
                        request_id,
                        Pending {
                            client_id,
                            deadline_ms: sent_at_ms.saturating_add(self.config.pending_timeout_ms),
                        },
                    );
                }
                response
            }
        }
    }

    /// Record the execution outcome for an accepted envelope.
    ///
    /// Unknown request ids (e.g. automation commands) are ignored.
    pub fn resolve_outcome(&mut self, request_id: &str, result: Result<(), &ExecutionError>) {
        let Some(pending) = self.pending.shift_remove(request_id) else {
            return;
        };
        self.outcomes.push(OutcomeResponse {
            request_id: request_id.to_string(),
            client_id: pending.client_id,
            accepted: result.is_ok(),
            error: result.err().map(|e| ResponseError {
                code: e.code.as_str().to_string(),
                message: e.message.clone(),
            }),
        });
    }

    /// Expire pending envelopes whose deadline passed. Returns the
    /// number expired; each produces a timed-out outcome.
    pub fn expire_pending(&mut self, now_ms: u64) -> usize {
        let mut expired = Vec::new();
        self.pending.retain(|request_id, pending| {
            if now_ms >= pending.deadline_ms {
                expired.push((request_id.clone(), pending.client_id.clone()));
                false
            } else {
                true
            }
        });
        for (request_id, client_id) in &expired {
            self.outcomes.push(OutcomeResponse {
                request_id: request_id.clone(),
                client_id: client_id.clone(),
                accepted: false,
                error: Some(ResponseError {
                    code: "TIMEOUT".to_string(),
                    message: "command expired before execution".to_string(),
                }),
            });
        }
        expired.len()
    }

    /// Drain resolved outcomes for subscribers, in resolution order.
    pub fn drain_outcome_responses(&mut self) -> Vec<OutcomeResponse> {
        std::mem::take(&mut self.outcomes)
    }

    /// Number of envelopes awaiting execution outcomes.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn validate(
        &self,
        envelope: &Value,
        sink: &dyn CommandSink,
    ) -> Result<Validated, (&'static str, String)> {
        // requestId: type/empty, then format, then length.
        let request_id = require_identifier(
            envelope.get("requestId"),
            "INVALID_IDENTIFIER",
            "INVALID_IDENTIFIER_FORMAT",
            "IDENTIFIER_TOO_LONG",
            "requestId",
        )?;
        // clientId: same checks, same codes.
        let client_id = require_identifier(
            envelope.get("clientId"),
            "INVALID_IDENTIFIER",
            "INVALID_IDENTIFIER_FORMAT",
            "IDENTIFIER_TOO_LONG",
            "clientId",
        )?;

        // sentAt must be a finite non-negative number of milliseconds.
        let sent_at_ms = match envelope.get("sentAt").and_then(Value::as_f64) {
            Some(v) if v.is_finite() && v >= 0.0 => v as u64,
            _ => {
                return Err((
                    "INVALID_SENT_AT",
                    "sentAt must be a finite timestamp".to_string(),
                ))
            }
        };

        let Some(command) = envelope.get("command").filter(|c| c.is_object()) else {
            return Err((
                "INVALID_COMMAND",
                "command must be an object".to_string(),
            ));
        };

        let kind = match command.get("type").and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() && s.trim() == s => s.to_string(),
            _ => {
                return Err((
                    "INVALID_COMMAND_TYPE",
                    "command type must be a non-empty trimmed string".to_string(),
                ))
            }
        };

        let priority = match command.get("priority").and_then(Value::as_u64) {
            Some(raw) => match u8::try_from(raw).ok().and_then(CommandPriority::from_wire) {
                Some(p) => p,
                None => {
                    return Err((
                        "INVALID_COMMAND_PRIORITY",
                        format!("unknown command priority {raw}"),
                    ))
                }
            },
            None => {
                return Err((
                    "INVALID_COMMAND_PRIORITY",
                    "command priority must be an integer in the priority enum".to_string(),
                ))
            }
        };

        let timestamp = match command.get("timestamp").and_then(Value::as_u64) {
            Some(t) => t,
            None => {
                return Err((
                    "INVALID_COMMAND_TIMESTAMP",
                    "command timestamp must be a finite non-negative integer".to_string(),
                ))
            }
        };

        let step = match command.get("step").and_then(Value::as_u64) {
            Some(s) => Step(s),
            None => {
                return Err((
                    "INVALID_COMMAND_STEP",
                    "command step must be a non-negative integer".to_string(),
                ))
            }
        };

        // Embedded requestId must be well-formed and match the envelope.
        if let Some(embedded) = command.get("requestId") {
            let Some(embedded) = embedded.as_str() else {
                return Err((
                    "INVALID_COMMAND_REQUEST_ID",
                    "command requestId must be a string".to_string(),
                ));
            };
            if validate_identifier(embedded).is_err() {
                return Err((
                    "INVALID_COMMAND_REQUEST_ID",
                    format!("command requestId {embedded:?} is malformed"),
                ));
            }
            if embedded != request_id {
                return Err((
                    "REQUEST_ID_MISMATCH",
                    format!(
                        "command requestId {embedded:?} does not match envelope {request_id:?}"
                    ),
                ));
            }
        }

        let payload = command.get("payload").cloned().unwrap_or(Value::Null);
        if let Err(reason) = sink.validate_payload(&kind, &payload) {
            return Err(("INVALID_COMMAND_PAYLOAD", reason));
        }
        let built = Command::new(kind.clone(), priority, timestamp, step, payload)
            .and_then(|c| c.with_request_id(request_id.clone()));
        let command = match built {
            Ok(c) => c,
            Err(e) => return Err(("INVALID_COMMAND_PAYLOAD", e.to_string())),
        };

        // Idempotency: same (clientId, requestId) replays the cached
        // response; a different client reusing the id is a conflict.
        if let Some(cached) = self
            .cache
            .get(&(client_id.clone(), request_id.clone()))
        {
            return Ok(Validated::Duplicate(cached.clone()));
        }
        if let Some(owner) = self.by_request.get(&request_id) {
            if *owner != client_id {
                return Err((
                    "REQUEST_ID_IN_USE",
                    format!("requestId {request_id:?} belongs to another client"),
                ));
            }
        }

        if !sink.has_handler(&kind) {
            return Err((
                "COMMAND_UNSUPPORTED",
                format!("no handler registered for {kind}"),
            ));
        }

        Ok(Validated::Fresh {
            client_id,
            request_id,
            sent_at_ms,
            command,
        })
    }
}

enum Validated {
    Duplicate(TransportResponse),
    Fresh {
        client_id: String,
        request_id: String,
        sent_at_ms: u64,
        command: Command,
    },
}

fn require_identifier(
    value: Option<&Value>,
    empty_code: &'static str,
    format_code: &'static str,
    length_code: &'static str,
    field: &str,
) -> Result<String, (&'static str, String)> {
    let Some(raw) = value.and_then(Value::as_str) else {
        return Err((empty_code, format!("{field} must be a string")));
    };
    match validate_identifier(raw) {
        Ok(()) => Ok(raw.to_string()),
        Err(IdentifierError::Empty) => Err((empty_code, format!("{field} is empty"))),
        Err(IdentifierError::InvalidFormat) => Err((
            format_code,
            format!("{field} contains characters outside [A-Za-z0-9_-]"),
        )),
        Err(IdentifierError::TooLong { len }) => {
            Err((length_code, format!("{field} length {len} exceeds 64")))
        }
    }
}
