//! Worker host: the runtime on its own thread behind the protocol.
//!
//! The host thread exclusively owns the [`Runtime`] (moved in via
//! `thread::spawn`); the rendering shell communicates only through
//! message passing — protocol requests in over a bounded crossbeam
//! channel, responses out over another. When no request arrives within
//! the scheduler interval, the thread ticks on its own, so
//! [`WorkerHost::start`] doubles as the runtime's `start()` and
//! [`WorkerHost::stop`] as its `stop()` (returning the runtime for
//! inspection or a final save).
//!
//! [`handle_request`] is a plain function over `(&mut Runtime, &Value)`
//! so hosts embedding the runtime in-process (and tests) can drive the
//! protocol synchronously without threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde_json::Value;

use lode_proto::{parse_request, WorkerRequest, WorkerResponse, PROTOCOL_VERSION};

use crate::runtime::Runtime;

/// Capabilities advertised in the `ready` message and enforced on
/// request handling.
#[derive(Clone, Copy, Debug)]
pub struct WorkerCapabilities {
    /// Whether `serialize` requests are served.
    pub serialize: bool,
    /// Whether `hydrate` requests are served.
    pub hydrate: bool,
}

impl Default for WorkerCapabilities {
    fn default() -> Self {
        Self {
            serialize: true,
            hydrate: true,
        }
    }
}

impl WorkerCapabilities {
    fn advertised(&self) -> Vec<String> {
        let mut capabilities = Vec::new();
        if self.serialize {
            capabilities.push("serialize".to_string());
        }
        if self.hydrate {
            capabilities.push("hydrate".to_string());
        }
        capabilities
    }
}

/// Apply one protocol request to the runtime.
///
/// Returns the responses to emit and whether the worker should shut
/// down.
pub fn handle_request(
    runtime: &mut Runtime,
    request: &Value,
    capabilities: &WorkerCapabilities,
) -> (Vec<WorkerResponse>, bool) {
    let request = match parse_request(request) {
        Ok(r) => r,
        Err(e) => {
            return (
                vec![WorkerResponse::Error {
                    error: e.to_string(),
                }],
                false,
            )
        }
    };

    match request {
        WorkerRequest::Init { .. } => {
            // The runtime is constructed host-side; init acknowledges
            // the session and reports the authoritative configuration.
            (
                vec![WorkerResponse::Ready {
                    protocol_version: PROTOCOL_VERSION,
                    step_size_ms: runtime.step_size_ms(),
                    next_step: runtime.next_executable_step().0,
                    capabilities: capabilities.advertised(),
                }],
                false,
            )
        }
        WorkerRequest::Tick { delta_ms } => {
            let outcome = runtime.tick(delta_ms);
            let mut frame_value = None;
            for frame in outcome.frames {
                frame_value = Some(frame.to_value());
                runtime.release_frame(frame);
            }
            (
                vec![WorkerResponse::Frame {
                    frame: frame_value,
                    dropped_frames: outcome.dropped_frames,
                    next_step: outcome.next_step.0,
                }],
                false,
            )
        }
        WorkerRequest::EnqueueCommands { commands } => {
            let mut responses = Vec::new();
            for command in commands {
                if let Err(e) = runtime.enqueue_command(command) {
                    responses.push(WorkerResponse::Error {
                        error: e.to_string(),
                    });
                }
            }
            (responses, false)
        }
        WorkerRequest::Shutdown => (Vec::new(), true),
        WorkerRequest::Serialize { request_id } => {
            if !capabilities.serialize {
                return (
                    vec![WorkerResponse::SaveData {
                        request_id,
                        ok: false,
                        data: None,
                        error: Some("CAPABILITY_UNAVAILABLE".to_string()),
                    }],
                    false,
                );
            }
            let response = match serde_json::to_value(runtime.serialize()) {
                Ok(data) => WorkerResponse::SaveData {
                    request_id,
                    ok: true,
                    data: Some(data),
                    error: None,
                },
                Err(e) => WorkerResponse::SaveData {
                    request_id,
                    ok: false,
                    data: None,
                    error: Some(e.to_string()),
                },
            };
            (vec![response], false)
        }
        WorkerRequest::Hydrate { request_id, save } => {
            if !capabilities.hydrate {
                return (
                    vec![WorkerResponse::HydrateResult {
                        request_id,
                        ok: false,
                        next_step: None,
                        error: Some("CAPABILITY_UNAVAILABLE".to_string()),
                    }],
                    false,
                );
            }
            let response = match runtime.hydrate(save) {
                Ok(next_step) => WorkerResponse::HydrateResult {
                    request_id,
                    ok: true,
                    next_step: Some(next_step.0),
                    error: None,
                },
                Err(e) => WorkerResponse::HydrateResult {
                    request_id,
                    ok: false,
                    next_step: None,
                    error: Some(hydrate_error_code(&e)),
                },
            };
            (vec![response], false)
        }
    }
}

/// Map hydration failures to wire error strings. Malformed or
/// incompatible saves collapse to `INVALID_SAVE_DATA`; a step
/// regression keeps its descriptive message since the save itself is
/// valid.
fn hydrate_error_code(error: &lode_save::SaveError) -> String {
    match error {
        lode_save::SaveError::StepRegression { .. } => error.to_string(),
        _ => "INVALID_SAVE_DATA".to_string(),
    }
}

/// Handle to a runtime running on its own worker thread.
pub struct WorkerHost {
    request_tx: Sender<Value>,
    response_rx: Receiver<WorkerResponse>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<Runtime>>,
}

impl WorkerHost {
    /// Move the runtime onto a worker thread ticking at its scheduler
    /// interval.
    pub fn start(runtime: Runtime, capabilities: WorkerCapabilities) -> Self {
        let (request_tx, request_rx) = bounded::<Value>(64);
        let (response_tx, response_rx) = bounded::<WorkerResponse>(256);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        let handle = std::thread::spawn(move || {
            let mut runtime = runtime;
            let interval = Duration::from_millis(runtime.scheduler_interval_ms());
            let mut last_tick = Instant::now();

            loop {
                if shutdown_flag.load(Ordering::Acquire) {
                    break;
                }
                match request_rx.recv_timeout(interval) {
                    Ok(request) => {
                        let (responses, quit) =
                            handle_request(&mut runtime, &request, &capabilities);
                        for response in responses {
                            // Best-effort: the host may have dropped its
                            // receiver during shutdown.
                            let _ = response_tx.send(response);
                        }
                        if quit {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        let delta_ms = last_tick.elapsed().as_secs_f64() * 1_000.0;
                        last_tick = Instant::now();
                        let outcome = runtime.tick(delta_ms);
                        let mut frame_value = None;
                        for frame in outcome.frames {
                            frame_value = Some(frame.to_value());
                            runtime.release_frame(frame);
                        }
                        let _ = response_tx.send(WorkerResponse::Frame {
                            frame: frame_value,
                            dropped_frames: outcome.dropped_frames,
                            next_step: outcome.next_step.0,
                        });
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            runtime
        });

        Self {
            request_tx,
            response_rx,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Submit a raw protocol request. Returns false when the worker has
    /// stopped.
    pub fn submit(&self, request: Value) -> bool {
        self.request_tx.send(request).is_ok()
    }

    /// The response stream.
    pub fn responses(&self) -> &Receiver<WorkerResponse> {
        &self.response_rx
    }

    /// Stop the worker and recover the runtime.
    pub fn stop(mut self) -> Option<Runtime> {
        self.shutdown.store(true, Ordering::Release);
        // Nudge the thread out of its recv_timeout wait.
        let _ = self.request_tx.send(serde_json::json!({ "kind": "shutdown" }));
        self.handle.take().and_then(|handle| handle.join().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use lode_test_utils::minimal_pack;
    use serde_json::json;

    fn runtime() -> Runtime {
        Runtime::new(RuntimeConfig::new(minimal_pack())).unwrap()
    }

    #[test]
    fn init_reports_ready_with_capabilities() {
        let mut r = runtime();
        let (responses, quit) = handle_request(
            &mut r,
            &json!({ "kind": "init", "stepSizeMs": 100, "maxStepsPerFrame": 20 }),
            &WorkerCapabilities::default(),
        );
        assert!(!quit);
        match &responses[0] {
            WorkerResponse::Ready {
                protocol_version,
                step_size_ms,
                capabilities,
                ..
            } => {
                assert_eq!(*protocol_version, 2);
                assert_eq!(*step_size_ms, 100);
                assert_eq!(
                    capabilities,
                    &vec!["serialize".to_string(), "hydrate".to_string()]
                );
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn malformed_init_yields_protocol_error() {
        let mut r = runtime();
        let (responses, _) = handle_request(
            &mut r,
            &json!({ "kind": "init", "stepSizeMs": 0, "maxStepsPerFrame": 20 }),
            &WorkerCapabilities::default(),
        );
        match &responses[0] {
            WorkerResponse::Error { error } => {
                assert_eq!(error, "protocol:init invalid stepSizeMs");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn tick_produces_frame_response() {
        let mut r = runtime();
        let (responses, _) = handle_request(
            &mut r,
            &json!({ "kind": "tick", "deltaMs": 100.0 }),
            &WorkerCapabilities::default(),
        );
        match &responses[0] {
            WorkerResponse::Frame { next_step, .. } => assert_eq!(*next_step, 1),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn serialize_round_trips_through_protocol() {
        let mut r = runtime();
        let (responses, _) = handle_request(
            &mut r,
            &json!({ "kind": "serialize", "requestId": "s1" }),
            &WorkerCapabilities::default(),
        );
        match &responses[0] {
            WorkerResponse::SaveData {
                request_id,
                ok,
                data,
                ..
            } => {
                assert_eq!(request_id, "s1");
                assert!(*ok);
                let save = data.as_ref().unwrap();
                assert!(save.get("contentDigest").is_some());

                // Feed it straight back through hydrate.
                let (responses, _) = handle_request(
                    &mut r,
                    &json!({ "kind": "hydrate", "requestId": "h1", "save": save }),
                    &WorkerCapabilities::default(),
                );
                match &responses[0] {
                    WorkerResponse::HydrateResult { ok, .. } => assert!(*ok),
                    other => panic!("expected hydrateResult, got {other:?}"),
                }
            }
            other => panic!("expected saveData, got {other:?}"),
        }
    }

    #[test]
    fn missing_capability_is_reported() {
        let mut r = runtime();
        let capabilities = WorkerCapabilities {
            serialize: false,
            hydrate: true,
        };
        let (responses, _) = handle_request(
            &mut r,
            &json!({ "kind": "serialize", "requestId": "s1" }),
            &capabilities,
        );
        match &responses[0] {
            WorkerResponse::SaveData { ok, error, .. } => {
                assert!(!ok);
                assert_eq!(error.as_deref(), Some("CAPABILITY_UNAVAILABLE"));
            }
            other => panic!("expected saveData, got {other:?}"),
        }
    }

    #[test]
    fn invalid_save_reports_invalid_save_data() {
        let mut r = runtime();
        let (responses, _) = handle_request(
            &mut r,
            &json!({ "kind": "hydrate", "requestId": "h1", "save": { "junk": true } }),
            &WorkerCapabilities::default(),
        );
        match &responses[0] {
            WorkerResponse::HydrateResult { ok, error, .. } => {
                assert!(!ok);
                assert_eq!(error.as_deref(), Some("INVALID_SAVE_DATA"));
            }
            other => panic!("expected hydrateResult, got {other:?}"),
        }
    }

    #[test]
    fn worker_thread_starts_ticks_and_stops() {
        let host = WorkerHost::start(runtime(), WorkerCapabilities::default());
        assert!(host.submit(json!({ "kind": "tick", "deltaMs": 100.0 })));

        // The explicit tick (and possibly interval ticks) produce frames.
        let response = host
            .responses()
            .recv_timeout(Duration::from_secs(2))
            .expect("worker should respond");
        assert!(matches!(response, WorkerResponse::Frame { .. }));

        let runtime = host.stop().expect("runtime recovered");
        assert!(runtime.current_step().0 >= 1);
    }
}
