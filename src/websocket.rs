//! # Duplex Session Protocol
//!
//! The WebSocket dispatch loop for live-transcription and scripted-playback
//! sessions. Clients connect, send a `start` control frame, then stream
//! binary audio; the engine's events stream back interleaved with `system`
//! acknowledgment frames.
//!
//! ## WebSocket Protocol:
//! - **Client → Server (text)**: JSON control frames —
//!   `{"type":"start","patient_id":...,"script_file":...}` or
//!   `{"status":true}` (graceful stop). Anything else is ignored; frames
//!   that fail to parse are logged and dropped, never fatal.
//! - **Client → Server (binary)**: opaque audio bytes, forwarded to the
//!   engine only while a session is Active, silently dropped otherwise.
//! - **Server → Client (text)**: `{"type":"system","message":...}` frames
//!   plus engine-defined event payloads, delivered in production order.
//!
//! ## Actor Model:
//! Each connection is one actix actor owning exactly one session. The engine
//! runs on its own thread behind a `SessionBridge`; its event receiver is
//! registered as a second stream on the actor, so delivery shares the
//! connection's mailbox and can never race the receive loop.

use crate::session::engine::{EngineEvent, RecognitionEngine, SessionContext};
use crate::session::{SessionBridge, SessionState};
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How often the server pings an idle connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long without any pong/ping before the connection is presumed dead.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// A classified inbound control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// `{"type":"start", ...}` — begin a session.
    Start {
        patient_id: Option<String>,
        script_file: Option<String>,
    },

    /// `{"status": true}` — graceful end-of-session.
    Stop,

    /// Valid JSON of any other shape; ignored.
    Unknown,
}

impl ControlMessage {
    /// Parse one text frame. A JSON error here is the caller's cue to log
    /// and keep the loop alive — malformed frames never end a session.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::classify(&value))
    }

    fn classify(value: &Value) -> Self {
        // Only a literal `true` stops; {"status": false} is not a command.
        if value.get("status").and_then(Value::as_bool) == Some(true) {
            return ControlMessage::Stop;
        }

        if value.get("type").and_then(Value::as_str) == Some("start") {
            return ControlMessage::Start {
                patient_id: value
                    .get("patient_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                script_file: value
                    .get("script_file")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            };
        }

        ControlMessage::Unknown
    }
}

/// Which endpoint the connection arrived on. The protocol is identical;
/// the variant only flavors logs and acknowledgments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionVariant {
    Transcriber,
    ScriptedPlayback,
}

impl SessionVariant {
    pub fn label(&self) -> &'static str {
        match self {
            SessionVariant::Transcriber => "Transcriber",
            SessionVariant::ScriptedPlayback => "Scripted playback",
        }
    }
}

/// Sent back to the actor once the engine for a starting session is built.
#[derive(Message)]
#[rtype(result = "()")]
struct SessionReady {
    patient_id: String,
    engine: Box<dyn RecognitionEngine>,
}

/// Sent back to the actor when seed fetch or engine construction failed.
#[derive(Message)]
#[rtype(result = "()")]
struct SessionStartFailed {
    patient_id: String,
    reason: String,
}

/// WebSocket actor owning one duplex session.
pub struct SessionSocket {
    /// Correlation id for this connection's log lines
    connection_id: String,

    variant: SessionVariant,

    state: AppState,

    /// Session lifecycle; audio is forwarded only while Active
    session: SessionState,

    /// The bridge to the engine thread, present from Ready until teardown
    bridge: Option<SessionBridge>,

    /// True between a start frame and its SessionReady/SessionStartFailed,
    /// so an overlapping start cannot build a second engine
    start_pending: bool,

    last_heartbeat: Instant,
}

impl SessionSocket {
    pub fn new(variant: SessionVariant, state: AppState) -> Self {
        Self {
            connection_id: Uuid::new_v4().to_string(),
            variant,
            state,
            session: SessionState::Idle,
            bridge: None,
            start_pending: false,
            last_heartbeat: Instant::now(),
        }
    }

    /// Send a `{"type":"system"}` frame to the client.
    fn send_system(&self, ctx: &mut ws::WebsocketContext<Self>, message: &str) {
        let frame = json!({"type": "system", "message": message});
        ctx.text(frame.to_string());
    }

    /// Dispatch one text frame.
    fn handle_control(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match ControlMessage::parse(text) {
            Err(err) => {
                // Liveness over strictness: drop the frame, keep the session.
                error!(
                    connection = %self.connection_id,
                    "Received invalid JSON control frame: {}", err
                );
            }
            Ok(ControlMessage::Stop) => self.handle_stop(ctx),
            Ok(ControlMessage::Start {
                patient_id,
                script_file,
            }) => self.handle_start(patient_id, script_file, ctx),
            Ok(ControlMessage::Unknown) => {
                debug!(
                    connection = %self.connection_id,
                    "Ignoring control frame with unrecognized shape"
                );
            }
        }
    }

    /// `{"status": true}`: graceful finish if a session is Active, otherwise
    /// a warning frame and nothing else.
    fn handle_stop(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        match (&self.bridge, self.session) {
            (Some(bridge), SessionState::Active) => {
                info!(
                    connection = %self.connection_id,
                    "Client requested end of session for {}", bridge.patient_id()
                );
                bridge.finish();
                self.session = SessionState::Finishing;
            }
            _ => {
                warn!(
                    connection = %self.connection_id,
                    "Client sent stop signal, but no session is running (state: {})",
                    self.session.as_str()
                );
                self.send_system(ctx, "No active session to stop");
            }
        }
    }

    /// `{"type":"start"}`: fetch seed context and build the engine off the
    /// actor, then finish activation in the SessionReady handler. A start
    /// while a session is Active (or still starting) leaves the existing
    /// engine untouched.
    fn handle_start(
        &mut self,
        patient_id: Option<String>,
        script_file: Option<String>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        if self.start_pending || !self.session.can_start() {
            warn!(
                connection = %self.connection_id,
                "Ignoring start frame while session is {} (one session per connection)",
                self.session.as_str()
            );
            return;
        }

        let config = self.state.get_config();
        let patient_id = patient_id.unwrap_or_else(|| config.session.default_patient_id.clone());
        self.start_pending = true;

        info!(
            connection = %self.connection_id,
            "Starting {} session for {}", self.variant.label(), patient_id
        );

        let state = self.state.clone();
        let seed_document = config.session.seed_document.clone();
        let addr = ctx.address();

        tokio::spawn(async move {
            // Seed context is required: an unreachable document store fails
            // the start, it does not silently produce an empty context.
            let seed_context = match state.documents().fetch_text(&patient_id, &seed_document).await
            {
                Ok(text) => text,
                Err(err) => {
                    addr.do_send(SessionStartFailed {
                        patient_id,
                        reason: format!("seed context unavailable: {}", err),
                    });
                    return;
                }
            };

            let session_ctx = SessionContext {
                patient_id: patient_id.clone(),
                seed_context,
                script_file,
                questions: state.questions().session_copy(),
            };

            match state.engine_factory().create(&session_ctx).await {
                Ok(engine) => addr.do_send(SessionReady { patient_id, engine }),
                Err(err) => addr.do_send(SessionStartFailed {
                    patient_id,
                    reason: format!("{:#}", err),
                }),
            }
        });
    }

    /// Idempotent release of the engine. Every exit path funnels through
    /// here: graceful finish, engine failure, disconnect, protocol error.
    fn teardown(&mut self) {
        if let Some(mut bridge) = self.bridge.take() {
            info!(
                connection = %self.connection_id,
                "Stopping engine for {}", bridge.patient_id()
            );
            bridge.stop();
            self.state.decrement_active_sessions();
        }
        self.session = SessionState::Closed;
    }
}

impl Actor for SessionSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            connection = %self.connection_id,
            "{} connection established", self.variant.label()
        );

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(
                    connection = %act.connection_id,
                    "Heartbeat timeout, closing connection"
                );
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(
            connection = %self.connection_id,
            "{} connection closed", self.variant.label()
        );
        self.teardown();
    }
}

/// The connection's frame loop.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SessionSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.handle_control(&text, ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                if self.session.accepts_audio() {
                    if let Some(bridge) = &self.bridge {
                        if !bridge.feed(&data) {
                            debug!(
                                connection = %self.connection_id,
                                "Dropped {} audio bytes; engine no longer live", data.len()
                            );
                        }
                    }
                } else {
                    debug!(
                        connection = %self.connection_id,
                        "Dropped {} audio bytes outside an active session ({})",
                        data.len(),
                        self.session.as_str()
                    );
                }
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(
                    connection = %self.connection_id,
                    "Client closed connection: {:?}", reason
                );
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(
                    connection = %self.connection_id,
                    "Unexpected continuation frame"
                );
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                // The error stops with us: teardown runs in stopped() and
                // nothing is re-raised to the transport layer.
                error!(
                    connection = %self.connection_id,
                    "WebSocket protocol error: {}", err
                );
                ctx.stop();
            }
        }
    }
}

/// Engine events, marshaled from the engine thread in production order.
impl StreamHandler<EngineEvent> for SessionSocket {
    fn handle(&mut self, event: EngineEvent, ctx: &mut Self::Context) {
        ctx.text(event.0.to_string());
    }

    /// The event stream ends exactly when the engine loop exits — graceful
    /// finish, playback complete, or engine failure. The session closes but
    /// the connection stays up; a fresh start frame may open a new session.
    fn finished(&mut self, _ctx: &mut Self::Context) {
        info!(
            connection = %self.connection_id,
            "Engine event stream ended; closing session"
        );
        self.teardown();
    }
}

impl Handler<SessionReady> for SessionSocket {
    type Result = ();

    fn handle(&mut self, msg: SessionReady, ctx: &mut Self::Context) {
        self.start_pending = false;

        match SessionBridge::start(msg.patient_id.clone(), msg.engine) {
            Ok((bridge, events)) => {
                self.bridge = Some(bridge);
                self.session = SessionState::Active;
                self.state.increment_active_sessions();
                ctx.add_stream(UnboundedReceiverStream::new(events));

                info!(
                    connection = %self.connection_id,
                    "Session active for {}", msg.patient_id
                );
                self.send_system(
                    ctx,
                    &format!("{} initialized for {}", self.variant.label(), msg.patient_id),
                );
            }
            Err(err) => {
                error!(
                    connection = %self.connection_id,
                    "Failed to launch engine for {}: {:#}", msg.patient_id, err
                );
                self.send_system(
                    ctx,
                    &format!("Failed to start session for {}", msg.patient_id),
                );
            }
        }
    }
}

impl Handler<SessionStartFailed> for SessionSocket {
    type Result = ();

    fn handle(&mut self, msg: SessionStartFailed, ctx: &mut Self::Context) {
        self.start_pending = false;

        error!(
            connection = %self.connection_id,
            "Session start failed for {}: {}", msg.patient_id, msg.reason
        );
        self.send_system(
            ctx,
            &format!("Failed to start session for {}: {}", msg.patient_id, msg.reason),
        );
    }
}

/// `GET /ws/transcriber` — live transcription session endpoint.
pub async fn transcriber_session(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New transcriber connection from {:?}",
        req.connection_info().peer_addr()
    );
    ws::start(
        SessionSocket::new(SessionVariant::Transcriber, state.get_ref().clone()),
        &req,
        stream,
    )
}

/// `GET /ws/simulation/audio` — scripted playback session endpoint.
pub async fn playback_session(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New scripted playback connection from {:?}",
        req.connection_info().peer_addr()
    );
    ws::start(
        SessionSocket::new(SessionVariant::ScriptedPlayback, state.get_ref().clone()),
        &req,
        stream,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_frame() {
        let msg =
            ControlMessage::parse(r#"{"type":"start","patient_id":"p007","script_file":"s.json"}"#)
                .unwrap();
        assert_eq!(
            msg,
            ControlMessage::Start {
                patient_id: Some("p007".to_string()),
                script_file: Some("s.json".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_start_frame_defaults() {
        let msg = ControlMessage::parse(r#"{"type":"start"}"#).unwrap();
        assert_eq!(
            msg,
            ControlMessage::Start {
                patient_id: None,
                script_file: None,
            }
        );
    }

    #[test]
    fn test_parse_stop_frame() {
        assert_eq!(
            ControlMessage::parse(r#"{"status": true}"#).unwrap(),
            ControlMessage::Stop
        );
        // Only literal true is a stop command
        assert_eq!(
            ControlMessage::parse(r#"{"status": false}"#).unwrap(),
            ControlMessage::Unknown
        );
        assert_eq!(
            ControlMessage::parse(r#"{"status": "true"}"#).unwrap(),
            ControlMessage::Unknown
        );
    }

    #[test]
    fn test_parse_unknown_shapes() {
        assert_eq!(
            ControlMessage::parse(r#"{"type":"pause"}"#).unwrap(),
            ControlMessage::Unknown
        );
        assert_eq!(
            ControlMessage::parse(r#"[1, 2, 3]"#).unwrap(),
            ControlMessage::Unknown
        );
        assert_eq!(
            ControlMessage::parse(r#""just a string""#).unwrap(),
            ControlMessage::Unknown
        );
    }

    #[test]
    fn test_parse_malformed_frame_is_recoverable_error() {
        // Truncated JSON is an Err, not a panic and not a session command;
        // the dispatch loop logs it and keeps going.
        assert!(ControlMessage::parse(r#"{"type":"#).is_err());
        assert!(ControlMessage::parse("").is_err());
    }

    #[test]
    fn test_variant_labels() {
        assert_eq!(SessionVariant::Transcriber.label(), "Transcriber");
        assert_eq!(SessionVariant::ScriptedPlayback.label(), "Scripted playback");
    }
}
