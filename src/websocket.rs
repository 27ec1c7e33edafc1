//! # Interview WebSocket Gateway
//!
//! One actor per browser tab. It authenticates the tab once at handshake,
//! routes interview events to the [`InterviewService`](crate::interview::InterviewService)
//! and speech events to its own [`SttRelay`], and writes every reply back to
//! the same connection.
//!
//! ## WebSocket Protocol:
//! Text frames carry `{"event": <name>, "data": <payload>}` in both
//! directions. Binary frames from the client are raw PCM audio chunks.
//!
//! ### Client → Server:
//! - `user-message` `{sessionId, messageContent}`
//! - `end-interview` `{sessionId, videoUrl}`
//! - `start-sarvam-stt` `{languageCode?, model?, sample_rate?, ...}`
//! - `audio-chunk` byte array, base64 string or `{data}` wrapper
//! - `stop-sarvam-stt`
//!
//! ### Server → Client:
//! - `ai-response` `{response}`
//! - `final-feedback` `{feedback, updatedDetails}`
//! - `sarvam-*` relay events
//! - `error` `{message}`
//!
//! ## Failure model:
//! Nothing a client sends closes the connection. Operation failures become an
//! `error` event with a candidate-facing message; details go to the log.

use crate::auth::CandidateIdentity;
use crate::config::AppConfig;
use crate::error::{AppError, GatewayError};
use crate::interview::{EndInterview, UserMessage};
use crate::rooms::RoomEvent;
use crate::state::{AppState, GatewayCounter};
use crate::stt::{normalize_audio, RelayEvent, RelayNotice, StartOptions, SttRelay};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
struct ClientEnvelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// A decoded client event.
#[derive(Debug)]
pub enum ClientEvent {
    UserMessage(UserMessage),
    EndInterview(EndInterview),
    StartStt(StartOptions),
    AudioChunk(Value),
    StopStt,
    Unknown(String),
}

impl ClientEvent {
    /// Decode a text frame. Payloads that don't fit their event decode as
    /// empty, so the operation reports which field is missing.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let envelope: ClientEnvelope = serde_json::from_str(text)?;
        let data = envelope.data;

        Ok(match envelope.event.as_str() {
            "user-message" => ClientEvent::UserMessage(serde_json::from_value(data).unwrap_or_default()),
            "end-interview" => ClientEvent::EndInterview(serde_json::from_value(data).unwrap_or_default()),
            "start-sarvam-stt" => ClientEvent::StartStt(serde_json::from_value(data).unwrap_or_default()),
            "audio-chunk" => ClientEvent::AudioChunk(data),
            "stop-sarvam-stt" => ClientEvent::StopStt,
            _ => ClientEvent::Unknown(envelope.event),
        })
    }
}

/// Serialize an outbound `{event, data}` frame.
pub fn frame(event: &str, data: Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}

fn error_frame(message: &str) -> String {
    frame("error", json!({ "message": message }))
}

/// Text to write to the client, sent from spawned tasks.
#[derive(Message)]
#[rtype(result = "()")]
struct SendText(String);

pub struct InterviewSocket {
    id: Uuid,
    state: AppState,
    identity: Option<CandidateIdentity>,
    relay: SttRelay,
    notices: Option<mpsc::UnboundedReceiver<RelayNotice>>,
    /// Whether this connection currently counts toward `active_relays`
    relay_counted: bool,
    last_heartbeat: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl InterviewSocket {
    pub fn new(state: AppState, identity: Option<CandidateIdentity>, config: &AppConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let relay = SttRelay::new(state.connector.clone(), config.stt.clone(), tx);
        Self {
            id: Uuid::new_v4(),
            state,
            identity,
            relay,
            notices: Some(rx),
            relay_counted: false,
            last_heartbeat: Instant::now(),
            heartbeat_interval: config.heartbeat_interval(),
            client_timeout: config.client_timeout(),
        }
    }

    fn candidate_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|identity| identity.id.as_str())
    }

    fn handle_event(&mut self, event: ClientEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match event {
            ClientEvent::UserMessage(message) => self.handle_user_message(message, ctx),
            ClientEvent::EndInterview(request) => self.handle_end_interview(request, ctx),
            ClientEvent::StartStt(options) => {
                let events = self.relay.start(&options);
                if self.relay.state().is_live() && !self.relay_counted {
                    self.state.record_gateway(GatewayCounter::RelayStarted);
                }
                self.emit_relay(events, ctx);
            }
            ClientEvent::AudioChunk(payload) => match normalize_audio(&payload) {
                Ok(pcm) => {
                    self.relay.audio_chunk(&pcm);
                }
                Err(err) => debug!(connection_id = %self.id, error = %err, "Unusable audio chunk dropped"),
            },
            ClientEvent::StopStt => {
                let events = self.relay.stop();
                self.emit_relay(events, ctx);
            }
            ClientEvent::Unknown(name) => {
                debug!(connection_id = %self.id, event = %name, "Ignoring unknown event");
            }
        }
    }

    fn handle_user_message(&mut self, message: UserMessage, ctx: &mut ws::WebsocketContext<Self>) {
        self.state.record_gateway(GatewayCounter::UserMessage);

        let state = self.state.clone();
        let identity = self.identity.clone();
        let connection_id = self.id;
        let addr = ctx.address();

        tokio::spawn(async move {
            let text = match state.service.handle_user_message(identity.as_ref(), message).await {
                Ok(response) => {
                    state.record_gateway(GatewayCounter::AiResponse);
                    frame("ai-response", json!({ "response": response }))
                }
                Err(err) => failure_frame(&state, connection_id, "user-message", &err),
            };
            addr.do_send(SendText(text));
        });
    }

    fn handle_end_interview(&mut self, request: EndInterview, ctx: &mut ws::WebsocketContext<Self>) {
        let state = self.state.clone();
        let identity = self.identity.clone();
        let connection_id = self.id;
        let addr = ctx.address();

        tokio::spawn(async move {
            let text = match state.service.handle_end_interview(identity.as_ref(), request).await {
                Ok(outcome) => {
                    state.record_gateway(GatewayCounter::InterviewFinalized);
                    frame(
                        "final-feedback",
                        json!({
                            "feedback": outcome.feedback,
                            "updatedDetails": outcome.updated_details,
                        }),
                    )
                }
                Err(err) => failure_frame(&state, connection_id, "end-interview", &err),
            };
            addr.do_send(SendText(text));
        });
    }

    fn emit_relay(&mut self, events: Vec<RelayEvent>, ctx: &mut ws::WebsocketContext<Self>) {
        for event in events {
            ctx.text(frame(event.name(), event.payload()));
        }
        self.sync_relay_metric();
    }

    fn sync_relay_metric(&mut self) {
        let live = self.relay.state().is_live();
        if live != self.relay_counted {
            if live {
                self.state.increment_active_relays();
            } else {
                self.state.decrement_active_relays();
            }
            self.relay_counted = live;
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(connection_id = %act.id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

fn failure_frame(state: &AppState, connection_id: Uuid, operation: &str, err: &GatewayError) -> String {
    match err {
        GatewayError::Store(_) => {
            error!(%connection_id, operation, error = %err, "Interview operation failed")
        }
        _ => warn!(%connection_id, operation, error = %err, "Interview operation rejected"),
    }
    state.record_gateway(GatewayCounter::ClientError);
    error_frame(err.client_message())
}

impl Actor for InterviewSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(
            connection_id = %self.id,
            candidate_id = self.candidate_id().unwrap_or("anonymous"),
            "WebSocket connection started"
        );

        if let Some(rx) = self.notices.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }

        if let Some(identity) = &self.identity {
            self.state
                .rooms
                .join(&identity.id, self.id, ctx.address().recipient());
        }

        self.heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Session state stays; only the recognition session is torn down
        self.relay.disconnect();
        self.sync_relay_metric();

        if let Some(identity) = &self.identity {
            self.state.rooms.leave(&identity.id, self.id);
        }
        self.state.rooms.close();

        info!(connection_id = %self.id, "WebSocket connection stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for InterviewSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match ClientEvent::parse(&text) {
                    Ok(event) => self.handle_event(event, ctx),
                    Err(err) => {
                        debug!(connection_id = %self.id, error = %err, "Malformed client frame");
                        ctx.text(error_frame("Invalid message format"));
                    }
                }
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.relay.audio_chunk(&data);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.id, ?reason, "WebSocket closed by client");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl StreamHandler<RelayNotice> for InterviewSocket {
    fn handle(&mut self, notice: RelayNotice, ctx: &mut Self::Context) {
        let events = self.relay.on_notice(notice);
        self.emit_relay(events, ctx);
    }

    // The relay holds a sender for the actor's whole life
    fn finished(&mut self, _ctx: &mut Self::Context) {}
}

impl Handler<SendText> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, msg: SendText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<RoomEvent> for InterviewSocket {
    type Result = ();

    fn handle(&mut self, msg: RoomEvent, ctx: &mut Self::Context) {
        ctx.text(frame(&msg.event, msg.data));
    }
}

/// WebSocket endpoint handler for `GET /ws/interview`.
///
/// Claims a connection slot (503 when the limit is reached), resolves the
/// candidate from the handshake and upgrades into an [`InterviewSocket`].
pub async fn interview_socket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let config = state.get_config();
    if !state.rooms.try_open(config.performance.max_concurrent_connections) {
        warn!(
            limit = config.performance.max_concurrent_connections,
            "Connection limit reached, refusing websocket"
        );
        return Err(AppError::Unavailable("Too many concurrent connections".to_string()));
    }

    debug!(peer = ?req.connection_info().peer_addr(), "New websocket connection request");
    let identity = state.auth.identify(&req).await;
    let socket = InterviewSocket::new(state.get_ref().clone(), identity, &config);

    ws::start(socket, &req, stream).map_err(|err| {
        state.rooms.close();
        AppError::BadRequest(err.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{state_with, FixedModel};
    use crate::store::{Candidate, InterviewDetails, KeyValueStore, MemoryCache, MemoryRecordStore, RecordStore};
    use crate::stt::relay::{NoticeKind, NoticeSender, UpstreamCommand, UpstreamHandle};
    use crate::stt::SttConnector;
    use actix_web::error::PayloadError;
    use actix_web::http::StatusCode;
    use actix_web::test::{call_service, init_service, TestRequest};
    use actix_web::web::Bytes;
    use actix_web::App;
    use futures_util::{Stream, StreamExt};
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use url::Url;

    const REPLY: &str = "Tell me about a recent project.";

    /// Connector whose sessions open at once and stay scriptable.
    #[derive(Default)]
    struct ScriptedConnector {
        sessions: Mutex<Vec<(NoticeSender, mpsc::UnboundedReceiver<UpstreamCommand>)>>,
    }

    impl ScriptedConnector {
        fn notify(&self, kind: NoticeKind) {
            let sessions = self.sessions.lock().unwrap();
            sessions.last().unwrap().0.notify(kind);
        }

        fn commands(&self) -> Vec<UpstreamCommand> {
            let mut sessions = self.sessions.lock().unwrap();
            let mut received = Vec::new();
            if let Some((_, commands)) = sessions.last_mut() {
                while let Ok(command) = commands.try_recv() {
                    received.push(command);
                }
            }
            received
        }
    }

    impl SttConnector for ScriptedConnector {
        fn connect(&self, _url: Url, notices: NoticeSender) -> UpstreamHandle {
            notices.notify(NoticeKind::Opened);
            let (tx, rx) = mpsc::unbounded_channel();
            self.sessions.lock().unwrap().push((notices, rx));
            UpstreamHandle::new(tx)
        }
    }

    fn candidate() -> CandidateIdentity {
        CandidateIdentity {
            id: "c1".into(),
            email: "cand@example.com".into(),
            name: None,
        }
    }

    async fn gateway_state(connector: Arc<ScriptedConnector>) -> AppState {
        let records = Arc::new(MemoryRecordStore::new());
        records
            .upsert_interview(InterviewDetails {
                id: "S1".into(),
                duration: Some("10".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        records
            .upsert_candidate(Candidate {
                id: "c1".into(),
                email: "cand@example.com".into(),
                name: None,
                number_of_attempts: 0,
            })
            .await
            .unwrap();

        AppState::with_backends(
            AppConfig::default(),
            Arc::new(MemoryCache::new()),
            records,
            Arc::new(FixedModel(REPLY)),
            connector,
        )
    }

    /// Drives an `InterviewSocket` through raw websocket frames.
    struct Client {
        input: mpsc::UnboundedSender<Result<Bytes, PayloadError>>,
        output: Pin<Box<dyn Stream<Item = Result<Bytes, actix_web::Error>>>>,
        buf: Vec<u8>,
    }

    impl Client {
        fn connect(state: &AppState, identity: Option<CandidateIdentity>) -> Self {
            let config = state.get_config();
            assert!(state.rooms.try_open(config.performance.max_concurrent_connections));
            let (input, rx) = mpsc::unbounded_channel();
            let socket = InterviewSocket::new(state.clone(), identity, &config);
            let output = ws::WebsocketContext::create(socket, UnboundedReceiverStream::new(rx));
            Self {
                input,
                output: Box::pin(output),
                buf: Vec::new(),
            }
        }

        /// Client frames are masked; a zero key leaves the payload as is.
        fn send_frame(&self, opcode: u8, payload: &[u8]) {
            let mut frame = vec![0x80 | opcode];
            if payload.len() < 126 {
                frame.push(0x80 | payload.len() as u8);
            } else {
                frame.push(0x80 | 126);
                frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
            }
            frame.extend_from_slice(&[0, 0, 0, 0]);
            frame.extend_from_slice(payload);
            self.input.send(Ok(Bytes::from(frame))).unwrap();
        }

        fn send_event(&self, event: &str, data: Value) {
            self.send_frame(0x1, frame(event, data).as_bytes());
        }

        /// Poll the actor once; returns false when the connection has ended.
        async fn pump(&mut self, wait: Duration) -> bool {
            match tokio::time::timeout(wait, self.output.next()).await {
                Ok(Some(Ok(bytes))) => {
                    self.buf.extend_from_slice(&bytes);
                    true
                }
                Ok(Some(Err(err))) => panic!("socket error: {err}"),
                Ok(None) => false,
                Err(_) => true,
            }
        }

        fn take_text(&mut self) -> Option<Value> {
            loop {
                let (opcode, payload, used) = parse_server_frame(&self.buf)?;
                self.buf.drain(..used);
                if opcode == 0x1 {
                    return Some(serde_json::from_slice(&payload).unwrap());
                }
            }
        }

        async fn next_event(&mut self) -> Value {
            for _ in 0..100 {
                if let Some(value) = self.take_text() {
                    return value;
                }
                assert!(self.pump(Duration::from_millis(50)).await, "connection ended");
            }
            panic!("no event from the gateway");
        }

        /// Close the client side and run the actor to completion.
        async fn disconnect(self) {
            let Client { input, mut output, .. } = self;
            drop(input);
            for _ in 0..100 {
                if let Ok(None) = tokio::time::timeout(Duration::from_millis(50), output.next()).await {
                    return;
                }
            }
            panic!("gateway did not stop");
        }
    }

    /// Server frames are unmasked: opcode, length, payload.
    fn parse_server_frame(buf: &[u8]) -> Option<(u8, Vec<u8>, usize)> {
        if buf.len() < 2 {
            return None;
        }
        let (len, header) = match buf[1] & 0x7f {
            126 if buf.len() >= 4 => (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4),
            127 if buf.len() >= 10 => {
                let mut size = [0u8; 8];
                size.copy_from_slice(&buf[2..10]);
                (u64::from_be_bytes(size) as usize, 10)
            }
            126 | 127 => return None,
            len => (len as usize, 2),
        };
        if buf.len() < header + len {
            return None;
        }
        Some((buf[0] & 0x0f, buf[header..header + len].to_vec(), header + len))
    }

    #[test]
    fn test_parse_interview_events() {
        let event = ClientEvent::parse(
            r#"{"event":"user-message","data":{"sessionId":"S1","messageContent":"Hello"}}"#,
        )
        .unwrap();
        match event {
            ClientEvent::UserMessage(message) => {
                assert_eq!(message.session_id.as_deref(), Some("S1"));
                assert_eq!(message.message_content.as_deref(), Some("Hello"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let event = ClientEvent::parse(r#"{"event":"end-interview","data":null}"#).unwrap();
        match event {
            ClientEvent::EndInterview(request) => {
                assert!(request.session_id.is_none());
                assert!(request.video_url.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_speech_events() {
        let event = ClientEvent::parse(
            r#"{"event":"start-sarvam-stt","data":{"languageCode":"hi-IN","vad_signals":true}}"#,
        )
        .unwrap();
        match event {
            ClientEvent::StartStt(options) => {
                assert_eq!(options.language_code.as_deref(), Some("hi-IN"));
                assert_eq!(options.vad_signals, Some(json!(true)));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        assert!(matches!(
            ClientEvent::parse(r#"{"event":"stop-sarvam-stt"}"#).unwrap(),
            ClientEvent::StopStt
        ));
        assert!(matches!(
            ClientEvent::parse(r#"{"event":"audio-chunk","data":[1,2]}"#).unwrap(),
            ClientEvent::AudioChunk(Value::Array(_))
        ));
        assert!(matches!(
            ClientEvent::parse(r#"{"event":"dance"}"#).unwrap(),
            ClientEvent::Unknown(name) if name == "dance"
        ));
        assert!(ClientEvent::parse("not json").is_err());
    }

    #[test]
    fn test_outbound_frames() {
        let text = frame("ai-response", json!({"response": "Hi"}));
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"event": "ai-response", "data": {"response": "Hi"}}));

        let value: Value =
            serde_json::from_str(&error_frame(GatewayError::EmptyMessage.client_message())).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["data"]["message"], "No message content provided.");
    }

    #[actix_web::test]
    async fn test_connection_limit_returns_503() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_connections = 1;
        let state = state_with(config, Arc::new(MemoryRecordStore::new()));
        assert!(state.rooms.try_open(1));

        let app = init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/ws/interview", web::get().to(interview_socket)),
        )
        .await;

        let req = TestRequest::get().uri("/ws/interview").to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn test_failed_handshake_releases_slot() {
        let state = state_with(AppConfig::default(), Arc::new(MemoryRecordStore::new()));
        let app = init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/ws/interview", web::get().to(interview_socket)),
        )
        .await;

        // No upgrade headers
        let req = TestRequest::get().uri("/ws/interview").to_request();
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.rooms.connection_count(), 0);
    }

    #[actix_web::test]
    async fn test_user_message_gets_ai_response() {
        let connector = Arc::new(ScriptedConnector::default());
        let state = gateway_state(connector).await;
        state
            .service
            .start_interview(&candidate(), "S1", "Backend engineer")
            .await
            .unwrap();

        let mut client = Client::connect(&state, Some(candidate()));
        client.send_event(
            "user-message",
            json!({"sessionId": "S1", "messageContent": "Hello"}),
        );

        let reply = client.next_event().await;
        assert_eq!(reply, json!({"event": "ai-response", "data": {"response": REPLY}}));
        assert_eq!(state.rooms.members("c1"), 1);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.gateway.user_messages, 1);
        assert_eq!(metrics.gateway.ai_responses, 1);
    }

    #[actix_web::test]
    async fn test_unauthenticated_message_keeps_connection_open() {
        let state = gateway_state(Arc::new(ScriptedConnector::default())).await;
        let mut client = Client::connect(&state, None);

        for _ in 0..2 {
            client.send_event(
                "user-message",
                json!({"sessionId": "S1", "messageContent": "Hello"}),
            );
            let reply = client.next_event().await;
            assert_eq!(reply["event"], "error");
            assert_eq!(
                reply["data"]["message"],
                GatewayError::NotAuthenticated.client_message()
            );
        }

        client.send_frame(0x1, b"not json");
        assert_eq!(client.next_event().await["data"]["message"], "Invalid message format");
        assert_eq!(state.rooms.room_count(), 0);
    }

    #[actix_web::test]
    async fn test_relay_notices_become_client_events() {
        let connector = Arc::new(ScriptedConnector::default());
        let state = gateway_state(connector.clone()).await;
        let mut client = Client::connect(&state, Some(candidate()));

        client.send_event("start-sarvam-stt", json!({"languageCode": "en-IN"}));
        assert_eq!(client.next_event().await["event"], "sarvam-ready");
        assert_eq!(state.get_metrics_snapshot().active_relays, 1);

        connector.notify(NoticeKind::Message(
            json!({"type": "data", "data": {"transcript": "hello world", "request_id": "r1"}})
                .to_string(),
        ));
        let interim = client.next_event().await;
        assert_eq!(interim["event"], "sarvam-transcript-interim");
        assert_eq!(interim["data"]["text"], "hello world");

        client.send_frame(0x2, &[1, 2, 3, 4]);
        client.send_event("stop-sarvam-stt", Value::Null);
        let mut commands = Vec::new();
        for _ in 0..40 {
            commands.extend(connector.commands());
            if commands.len() >= 2 {
                break;
            }
            client.pump(Duration::from_millis(25)).await;
        }
        assert!(matches!(&commands[0], UpstreamCommand::Send(audio) if audio.contains("\"audio\"")));
        assert_eq!(
            commands[1],
            UpstreamCommand::Send(crate::stt::protocol::FLUSH_MESSAGE.to_string())
        );

        connector.notify(NoticeKind::Closed {
            code: 1000,
            reason: "done".into(),
        });
        let last = client.next_event().await;
        assert_eq!(last["event"], "sarvam-transcript-final");
        assert_eq!(last["data"]["text"], "hello world");
        let closed = client.next_event().await;
        assert_eq!(closed, json!({"event": "sarvam-closed", "data": {"code": 1000, "reason": "done"}}));
        assert_eq!(state.get_metrics_snapshot().active_relays, 0);
    }

    #[actix_web::test]
    async fn test_room_events_reach_open_tabs() {
        let state = gateway_state(Arc::new(ScriptedConnector::default())).await;
        let mut client = Client::connect(&state, Some(candidate()));
        client.send_event("stop-sarvam-stt", Value::Null);
        client.pump(Duration::from_millis(50)).await;

        let delivered = state
            .rooms
            .deliver("c1", RoomEvent::new("interview-started", json!({"sessionId": "S1"})));
        assert_eq!(delivered, 1);
        let event = client.next_event().await;
        assert_eq!(event["event"], "interview-started");
        assert_eq!(event["data"]["sessionId"], "S1");
    }

    #[actix_web::test]
    async fn test_disconnect_tears_down_relay_only() {
        let connector = Arc::new(ScriptedConnector::default());
        let state = gateway_state(connector.clone()).await;
        state
            .service
            .start_interview(&candidate(), "S1", "Backend engineer")
            .await
            .unwrap();

        let mut client = Client::connect(&state, Some(candidate()));
        client.send_event("start-sarvam-stt", Value::Null);
        assert_eq!(client.next_event().await["event"], "sarvam-ready");
        assert_eq!(state.rooms.members("c1"), 1);
        assert_eq!(state.rooms.connection_count(), 1);

        client.disconnect().await;

        assert_eq!(connector.commands(), vec![UpstreamCommand::Close]);
        assert_eq!(state.get_metrics_snapshot().active_relays, 0);
        assert_eq!(state.rooms.members("c1"), 0);
        assert_eq!(state.rooms.connection_count(), 0);
        assert!(state.cache.get("interview:c1").await.unwrap().is_some());
    }
}
