//! # STT Relay
//!
//! Per-connection state machine between the browser and the streaming
//! recognition service.
//!
//! ## States:
//! ```text
//! Idle ──start──▶ Opening ──opened──▶ Open ──stop──▶ Closing
//!   ▲                │                  │                │
//!   │                └──────── upstream closed ──────────┴──▶ Closed
//!   └──────────────────── disconnect ◀──────────────────────────┘
//! ```
//!
//! ## Ownership:
//! The websocket actor owns one `SttRelay` and calls into it from its own
//! context, so the relay needs no locking. Everything the upstream task and
//! the flush timer report comes back as a [`RelayNotice`] on the actor's
//! notice channel and is applied through [`SttRelay::on_notice`].
//!
//! Every notice carries the generation of the upstream session that produced
//! it. Notices from an earlier session are ignored.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::protocol::{
    audio_envelope, is_end_of_speech, session_url, transcript_of, RelayEvent, StartOptions,
    UpstreamMessage, FLUSH_MESSAGE,
};
use crate::config::SttConfig;

/// What the upstream task or the flush timer reports.
#[derive(Debug, Clone, PartialEq)]
pub enum NoticeKind {
    Opened,
    Message(String),
    Error(String),
    Closed { code: u16, reason: String },
    FlushTimeout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayNotice {
    pub generation: u64,
    pub kind: NoticeKind,
}

/// Sending half of the notice channel, bound to one upstream session.
#[derive(Debug, Clone)]
pub struct NoticeSender {
    generation: u64,
    tx: mpsc::UnboundedSender<RelayNotice>,
}

impl NoticeSender {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<RelayNotice>) -> Self {
        Self { generation, tx }
    }

    /// Returns false once the receiving connection is gone.
    pub fn notify(&self, kind: NoticeKind) -> bool {
        self.tx
            .send(RelayNotice {
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamCommand {
    Send(String),
    Close,
}

/// Command side of a live upstream session.
#[derive(Debug, Clone)]
pub struct UpstreamHandle {
    commands: mpsc::UnboundedSender<UpstreamCommand>,
}

impl UpstreamHandle {
    pub fn new(commands: mpsc::UnboundedSender<UpstreamCommand>) -> Self {
        Self { commands }
    }

    /// Returns false once the upstream task has finished.
    pub fn send(&self, command: UpstreamCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

/// Opens upstream recognition sessions.
///
/// Implementations report progress through `notices` and must finish every
/// session with exactly one [`NoticeKind::Closed`], including when the
/// connection attempt fails.
pub trait SttConnector: Send + Sync {
    fn connect(&self, url: Url, notices: NoticeSender) -> UpstreamHandle;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Opening,
    Open,
    Closing,
    Closed,
}

impl RelayState {
    pub fn is_live(&self) -> bool {
        matches!(self, RelayState::Opening | RelayState::Open | RelayState::Closing)
    }
}

pub struct SttRelay {
    connector: Arc<dyn SttConnector>,
    config: SttConfig,
    flush_timeout: Duration,
    notices: mpsc::UnboundedSender<RelayNotice>,
    state: RelayState,
    generation: u64,
    upstream: Option<UpstreamHandle>,
    buffer: String,
    flush_pending: bool,
    close_requested: bool,
    flush_timer: Option<JoinHandle<()>>,
}

impl SttRelay {
    pub fn new(
        connector: Arc<dyn SttConnector>,
        config: SttConfig,
        notices: mpsc::UnboundedSender<RelayNotice>,
    ) -> Self {
        let flush_timeout = Duration::from_millis(config.flush_timeout_ms);
        Self {
            connector,
            config,
            flush_timeout,
            notices,
            state: RelayState::Idle,
            generation: 0,
            upstream: None,
            buffer: String::new(),
            flush_pending: false,
            close_requested: false,
            flush_timer: None,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Open an upstream session. No-op while one is live.
    pub fn start(&mut self, options: &StartOptions) -> Vec<RelayEvent> {
        if self.state.is_live() {
            debug!(state = ?self.state, "Recognition session already live, start ignored");
            return Vec::new();
        }

        let url = match session_url(&self.config, options) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "Invalid recognition endpoint");
                return vec![RelayEvent::Error(serde_json::json!({ "error": err.to_string() }))];
            }
        };

        self.cancel_timer();
        self.generation += 1;
        self.buffer.clear();
        self.flush_pending = false;
        self.close_requested = false;
        self.state = RelayState::Opening;

        debug!(generation = self.generation, "Opening recognition session");
        let notices = NoticeSender::new(self.generation, self.notices.clone());
        self.upstream = Some(self.connector.connect(url, notices));
        Vec::new()
    }

    /// Forward one chunk of PCM audio. Returns whether it was sent.
    pub fn audio_chunk(&mut self, pcm: &[u8]) -> bool {
        if self.state != RelayState::Open {
            debug!(state = ?self.state, bytes = pcm.len(), "Audio chunk dropped, session not open");
            return false;
        }
        match &self.upstream {
            Some(upstream) => upstream.send(UpstreamCommand::Send(audio_envelope(pcm))),
            None => false,
        }
    }

    /// Ask for the final transcript and wind the session down.
    pub fn stop(&mut self) -> Vec<RelayEvent> {
        match self.state {
            RelayState::Open => {
                self.flush_pending = true;
                self.state = RelayState::Closing;
                let flushed = self
                    .upstream
                    .as_ref()
                    .is_some_and(|upstream| upstream.send(UpstreamCommand::Send(FLUSH_MESSAGE.to_string())));
                if flushed {
                    self.arm_flush_timer();
                } else {
                    self.request_close();
                }
                Vec::new()
            }
            RelayState::Opening => {
                // Nothing was recognized yet; abandon the pending connection
                self.state = RelayState::Closing;
                self.request_close();
                self.take_final().into_iter().collect()
            }
            _ => self.take_final().into_iter().collect(),
        }
    }

    /// Apply a notice from the upstream task or flush timer.
    pub fn on_notice(&mut self, notice: RelayNotice) -> Vec<RelayEvent> {
        if notice.generation != self.generation {
            debug!(
                generation = notice.generation,
                current = self.generation,
                "Stale recognition notice ignored"
            );
            return Vec::new();
        }

        match notice.kind {
            NoticeKind::Opened => self.on_opened(),
            NoticeKind::Message(raw) => self.on_message(&raw),
            NoticeKind::Error(message) => {
                warn!(error = %message, "Recognition transport error");
                vec![RelayEvent::Error(serde_json::json!({ "error": message }))]
            }
            NoticeKind::Closed { code, reason } => self.on_closed(code, reason),
            NoticeKind::FlushTimeout => {
                self.flush_timer = None;
                if self.state == RelayState::Closing {
                    info!(
                        timeout_ms = self.flush_timeout.as_millis() as u64,
                        "No final transcript before flush timeout, closing upstream"
                    );
                    self.request_close();
                }
                Vec::new()
            }
        }
    }

    /// Tear down on client disconnect. No final transcript is emitted.
    pub fn disconnect(&mut self) {
        self.cancel_timer();
        if self.state.is_live() {
            self.request_close();
        }
        self.upstream = None;
        self.buffer.clear();
        self.flush_pending = false;
        self.state = RelayState::Idle;
    }

    fn on_opened(&mut self) -> Vec<RelayEvent> {
        if self.state != RelayState::Opening {
            return Vec::new();
        }
        self.state = RelayState::Open;
        info!(generation = self.generation, "Recognition session open");
        vec![RelayEvent::Ready]
    }

    fn on_message(&mut self, raw: &str) -> Vec<RelayEvent> {
        match UpstreamMessage::decode(raw) {
            UpstreamMessage::Error(data) => {
                warn!(error = %data, "Recognition service reported an error");
                vec![RelayEvent::Error(data)]
            }
            UpstreamMessage::Events(data) => {
                let end_of_speech = is_end_of_speech(&data);
                let mut events = vec![RelayEvent::Event(data)];
                if end_of_speech {
                    events.extend(self.take_final());
                    if self.flush_pending {
                        self.request_close();
                    }
                }
                events
            }
            UpstreamMessage::Data(data) => match transcript_of(&data) {
                Some(text) => {
                    if !self.buffer.is_empty() {
                        self.buffer.push(' ');
                    }
                    self.buffer.push_str(&text);
                    vec![RelayEvent::Interim {
                        text,
                        request_id: data.get("request_id").cloned().unwrap_or(Value::Null),
                        metrics: data.get("metrics").cloned().unwrap_or(Value::Null),
                    }]
                }
                None => vec![RelayEvent::Data(data)],
            },
            UpstreamMessage::BareTranscript(text) => vec![RelayEvent::BareInterim { text }],
            UpstreamMessage::Unrecognized(value) => vec![RelayEvent::Raw(value)],
        }
    }

    fn on_closed(&mut self, code: u16, reason: String) -> Vec<RelayEvent> {
        info!(generation = self.generation, code, reason = %reason, "Recognition session closed");
        self.cancel_timer();
        self.upstream = None;
        self.flush_pending = false;
        self.close_requested = false;
        self.state = RelayState::Closed;

        let mut events: Vec<RelayEvent> = self.take_final().into_iter().collect();
        events.push(RelayEvent::Closed { code, reason });
        events
    }

    /// Buffered text as a final event, clearing the buffer.
    fn take_final(&mut self) -> Option<RelayEvent> {
        let text = self.buffer.trim().to_string();
        self.buffer.clear();
        (!text.is_empty()).then_some(RelayEvent::Final { text })
    }

    fn request_close(&mut self) {
        if self.close_requested {
            return;
        }
        self.close_requested = true;
        if let Some(upstream) = &self.upstream {
            upstream.send(UpstreamCommand::Close);
        }
    }

    fn arm_flush_timer(&mut self) {
        self.cancel_timer();
        let notices = NoticeSender::new(self.generation, self.notices.clone());
        let timeout = self.flush_timeout;
        self.flush_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            notices.notify(NoticeKind::FlushTimeout);
        }));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.flush_timer.take() {
            timer.abort();
        }
    }
}

impl Drop for SttRelay {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use serde_json::json;
    use std::sync::Mutex;

    struct FakeUpstream {
        url: Url,
        commands: mpsc::UnboundedReceiver<UpstreamCommand>,
        notices: NoticeSender,
    }

    #[derive(Default)]
    struct FakeConnector {
        sessions: Mutex<Vec<FakeUpstream>>,
    }

    impl SttConnector for FakeConnector {
        fn connect(&self, url: Url, notices: NoticeSender) -> UpstreamHandle {
            let (tx, rx) = mpsc::unbounded_channel();
            self.sessions.lock().unwrap().push(FakeUpstream {
                url,
                commands: rx,
                notices,
            });
            UpstreamHandle::new(tx)
        }
    }

    impl FakeConnector {
        fn count(&self) -> usize {
            self.sessions.lock().unwrap().len()
        }

        fn notify(&self, kind: NoticeKind) {
            let sessions = self.sessions.lock().unwrap();
            sessions.last().unwrap().notices.notify(kind);
        }

        fn message(&self, value: Value) {
            self.notify(NoticeKind::Message(value.to_string()));
        }

        fn commands(&self) -> Vec<UpstreamCommand> {
            let mut sessions = self.sessions.lock().unwrap();
            let upstream = sessions.last_mut().unwrap();
            let mut commands = Vec::new();
            while let Ok(command) = upstream.commands.try_recv() {
                commands.push(command);
            }
            commands
        }
    }

    struct Harness {
        connector: Arc<FakeConnector>,
        relay: SttRelay,
        notices: mpsc::UnboundedReceiver<RelayNotice>,
    }

    impl Harness {
        fn new() -> Self {
            let connector = Arc::new(FakeConnector::default());
            let (tx, rx) = mpsc::unbounded_channel();
            let relay = SttRelay::new(connector.clone(), AppConfig::default().stt, tx);
            Self {
                connector,
                relay,
                notices: rx,
            }
        }

        /// Deliver pending notices to the relay, collecting its output.
        fn pump(&mut self) -> Vec<RelayEvent> {
            let mut events = Vec::new();
            while let Ok(notice) = self.notices.try_recv() {
                events.extend(self.relay.on_notice(notice));
            }
            events
        }

        fn open(&mut self) {
            self.relay.start(&StartOptions::default());
            self.connector.notify(NoticeKind::Opened);
            assert_eq!(self.pump(), vec![RelayEvent::Ready]);
        }

        fn finals(events: &[RelayEvent]) -> usize {
            events
                .iter()
                .filter(|e| matches!(e, RelayEvent::Final { .. }))
                .count()
        }
    }

    fn fragment(text: &str) -> Value {
        json!({"type": "data", "data": {"transcript": text, "request_id": "req-1"}})
    }

    #[tokio::test]
    async fn test_audio_forwarded_only_while_open() {
        let mut h = Harness::new();
        assert!(!h.relay.audio_chunk(&[1, 2]));

        h.relay.start(&StartOptions::default());
        assert_eq!(h.relay.state(), RelayState::Opening);
        assert!(!h.relay.audio_chunk(&[1, 2]));

        h.connector.notify(NoticeKind::Opened);
        h.pump();
        assert!(h.relay.audio_chunk(&[1, 2, 3]));

        let commands = h.connector.commands();
        assert_eq!(commands.len(), 1);
        match &commands[0] {
            UpstreamCommand::Send(text) => {
                let envelope: Value = serde_json::from_str(text).unwrap();
                assert_eq!(envelope["audio"]["data"], "AQID");
                assert_eq!(envelope["audio"]["input_audio_codec"], "pcm_s16le");
            }
            other => panic!("unexpected command: {other:?}"),
        }

        h.connector.notify(NoticeKind::Closed {
            code: 1000,
            reason: String::new(),
        });
        h.pump();
        assert_eq!(h.relay.state(), RelayState::Closed);
        assert!(!h.relay.audio_chunk(&[4]));
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let mut h = Harness::new();
        h.relay.start(&StartOptions::default());
        h.relay.start(&StartOptions::default());
        assert_eq!(h.connector.count(), 1);

        h.connector.notify(NoticeKind::Opened);
        h.pump();
        assert!(h.relay.start(&StartOptions::default()).is_empty());
        assert_eq!(h.connector.count(), 1);
    }

    #[tokio::test]
    async fn test_interim_accumulates_into_final_on_end_of_speech() {
        let mut h = Harness::new();
        h.open();

        h.connector.message(fragment("I worked"));
        h.connector.message(fragment(" at a bank "));
        let events = h.pump();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            RelayEvent::Interim {
                text: "at a bank".into(),
                request_id: json!("req-1"),
                metrics: Value::Null,
            }
        );

        h.connector
            .message(json!({"type": "events", "data": {"signal_type": "END_SPEECH"}}));
        let events = h.pump();
        assert_eq!(
            events,
            vec![
                RelayEvent::Event(json!({"signal_type": "END_SPEECH"})),
                RelayEvent::Final {
                    text: "I worked at a bank".into()
                },
            ]
        );
        // Not flushing, so the session stays open
        assert_eq!(h.relay.state(), RelayState::Open);
        assert!(h.connector.commands().is_empty());
    }

    #[tokio::test]
    async fn test_stop_with_end_of_speech_yields_one_final() {
        let mut h = Harness::new();
        h.open();
        h.connector.message(fragment("hello there"));
        h.pump();

        assert!(h.relay.stop().is_empty());
        assert_eq!(
            h.connector.commands(),
            vec![UpstreamCommand::Send(FLUSH_MESSAGE.to_string())]
        );

        h.connector
            .message(json!({"type": "events", "data": {"signal_type": "END_SPEECH"}}));
        let mut events = h.pump();
        assert_eq!(h.connector.commands(), vec![UpstreamCommand::Close]);

        h.connector.notify(NoticeKind::Closed {
            code: 1000,
            reason: "bye".into(),
        });
        events.extend(h.pump());

        assert_eq!(Harness::finals(&events), 1);
        assert_eq!(
            events.last(),
            Some(&RelayEvent::Closed {
                code: 1000,
                reason: "bye".into()
            })
        );
    }

    #[tokio::test]
    async fn test_stop_without_end_of_speech_flushes_on_close() {
        let mut h = Harness::new();
        h.open();
        h.connector.message(fragment("partial answer"));
        h.pump();
        h.relay.stop();

        h.connector.notify(NoticeKind::Closed {
            code: 1005,
            reason: String::new(),
        });
        let events = h.pump();
        assert_eq!(
            events,
            vec![
                RelayEvent::Final {
                    text: "partial answer".into()
                },
                RelayEvent::Closed {
                    code: 1005,
                    reason: String::new()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_when_not_open_flushes_buffer_immediately() {
        let mut h = Harness::new();
        h.open();
        h.connector.message(fragment("left over"));
        h.pump();
        h.relay.on_notice(RelayNotice {
            generation: 1,
            kind: NoticeKind::Closed {
                code: 1011,
                reason: String::new(),
            },
        });
        // The close already emitted the buffer, so stop has nothing to add
        assert!(h.relay.stop().is_empty());

        let mut idle = Harness::new();
        assert!(idle.relay.stop().is_empty());
        assert!(idle.pump().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_timeout_force_closes_once() {
        let mut h = Harness::new();
        h.open();
        h.relay.stop();
        h.connector.commands();

        tokio::time::sleep(Duration::from_millis(2900)).await;
        h.pump();
        assert!(h.connector.commands().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        h.pump();
        assert_eq!(h.connector.commands(), vec![UpstreamCommand::Close]);

        tokio::time::sleep(Duration::from_secs(10)).await;
        h.pump();
        assert!(h.connector.commands().is_empty());

        h.connector.notify(NoticeKind::Closed {
            code: 1000,
            reason: String::new(),
        });
        h.pump();
        assert_eq!(h.relay.state(), RelayState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_close_cancels_flush_timer() {
        let mut h = Harness::new();
        h.open();
        h.relay.stop();
        h.connector.commands();

        h.connector.notify(NoticeKind::Closed {
            code: 1000,
            reason: String::new(),
        });
        h.pump();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.pump().is_empty());
        assert!(h.connector.commands().is_empty());
    }

    #[tokio::test]
    async fn test_stale_notices_are_ignored() {
        let mut h = Harness::new();
        h.open();
        h.connector.notify(NoticeKind::Closed {
            code: 1000,
            reason: String::new(),
        });
        h.pump();

        h.relay.start(&StartOptions::default());
        let stale = RelayNotice {
            generation: 1,
            kind: NoticeKind::Opened,
        };
        assert!(h.relay.on_notice(stale).is_empty());
        assert_eq!(h.relay.state(), RelayState::Opening);
    }

    #[tokio::test]
    async fn test_unrecognized_and_error_messages_are_forwarded() {
        let mut h = Harness::new();
        h.open();
        h.connector.message(json!({"type": "error", "data": {"message": "quota"}}));
        h.connector.message(json!({"type": "data", "data": {"status": "ok"}}));
        h.connector.message(json!({"transcript": "bare"}));
        h.connector.notify(NoticeKind::Message("plain text".into()));

        let events = h.pump();
        assert_eq!(
            events,
            vec![
                RelayEvent::Error(json!({"message": "quota"})),
                RelayEvent::Data(json!({"status": "ok"})),
                RelayEvent::BareInterim {
                    text: "bare".into()
                },
                RelayEvent::Raw(Value::String("plain text".into())),
            ]
        );
        // Errors do not tear the session down
        assert_eq!(h.relay.state(), RelayState::Open);
    }

    #[tokio::test]
    async fn test_disconnect_closes_upstream_without_final() {
        let mut h = Harness::new();
        h.open();
        h.connector.message(fragment("unsent"));
        h.pump();

        h.relay.disconnect();
        assert_eq!(h.relay.state(), RelayState::Idle);
        assert_eq!(h.connector.commands(), vec![UpstreamCommand::Close]);
        assert!(h.relay.stop().is_empty());
    }

    #[tokio::test]
    async fn test_start_passes_options_to_connection_target() {
        let h = Harness::new();
        let mut relay = h.relay;
        let options: StartOptions =
            serde_json::from_value(json!({"languageCode": "hi-IN", "model": "saarika:v2"})).unwrap();
        relay.start(&options);

        let sessions = h.connector.sessions.lock().unwrap();
        let query = sessions[0].url.query().unwrap_or_default().to_string();
        assert!(query.contains("language-code=hi-IN"));
        assert!(query.contains("model=saarika%3Av2"));
    }
}
