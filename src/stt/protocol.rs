//! # Speech-to-Text Wire Protocol
//!
//! Message formats spoken with the streaming recognition service and with
//! the browser on its behalf.
//!
//! ## Upstream → gateway:
//! JSON objects discriminated by `type` with the payload under `data`:
//! - `data`: transcription fragment (`transcript`, `request_id`, `metrics`)
//! - `error`: provider error
//! - `events`: voice activity signals (`signal_type` = `START_SPEECH` /
//!   `END_SPEECH`)
//!
//! Anything else decodes to [`UpstreamMessage::BareTranscript`] when a
//! top-level `transcript` is present, otherwise [`UpstreamMessage::Unrecognized`].
//!
//! ## Gateway → upstream:
//! - Audio: `{"audio": {"data": <base64>, "sample_rate": "16000",
//!   "encoding": "audio/wav", "input_audio_codec": "pcm_s16le"}}`
//! - Flush: `{"type": "flush"}`

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

use crate::config::SttConfig;

pub const END_OF_SPEECH: &str = "END_SPEECH";
pub const FLUSH_MESSAGE: &str = r#"{"type":"flush"}"#;

const ENVELOPE_SAMPLE_RATE: &str = "16000";
const ENVELOPE_ENCODING: &str = "audio/wav";
const INPUT_AUDIO_CODEC: &str = "pcm_s16le";

/// A decoded upstream message.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamMessage {
    Data(Value),
    Error(Value),
    Events(Value),
    /// Untyped message carrying a top-level transcript
    BareTranscript(String),
    /// Non-JSON text, unknown `type`, or a typed message without `data`
    Unrecognized(Value),
}

impl UpstreamMessage {
    pub fn decode(raw: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(raw) else {
            return UpstreamMessage::Unrecognized(Value::String(raw.to_string()));
        };

        let kind = value.get("type").and_then(Value::as_str);
        let data = value.get("data").filter(|data| !data.is_null());

        match (kind, data) {
            (Some("data"), Some(data)) => UpstreamMessage::Data(data.clone()),
            (Some("error"), Some(data)) => UpstreamMessage::Error(data.clone()),
            (Some("events"), Some(data)) => UpstreamMessage::Events(data.clone()),
            (Some(_), Some(_)) => UpstreamMessage::Unrecognized(value),
            _ => match non_empty_str(value.get("transcript")) {
                Some(text) => UpstreamMessage::BareTranscript(text),
                None => UpstreamMessage::Unrecognized(value),
            },
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Trimmed transcript fragment of a `data` payload.
pub fn transcript_of(data: &Value) -> Option<String> {
    non_empty_str(data.get("transcript"))
}

pub fn is_end_of_speech(event: &Value) -> bool {
    event.get("signal_type").and_then(Value::as_str) == Some(END_OF_SPEECH)
}

#[derive(Serialize)]
struct AudioEnvelope<'a> {
    audio: AudioFrame<'a>,
}

#[derive(Serialize)]
struct AudioFrame<'a> {
    data: &'a str,
    sample_rate: &'static str,
    encoding: &'static str,
    input_audio_codec: &'static str,
}

/// Upstream audio message for one chunk of PCM.
pub fn audio_envelope(pcm: &[u8]) -> String {
    let encoded = BASE64_STANDARD.encode(pcm);
    let envelope = AudioEnvelope {
        audio: AudioFrame {
            data: &encoded,
            sample_rate: ENVELOPE_SAMPLE_RATE,
            encoding: ENVELOPE_ENCODING,
            input_audio_codec: INPUT_AUDIO_CODEC,
        },
    };
    // Serializing string fields cannot fail
    serde_json::to_string(&envelope).unwrap_or_default()
}

#[derive(Debug, Error, PartialEq)]
pub enum AudioPayloadError {
    #[error("byte array element out of range at index {0}")]
    InvalidByte(usize),

    #[error("audio string is not valid base64")]
    InvalidBase64,

    #[error("unsupported audio payload shape")]
    Unsupported,
}

/// Flatten an audio payload received inside a JSON event.
///
/// Accepted shapes: an array of byte values, a base64 string, or an object
/// wrapping either under `data` (which also covers serialized Node buffers).
pub fn normalize_audio(payload: &Value) -> Result<Vec<u8>, AudioPayloadError> {
    match payload {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or(AudioPayloadError::InvalidByte(i))
            })
            .collect(),
        Value::String(encoded) => BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|_| AudioPayloadError::InvalidBase64),
        Value::Object(map) => match map.get("data") {
            Some(inner @ (Value::Array(_) | Value::String(_))) => normalize_audio(inner),
            _ => Err(AudioPayloadError::Unsupported),
        },
        _ => Err(AudioPayloadError::Unsupported),
    }
}

/// Options of a `start-sarvam-stt` event. Unset values use configured defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartOptions {
    #[serde(default, rename = "languageCode", alias = "language_code")]
    pub language_code: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub input_audio_codec: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<Value>,
    #[serde(default)]
    pub vad_signals: Option<Value>,
    #[serde(default)]
    pub high_vad_sensitivity: Option<Value>,
}

fn query_value(value: Option<&Value>, default: &str) -> String {
    match value {
        None | Some(Value::Null) => default.to_string(),
        Some(Value::String(s)) if s.is_empty() => default.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn or_default(value: Option<&str>, default: &str) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
        .to_string()
}

/// Connection target for a new upstream session.
pub fn session_url(config: &SttConfig, options: &StartOptions) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&config.endpoint)?;
    url.query_pairs_mut()
        .append_pair(
            "language-code",
            &or_default(options.language_code.as_deref(), &config.default_language_code),
        )
        .append_pair("model", &or_default(options.model.as_deref(), &config.default_model))
        .append_pair(
            "input_audio_codec",
            &or_default(options.input_audio_codec.as_deref(), INPUT_AUDIO_CODEC),
        )
        .append_pair(
            "sample_rate",
            &query_value(options.sample_rate.as_ref(), &config.default_sample_rate),
        )
        .append_pair("vad_signals", &query_value(options.vad_signals.as_ref(), "false"))
        .append_pair(
            "high_vad_sensitivity",
            &query_value(options.high_vad_sensitivity.as_ref(), "false"),
        )
        .append_pair("flush_signal", "true");
    Ok(url)
}

/// Client-facing relay output.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Ready,
    Interim {
        text: String,
        request_id: Value,
        metrics: Value,
    },
    /// Interim fragment recovered from an untyped message
    BareInterim { text: String },
    Final { text: String },
    Event(Value),
    Error(Value),
    Data(Value),
    Raw(Value),
    Closed { code: u16, reason: String },
}

impl RelayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::Ready => "sarvam-ready",
            RelayEvent::Interim { .. } | RelayEvent::BareInterim { .. } => {
                "sarvam-transcript-interim"
            }
            RelayEvent::Final { .. } => "sarvam-transcript-final",
            RelayEvent::Event(_) => "sarvam-event",
            RelayEvent::Error(_) => "sarvam-error",
            RelayEvent::Data(_) => "sarvam-data",
            RelayEvent::Raw(_) => "sarvam-raw",
            RelayEvent::Closed { .. } => "sarvam-closed",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            RelayEvent::Ready => json!({ "ok": true }),
            RelayEvent::Interim {
                text,
                request_id,
                metrics,
            } => json!({ "text": text, "request_id": request_id, "metrics": metrics }),
            RelayEvent::BareInterim { text } | RelayEvent::Final { text } => json!({ "text": text }),
            RelayEvent::Event(value)
            | RelayEvent::Error(value)
            | RelayEvent::Data(value)
            | RelayEvent::Raw(value) => value.clone(),
            RelayEvent::Closed { code, reason } => json!({ "code": code, "reason": reason }),
        }
    }
}
