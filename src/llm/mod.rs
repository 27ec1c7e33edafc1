//! # Generative Text
//!
//! Seam between the interview logic and the hosted generative model.
//!
//! ## Key Components:
//! - **GenerativeModel**: One `generate` call per request; the interview code
//!   only ever sees this trait, so tests substitute scripted models
//! - **GenerationRequest**: Model name, system instruction, conversation and
//!   sampling settings
//! - **extract_text**: Pulls the first text part out of a raw response
//!
//! ## Response shapes:
//! Responses arrive either bare (`candidates[0].content.parts[0].text`) or
//! wrapped in a `response` object. `extract_text` accepts both and returns a
//! typed error for anything else.

pub mod gemini;

pub use gemini::GeminiClient;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("generative model API key is not configured")]
    MissingApiKey,

    #[error("request to generative model failed: {0}")]
    Request(reqwest::Error),

    #[error("generative model returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("response contained no text")]
    NoText,
}

// URLs are stripped so endpoints and query strings stay out of logs.
impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Request(err.without_url())
    }
}

/// A conversation entry as the model API expects it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            parts: vec![Part { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Part {
    pub text: String,
}

/// Sampling settings. Unset fields use the model's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub system_instruction: Option<String>,
    pub contents: Vec<Content>,
    pub generation_config: Option<GenerationConfig>,
}

#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Issue one generation call and return the raw JSON response.
    async fn generate(&self, request: GenerationRequest) -> Result<Value, LlmError>;

    /// Issue one generation call and return its first text part.
    async fn generate_text(&self, request: GenerationRequest) -> Result<String, LlmError> {
        let response = self.generate(request).await?;
        extract_text(&response)
    }
}

/// First text part of a generation response, bare or wrapped.
pub fn extract_text(response: &Value) -> Result<String, LlmError> {
    const TEXT_PATHS: [&str; 2] = [
        "/candidates/0/content/parts/0/text",
        "/response/candidates/0/content/parts/0/text",
    ];

    TEXT_PATHS
        .iter()
        .find_map(|path| response.pointer(path).and_then(Value::as_str))
        .map(str::to_string)
        .ok_or(LlmError::NoText)
}
