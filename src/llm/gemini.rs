//! REST client for the hosted `generateContent` API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Content, GenerationConfig, GenerationRequest, GenerativeModel, LlmError, Part};
use crate::config::LlmConfig;

/// The key travels in a header so it never appears in request URLs.
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, model)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    contents: &'a [Content],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<&'a GenerationConfig>,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

impl<'a> From<&'a GenerationRequest> for GenerateContentBody<'a> {
    fn from(request: &'a GenerationRequest) -> Self {
        Self {
            contents: &request.contents,
            system_instruction: request.system_instruction.as_ref().map(|text| SystemInstruction {
                parts: vec![Part { text: text.clone() }],
            }),
            generation_config: request.generation_config.as_ref(),
        }
    }
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

fn status_error(status: StatusCode, body: String) -> LlmError {
    let message = serde_json::from_str::<ErrorWrapper>(&body)
        .map(|wrapper| match (wrapper.error.status, wrapper.error.message) {
            (Some(status), Some(message)) => format!("{status}: {message}"),
            (None, Some(message)) => message,
            (_, None) => body.clone(),
        })
        .unwrap_or(body);

    LlmError::Status {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<Value, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let body = GenerateContentBody::from(&request);
        debug!(
            model = %request.model,
            turns = request.contents.len(),
            "Sending generateContent request"
        );

        let response = self
            .client
            .post(self.url(&request.model))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(model = %request.model, status = status.as_u16(), "generateContent failed");
            return Err(status_error(status, text));
        }

        Ok(response.json::<Value>().await?)
    }
}
