//! # Error Handling
//!
//! Error types for the gateway and how they reach clients.
//!
//! Two audiences see errors here:
//! - **HTTP clients** get `AppError`, converted into a JSON response through
//!   actix's `ResponseError` trait.
//! - **Interview clients** on the websocket get `GatewayError`, which always
//!   maps to a short candidate-facing sentence. Internal details stay in the
//!   server log.
//!
//! ## Key Rust Concepts:
//! - **thiserror**: Derives `Display` and `std::error::Error` from attributes
//! - **From trait**: Lets `?` convert lower-level errors automatically
//! - **ResponseError trait**: Converts errors to HTTP responses

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// Errors returned by the HTTP handlers.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500)
/// - **BadRequest**: Client sent invalid data (400)
/// - **Unauthorized**: Missing or rejected candidate credential (401)
/// - **NotFound**: Requested resource doesn't exist (404)
/// - **ConfigError**: Configuration problems (500)
/// - **ValidationError**: Data validation failed (400)
/// - **Unavailable**: Capacity exhausted (503)
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "Port must be greater than 0",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::Unauthorized(msg) => ("unauthorized", msg),
            AppError::NotFound(msg) => ("not_found", msg),
            AppError::ConfigError(msg) => ("config_error", msg),
            AppError::ValidationError(msg) => ("validation_error", msg),
            AppError::Unavailable(msg) => ("unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, so they become a
/// 400 rather than a 500.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Failures of a websocket interview operation.
///
/// Every variant is non-fatal: the connection stays open and the client gets
/// an `error` event carrying [`GatewayError::client_message`].
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("candidate not authenticated")]
    NotAuthenticated,

    #[error("no message content provided")]
    EmptyMessage,

    #[error("session id not found")]
    MissingSessionId,

    #[error("video url or session id missing")]
    MissingFinalizationFields,

    #[error("interview not found for candidate")]
    InterviewNotFound,

    #[error("no interview in progress to finalize")]
    NothingToFinalize,

    #[error("resume text not found")]
    ResumeNotFound,

    #[error("interview details not found")]
    InterviewDetailsNotFound,

    #[error("transcript is empty")]
    EmptyTranscript,

    #[error("interview record id not found")]
    InterviewRecordMissing,

    #[error("failed to update interview result")]
    ResultUpdateFailed,

    #[error("failed to update interview details")]
    DetailsUpdateFailed,

    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

impl GatewayError {
    /// The sentence shown to the candidate.
    pub fn client_message(&self) -> &'static str {
        match self {
            GatewayError::NotAuthenticated => "Candidate not authenticated. Please log in first.",
            GatewayError::EmptyMessage => "No message content provided.",
            GatewayError::MissingSessionId => "sessionId not found",
            GatewayError::MissingFinalizationFields => "videoUrl or sessionId missing",
            GatewayError::InterviewNotFound => {
                "Candidate interview not found. Please upload your resume first."
            }
            GatewayError::NothingToFinalize => "Candidate interview not found",
            GatewayError::ResumeNotFound => "Resume text not found",
            GatewayError::InterviewDetailsNotFound => "Interview details not found",
            GatewayError::EmptyTranscript => "transcript is empty",
            GatewayError::InterviewRecordMissing => "interview record id not found",
            GatewayError::ResultUpdateFailed => "Failed to update interview with feedback",
            GatewayError::DetailsUpdateFailed => "Failed to update interview details",
            GatewayError::Store(_) => "Failed to process your request. Please try again.",
        }
    }
}
