//! # Candidate Authentication
//!
//! Resolves the candidate behind a connection from a signed HS256 token.
//!
//! ## Token Sources (first found wins):
//! 1. The `usertoken` cookie (name configurable)
//! 2. The `token` or `usertoken` query parameter of the handshake URL
//! 3. An `Authorization: Bearer` header
//!
//! Authentication is soft: a missing, invalid or expired token, or a token
//! for an unknown candidate, leaves the connection unauthenticated instead of
//! refusing it. Operations that need an identity then fail one by one.

use actix_web::http::header::AUTHORIZATION;
use actix_web::HttpRequest;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::store::{RecordStore, StoreError};

/// Who is on the other end of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateIdentity {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
}

/// Token payload. `exp` is enforced by the validator.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "_id")]
    pub id: String,
    pub exp: usize,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential presented")]
    MissingToken,

    #[error("token verification is not configured")]
    NoSigningSecret,

    #[error("invalid credential: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("candidate {0} not found")]
    UnknownCandidate(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct Authenticator {
    /// `None` when no secret is configured; every token is then rejected.
    key: Option<DecodingKey>,
    validation: Validation,
    cookie_name: String,
    records: Arc<dyn RecordStore>,
}

impl Authenticator {
    pub fn new(config: &AuthConfig, records: Arc<dyn RecordStore>) -> Self {
        Self {
            key: (!config.jwt_secret.is_empty())
                .then(|| DecodingKey::from_secret(config.jwt_secret.as_bytes())),
            validation: Validation::new(Algorithm::HS256),
            cookie_name: config.cookie_name.clone(),
            records,
        }
    }

    /// Identity for the request, or `None` when authentication fails.
    pub async fn identify(&self, req: &HttpRequest) -> Option<CandidateIdentity> {
        match self.authenticate(req).await {
            Ok(identity) => Some(identity),
            Err(AuthError::MissingToken) => {
                debug!("No candidate credential on handshake");
                None
            }
            Err(err) => {
                warn!(error = %err, "Candidate authentication failed");
                None
            }
        }
    }

    pub async fn authenticate(&self, req: &HttpRequest) -> Result<CandidateIdentity, AuthError> {
        let token = self.extract_token(req).ok_or(AuthError::MissingToken)?;
        self.resolve(&token).await
    }

    /// Verify a raw token and look the candidate up.
    pub async fn resolve(&self, token: &str) -> Result<CandidateIdentity, AuthError> {
        let claims = self.verify(token)?;
        let candidate = self
            .records
            .find_candidate(&claims.id)
            .await?
            .ok_or_else(|| AuthError::UnknownCandidate(claims.id.clone()))?;

        Ok(CandidateIdentity {
            id: candidate.id,
            email: candidate.email,
            name: candidate.name,
        })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let key = self.key.as_ref().ok_or(AuthError::NoSigningSecret)?;
        Ok(decode::<Claims>(token, key, &self.validation)?.claims)
    }

    fn extract_token(&self, req: &HttpRequest) -> Option<String> {
        if let Some(cookie) = req.cookie(&self.cookie_name) {
            if !cookie.value().is_empty() {
                return Some(cookie.value().to_string());
            }
        }

        let from_query = url::form_urlencoded::parse(req.query_string().as_bytes())
            .find(|(key, value)| (key == "token" || key == "usertoken") && !value.is_empty())
            .map(|(_, value)| value.into_owned());
        if from_query.is_some() {
            return from_query;
        }

        req.headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    }
}
