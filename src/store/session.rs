//! # Interview Session Store
//!
//! Key conventions and JSON encoding for live interview state held in the
//! expiring cache:
//!
//! | Key                                     | Value                  | Expiry           |
//! |-----------------------------------------|------------------------|------------------|
//! | `interview:{candidate}`                 | [`InterviewSession`]   | none             |
//! | `interviewdetails:{session}:{candidate}`| [`InterviewDetails`]   | config cache TTL |
//! | `interviewtime:{session}:{candidate}`   | [`TimingWindow`]       | timing TTL (1h)  |
//!
//! Session records are replaced whole on every write.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{InterviewDetails, KeyValueStore, StoreError};
use crate::interview::timing::TimingWindow;

/// Who spoke a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Ai => "ai",
        }
    }
}

/// One utterance of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            role: Role::Ai,
            content: content.into(),
        }
    }
}

/// Live state of one candidate's interview.
///
/// Written by the start-interview step (resume text and record id), then
/// extended by every user/ai exchange, and removed at finalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewSession {
    /// Interview-result record this session finalizes into
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub interview_id: Option<String>,

    #[serde(default, alias = "resume")]
    pub resume_text: String,

    /// Chronological, append-only during the session
    #[serde(default)]
    pub transcript: Vec<Turn>,
}

impl InterviewSession {
    pub fn has_resume(&self) -> bool {
        !self.resume_text.trim().is_empty()
    }
}

/// Live interview state on top of a [`KeyValueStore`].
#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    config_ttl: Duration,
    timing_ttl: Duration,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, config_ttl: Duration, timing_ttl: Duration) -> Self {
        Self {
            kv,
            config_ttl,
            timing_ttl,
        }
    }

    fn session_key(candidate_id: &str) -> String {
        format!("interview:{}", candidate_id)
    }

    fn details_key(session_id: &str, candidate_id: &str) -> String {
        format!("interviewdetails:{}:{}", session_id, candidate_id)
    }

    fn timing_key(session_id: &str, candidate_id: &str) -> String {
        format!("interviewtime:{}:{}", session_id, candidate_id)
    }

    pub async fn load_session(&self, candidate_id: &str) -> Result<Option<InterviewSession>, StoreError> {
        let key = Self::session_key(candidate_id);
        match self.kv.get(&key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::Corrupt { key, source }),
            None => Ok(None),
        }
    }

    pub async fn save_session(
        &self,
        candidate_id: &str,
        session: &InterviewSession,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(session)?;
        self.kv.set(&Self::session_key(candidate_id), raw, None).await
    }

    pub async fn delete_session(&self, candidate_id: &str) -> Result<bool, StoreError> {
        self.kv.delete(&Self::session_key(candidate_id)).await
    }

    /// Cached interview configuration, if present and decodable.
    ///
    /// An undecodable cache entry counts as a miss so the caller refetches
    /// from the durable record.
    pub async fn cached_details(
        &self,
        session_id: &str,
        candidate_id: &str,
    ) -> Result<Option<InterviewDetails>, StoreError> {
        let key = Self::details_key(session_id, candidate_id);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(details) => Ok(Some(details)),
            Err(err) => {
                warn!(key = %key, error = %err, "Cached interview details unreadable, refetching");
                Ok(None)
            }
        }
    }

    pub async fn cache_details(
        &self,
        session_id: &str,
        candidate_id: &str,
        details: &InterviewDetails,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(details)?;
        self.kv
            .set(&Self::details_key(session_id, candidate_id), raw, Some(self.config_ttl))
            .await
    }

    pub async fn delete_details(&self, session_id: &str, candidate_id: &str) -> Result<bool, StoreError> {
        self.kv.delete(&Self::details_key(session_id, candidate_id)).await
    }

    pub async fn delete_timing(&self, session_id: &str, candidate_id: &str) -> Result<bool, StoreError> {
        self.kv.delete(&Self::timing_key(session_id, candidate_id)).await
    }

    /// The interview's start/end window, computing it on first request.
    ///
    /// First write wins: once a window is stored for the (session, candidate)
    /// pair, later calls return it unchanged until it expires.
    pub async fn timing_window<F>(
        &self,
        session_id: &str,
        candidate_id: &str,
        compute: F,
    ) -> Result<TimingWindow, StoreError>
    where
        F: FnOnce() -> TimingWindow,
    {
        let key = Self::timing_key(session_id, candidate_id);
        if let Some(window) = self.read_window(&key).await? {
            return Ok(window);
        }

        let window = compute();
        let raw = serde_json::to_string(&window)?;
        if self.kv.set_if_absent(&key, raw, Some(self.timing_ttl)).await? {
            debug!(key = %key, end_time = %window.end_time, "Interview timing window set");
            return Ok(window);
        }

        // Another request stored a window between our read and write
        Ok(self.read_window(&key).await?.unwrap_or(window))
    }

    async fn read_window(&self, key: &str) -> Result<Option<TimingWindow>, StoreError> {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(window) => Ok(Some(window)),
            Err(err) => {
                warn!(key = %key, error = %err, "Stored timing window unreadable, replacing");
                self.kv.delete(key).await?;
                Ok(None)
            }
        }
    }
}
