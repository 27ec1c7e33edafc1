//! # Durable Interview Records
//!
//! The gateway reads three kinds of durable records and updates them with
//! atomic single-document operations:
//! - **InterviewDetails**: the interview an employer configured (role,
//!   skills, questions, duration); gains a completion marker per finished
//!   candidate
//! - **InterviewResult**: one candidate's attempt; receives the feedback,
//!   video reference, transcript and completion flag
//! - **Candidate**: the user directory entry; attempt counter incremented at
//!   finalization
//!
//! Every update returns the updated record, or `None` when no record has the
//! given id.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{StoreError, Turn};
use crate::interview::finalizer::Feedback;

/// A candidate completion pushed onto the interview configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMarker {
    pub email: String,
    pub interview_id: String,
}

/// Interview configuration as stored durably.
///
/// Optional fields fall back to defaults in the turn prompt; `duration`
/// arrives as either a string or a number and is kept as a string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewDetails {
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default, alias = "roleofai")]
    pub interviewer_role: Option<String>,
    #[serde(default)]
    pub job_position: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub job_description: Option<String>,
    #[serde(default, alias = "launguage")]
    pub language: Option<String>,
    #[serde(default)]
    pub minimum_qualification: Option<String>,
    #[serde(default)]
    pub minimum_skills: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub duration: Option<String>,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub completions: Vec<CompletionMarker>,
}

impl InterviewDetails {
    /// Configured duration in minutes, or `default_minutes` when missing,
    /// unparsable or zero.
    pub fn duration_minutes(&self, default_minutes: u32) -> u32 {
        self.duration
            .as_deref()
            .and_then(|raw| raw.trim().parse::<u32>().ok())
            .filter(|minutes| *minutes > 0)
            .unwrap_or(default_minutes)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// One candidate's interview attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewResult {
    #[serde(rename = "_id")]
    pub id: String,
    pub candidate_id: String,
    pub session_id: String,
    #[serde(default)]
    pub feedback: Option<Feedback>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub transcript: Vec<Turn>,
}

/// Fields set on an [`InterviewResult`] when the interview finishes.
#[derive(Debug, Clone)]
pub struct ResultCompletion {
    pub feedback: Feedback,
    pub video_url: String,
    pub transcript: Vec<Turn>,
}

/// User directory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub number_of_attempts: u32,
}

/// Durable record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_interview(&self, id: &str) -> Result<Option<InterviewDetails>, StoreError>;

    async fn upsert_interview(&self, details: InterviewDetails) -> Result<(), StoreError>;

    /// Array push onto the interview's completion list.
    async fn push_completion(
        &self,
        id: &str,
        marker: CompletionMarker,
    ) -> Result<Option<InterviewDetails>, StoreError>;

    async fn create_result(&self, result: InterviewResult) -> Result<InterviewResult, StoreError>;

    async fn find_result(&self, id: &str) -> Result<Option<InterviewResult>, StoreError>;

    /// Field set of feedback, video, transcript and the completion flag.
    async fn complete_result(
        &self,
        id: &str,
        completion: ResultCompletion,
    ) -> Result<Option<InterviewResult>, StoreError>;

    async fn find_candidate(&self, id: &str) -> Result<Option<Candidate>, StoreError>;

    async fn upsert_candidate(&self, candidate: Candidate) -> Result<(), StoreError>;

    /// Counter increment of the candidate's attempts.
    async fn increment_attempts(&self, id: &str) -> Result<Option<Candidate>, StoreError>;
}

/// In-process [`RecordStore`].
///
/// ## Atomicity:
/// Each update runs under a single write guard of its collection, so
/// concurrent updates to the same record never interleave.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    interviews: RwLock<HashMap<String, InterviewDetails>>,
    results: RwLock<HashMap<String, InterviewResult>>,
    candidates: RwLock<HashMap<String, Candidate>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_interview(&self, id: &str) -> Result<Option<InterviewDetails>, StoreError> {
        Ok(self.interviews.read().await.get(id).cloned())
    }

    async fn upsert_interview(&self, details: InterviewDetails) -> Result<(), StoreError> {
        self.interviews
            .write()
            .await
            .insert(details.id.clone(), details);
        Ok(())
    }

    async fn push_completion(
        &self,
        id: &str,
        marker: CompletionMarker,
    ) -> Result<Option<InterviewDetails>, StoreError> {
        let mut interviews = self.interviews.write().await;
        Ok(interviews.get_mut(id).map(|details| {
            details.completions.push(marker);
            details.clone()
        }))
    }

    async fn create_result(&self, result: InterviewResult) -> Result<InterviewResult, StoreError> {
        self.results
            .write()
            .await
            .insert(result.id.clone(), result.clone());
        Ok(result)
    }

    async fn find_result(&self, id: &str) -> Result<Option<InterviewResult>, StoreError> {
        Ok(self.results.read().await.get(id).cloned())
    }

    async fn complete_result(
        &self,
        id: &str,
        completion: ResultCompletion,
    ) -> Result<Option<InterviewResult>, StoreError> {
        let mut results = self.results.write().await;
        Ok(results.get_mut(id).map(|result| {
            result.feedback = Some(completion.feedback);
            result.video_url = Some(completion.video_url);
            result.transcript = completion.transcript;
            result.is_completed = true;
            result.clone()
        }))
    }

    async fn find_candidate(&self, id: &str) -> Result<Option<Candidate>, StoreError> {
        Ok(self.candidates.read().await.get(id).cloned())
    }

    async fn upsert_candidate(&self, candidate: Candidate) -> Result<(), StoreError> {
        self.candidates
            .write()
            .await
            .insert(candidate.id.clone(), candidate);
        Ok(())
    }

    async fn increment_attempts(&self, id: &str) -> Result<Option<Candidate>, StoreError> {
        let mut candidates = self.candidates.write().await;
        Ok(candidates.get_mut(id).map(|candidate| {
            candidate.number_of_attempts += 1;
            candidate.clone()
        }))
    }
}
