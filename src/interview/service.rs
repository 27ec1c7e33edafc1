//! # Interview Service
//!
//! The transport-independent half of the Session Gateway. The websocket actor
//! decodes client events and hands them here; every method returns either the
//! payload of the success event or a [`GatewayError`] that becomes an `error`
//! event. Nothing in here can close a connection.
//!
//! ## Operations:
//! - **start_interview**: Bind a resume to a new interview-result record and
//!   open the candidate's session state
//! - **handle_user_message**: One conversational exchange (user turn in, ai
//!   turn out), persisted together
//! - **handle_end_interview**: Score, persist the result, mark completion,
//!   count the attempt, clear session state
//!
//! ## Concurrency:
//! Message and end-of-interview handling for one candidate run under that
//! candidate's lock (see [`CandidateLocks`]), so the whole-record
//! read-modify-write on session state never interleaves.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::CandidateIdentity;
use crate::error::GatewayError;
use crate::interview::finalizer::{Feedback, Finalizer};
use crate::interview::locks::CandidateLocks;
use crate::interview::timing::{current_display_time, TimingWindow};
use crate::interview::turn::{TurnContext, TurnEngine};
use crate::store::{
    CompletionMarker, InterviewDetails, InterviewResult, InterviewSession, RecordStore,
    ResultCompletion, SessionStore, Turn,
};

/// `user-message` payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message_content: Option<String>,
}

/// `end-interview` payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndInterview {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
}

/// Result of a completed interview, sent as `final-feedback`.
#[derive(Debug, Clone)]
pub struct FinalOutcome {
    pub feedback: Feedback,
    pub updated_details: InterviewDetails,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub struct InterviewService {
    sessions: SessionStore,
    records: Arc<dyn RecordStore>,
    turns: TurnEngine,
    finalizer: Finalizer,
    locks: CandidateLocks,
    default_duration_minutes: u32,
}

impl InterviewService {
    pub fn new(
        sessions: SessionStore,
        records: Arc<dyn RecordStore>,
        turns: TurnEngine,
        finalizer: Finalizer,
        default_duration_minutes: u32,
    ) -> Self {
        Self {
            sessions,
            records,
            turns,
            finalizer,
            locks: CandidateLocks::new(),
            default_duration_minutes,
        }
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// Candidates with a message or finalization in flight.
    pub fn active_operations(&self) -> usize {
        self.locks.active()
    }

    /// Open a fresh session for `candidate` against interview `session_id`.
    ///
    /// Any previous session state for the candidate is replaced.
    pub async fn start_interview(
        &self,
        candidate: &CandidateIdentity,
        session_id: &str,
        resume_text: &str,
    ) -> Result<InterviewResult, GatewayError> {
        if resume_text.trim().is_empty() {
            return Err(GatewayError::ResumeNotFound);
        }
        if self.records.find_interview(session_id).await?.is_none() {
            return Err(GatewayError::InterviewDetailsNotFound);
        }

        let _guard = self.locks.acquire(&candidate.id).await;

        let result = self
            .records
            .create_result(InterviewResult {
                id: Uuid::new_v4().to_string(),
                candidate_id: candidate.id.clone(),
                session_id: session_id.to_string(),
                feedback: None,
                video_url: None,
                is_completed: false,
                transcript: Vec::new(),
            })
            .await?;

        let session = InterviewSession {
            interview_id: Some(result.id.clone()),
            resume_text: resume_text.trim().to_string(),
            transcript: Vec::new(),
        };
        self.sessions.save_session(&candidate.id, &session).await?;
        // A new attempt reloads the configuration and restarts the clock
        self.sessions.delete_details(session_id, &candidate.id).await?;
        self.sessions.delete_timing(session_id, &candidate.id).await?;

        info!(
            candidate_id = %candidate.id,
            session_id = %session_id,
            interview_id = %result.id,
            resume_chars = session.resume_text.len(),
            "Interview session opened"
        );
        Ok(result)
    }

    /// Process one candidate message and return the interviewer's reply.
    pub async fn handle_user_message(
        &self,
        candidate: Option<&CandidateIdentity>,
        message: UserMessage,
    ) -> Result<String, GatewayError> {
        let candidate = candidate.ok_or(GatewayError::NotAuthenticated)?;
        // Trimmed only for the emptiness check; the turn keeps the text as sent
        let content = match message.message_content {
            Some(content) if !content.trim().is_empty() => content,
            _ => return Err(GatewayError::EmptyMessage),
        };
        let session_id = present(message.session_id.as_deref())
            .ok_or(GatewayError::MissingSessionId)?
            .to_string();

        let _guard = self.locks.acquire(&candidate.id).await;

        let mut session = self
            .sessions
            .load_session(&candidate.id)
            .await?
            .ok_or(GatewayError::InterviewNotFound)?;
        if !session.has_resume() {
            return Err(GatewayError::ResumeNotFound);
        }

        session.transcript.push(Turn::user(content));

        let details = self.interview_details(&session_id, &candidate.id).await?;
        let minutes = details.duration_minutes(self.default_duration_minutes);
        let window = self
            .sessions
            .timing_window(&session_id, &candidate.id, || {
                TimingWindow::starting_now(minutes)
            })
            .await?;
        let current_time = current_display_time();

        let reply = self
            .turns
            .next_utterance(TurnContext {
                history: &session.transcript,
                resume_text: &session.resume_text,
                details: &details,
                window: &window,
                current_time: &current_time,
            })
            .await;

        session.transcript.push(Turn::ai(reply.clone()));
        self.sessions.save_session(&candidate.id, &session).await?;

        debug!(
            candidate_id = %candidate.id,
            session_id = %session_id,
            turns = session.transcript.len(),
            "Exchange persisted"
        );
        Ok(reply)
    }

    /// Cached interview configuration, refetched from the durable record on
    /// a miss.
    async fn interview_details(
        &self,
        session_id: &str,
        candidate_id: &str,
    ) -> Result<InterviewDetails, GatewayError> {
        if let Some(details) = self.sessions.cached_details(session_id, candidate_id).await? {
            return Ok(details);
        }

        let details = self
            .records
            .find_interview(session_id)
            .await?
            .ok_or(GatewayError::InterviewDetailsNotFound)?;
        self.sessions
            .cache_details(session_id, candidate_id, &details)
            .await?;
        debug!(session_id = %session_id, "Interview details cached");
        Ok(details)
    }

    /// Score and close the candidate's interview.
    ///
    /// Steps run in order and the first failure aborts the rest, so a failed
    /// finalization leaves session state in place for a retry.
    pub async fn handle_end_interview(
        &self,
        candidate: Option<&CandidateIdentity>,
        request: EndInterview,
    ) -> Result<FinalOutcome, GatewayError> {
        let (Some(session_id), Some(video_url)) = (
            present(request.session_id.as_deref()),
            present(request.video_url.as_deref()),
        ) else {
            return Err(GatewayError::MissingFinalizationFields);
        };
        let candidate = candidate.ok_or(GatewayError::NotAuthenticated)?;

        let _guard = self.locks.acquire(&candidate.id).await;

        let session = self
            .sessions
            .load_session(&candidate.id)
            .await?
            .ok_or(GatewayError::NothingToFinalize)?;
        if session.transcript.is_empty() {
            return Err(GatewayError::EmptyTranscript);
        }

        let feedback = self
            .finalizer
            .generate(&session.resume_text, &session.transcript)
            .await;

        let interview_id = session
            .interview_id
            .clone()
            .ok_or(GatewayError::InterviewRecordMissing)?;

        self.records
            .complete_result(
                &interview_id,
                ResultCompletion {
                    feedback: feedback.clone(),
                    video_url: video_url.to_string(),
                    transcript: session.transcript.clone(),
                },
            )
            .await?
            .ok_or(GatewayError::ResultUpdateFailed)?;

        let updated_details = self
            .records
            .push_completion(
                session_id,
                CompletionMarker {
                    email: candidate.email.clone(),
                    interview_id: interview_id.clone(),
                },
            )
            .await?
            .ok_or(GatewayError::DetailsUpdateFailed)?;

        if self.records.increment_attempts(&candidate.id).await?.is_none() {
            warn!(candidate_id = %candidate.id, "Candidate record missing, attempt not counted");
        }

        self.sessions.delete_session(&candidate.id).await?;
        self.sessions.delete_details(session_id, &candidate.id).await?;

        info!(
            candidate_id = %candidate.id,
            session_id = %session_id,
            interview_id = %interview_id,
            overall_mark = feedback.overall_mark,
            turns = session.transcript.len(),
            "Interview finalized"
        );

        Ok(FinalOutcome {
            feedback,
            updated_details,
        })
    }
}
