//! # Interview Conversation
//!
//! Everything between "the candidate said something" and "the interviewer
//! answered", plus scoring at the end.
//!
//! ## Key Components:
//! - **InterviewService**: Runs user-message, end-interview and
//!   start-interview against the stores
//! - **TurnEngine**: Builds the prompt and asks the model for the next
//!   interviewer utterance
//! - **Finalizer**: Scores the transcript into [`Feedback`]
//! - **TimingWindow**: Display start/end times for the model
//! - **CandidateLocks**: Serializes operations per candidate

pub mod finalizer;
pub mod locks;
pub mod service;
pub mod timing;
pub mod turn;

pub use finalizer::Finalizer;
pub use service::{EndInterview, InterviewService, UserMessage};
pub use turn::TurnEngine;
