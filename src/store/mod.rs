//! # Persistence
//!
//! Storage seams used by the interview gateway. Both stores sit behind traits
//! so the gateway does not care whether state lives in process memory or in an
//! external service.
//!
//! ## Key Components:
//! - **KeyValueStore**: Expiring string cache (live interview state)
//! - **SessionStore**: Key conventions and JSON encoding on top of the cache
//! - **RecordStore**: Durable interview, result and candidate records with
//!   atomic single-document updates
//!
//! ## Write semantics:
//! Cache records are replaced whole (read, mutate, overwrite; last writer
//! wins). Record updates are single atomic operations: set fields, push onto
//! an array, increment a counter.

pub mod cache;
pub mod records;
pub mod session;

pub use cache::{KeyValueStore, MemoryCache};
pub use records::{
    Candidate, CompletionMarker, InterviewDetails, InterviewResult, MemoryRecordStore,
    RecordStore, ResultCompletion,
};
pub use session::{InterviewSession, Role, SessionStore, Turn};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing service failed or is unreachable
    #[error("store backend error: {0}")]
    Backend(String),

    /// A stored value could not be decoded
    #[error("corrupt record at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}
