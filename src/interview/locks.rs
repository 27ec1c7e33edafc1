//! Per-candidate serialization of session updates.
//!
//! Session state is read, changed and written back whole. Two operations for
//! the same candidate (a second tab, or a message racing end-of-interview)
//! would otherwise overwrite each other, so each operation holds the
//! candidate's lock for its full read-modify-write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct CandidateLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl CandidateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `candidate_id`'s session.
    pub async fn acquire(&self, candidate_id: &str) -> OwnedMutexGuard<()> {
        let lock = self.lock_for(candidate_id);
        lock.lock_owned().await
    }

    fn lock_for(&self, candidate_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(existing) = locks.get(candidate_id).and_then(Weak::upgrade) {
            return existing;
        }

        // Entries whose guards are all gone are dead weight
        locks.retain(|_, weak| weak.strong_count() > 0);

        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(candidate_id.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// Candidates with an operation in flight.
    pub fn active(&self) -> usize {
        match self.locks.lock() {
            Ok(locks) => locks.values().filter(|weak| weak.strong_count() > 0).count(),
            Err(poisoned) => poisoned
                .into_inner()
                .values()
                .filter(|weak| weak.strong_count() > 0)
                .count(),
        }
    }
}
