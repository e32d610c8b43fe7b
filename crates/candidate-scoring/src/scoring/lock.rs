use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::domain::ApplicantId;

/// How long a caller is prepared to wait for an applicant's lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    /// Request-serving paths such as webhooks; short bound so HTTP responses never hang.
    Request,
    /// Cron and batch sync paths that can afford to queue.
    Batch,
    Within(Duration),
}

/// Per-applicant mutual exclusion for the read-modify-write cycle. Unrelated
/// applicants never contend. In-process only: a multi-instance deployment needs a
/// shared lock such as a database row lock.
#[derive(Debug, Default)]
pub struct ApplicantLock {
    entries: Mutex<HashMap<ApplicantId, Arc<AsyncMutex<()>>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("lock for applicant {applicant} not acquired within {waited:?}")]
pub struct LockTimeout {
    pub applicant: ApplicantId,
    pub waited: Duration,
}

impl ApplicantLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `wait` for exclusive access. Dropping the returned future while
    /// waiting gives up without side effects.
    pub async fn acquire(
        &self,
        applicant: ApplicantId,
        wait: Duration,
    ) -> Result<ApplicantGuard<'_>, LockTimeout> {
        let entry = self.entry(applicant);

        let acquired = tokio::time::timeout(wait, entry.lock_owned()).await;
        match acquired {
            Ok(guard) => Ok(ApplicantGuard {
                lock: self,
                applicant,
                guard: Some(guard),
            }),
            Err(_) => {
                self.prune(applicant);
                Err(LockTimeout {
                    applicant,
                    waited: wait,
                })
            }
        }
    }

    /// Number of applicants with a held or awaited lock.
    pub fn active(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn entry(&self, applicant: ApplicantId) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(applicant).or_default())
    }

    // Entries are cloned only under the table lock, so a count of one means no
    // holder or waiter remains.
    fn prune(&self, applicant: ApplicantId) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries
            .get(&applicant)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            entries.remove(&applicant);
        }
    }
}

/// Held lock for one applicant; released on drop.
#[derive(Debug)]
pub struct ApplicantGuard<'a> {
    lock: &'a ApplicantLock,
    applicant: ApplicantId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ApplicantGuard<'_> {
    pub fn applicant(&self) -> ApplicantId {
        self.applicant
    }
}

impl Drop for ApplicantGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.lock.prune(self.applicant);
    }
}
