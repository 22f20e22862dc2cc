//! Per-job write serialization.
//!
//! Repository writes are whole-record upserts, so every read-modify-write of a job holds that
//! job's lock for the duration. Different jobs never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use tradeq_core::JobId;

type LockMap = HashMap<JobId, Arc<AsyncMutex<()>>>;

/// Keyed async mutex. Cheap to clone; clones share the same lock table.
#[derive(Debug, Clone, Default)]
pub struct JobLocks {
    inner: Arc<Mutex<LockMap>>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one job.
    pub async fn lock(&self, id: &JobId) -> JobGuard {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.entry(id.clone()).or_default().clone()
        };

        let guard = slot.lock_owned().await;
        JobGuard {
            id: id.clone(),
            locks: self.inner.clone(),
            guard: Some(guard),
        }
    }

    /// Number of jobs with a live lock entry.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one job; released on drop.
pub struct JobGuard {
    id: JobId,
    locks: Arc<Mutex<LockMap>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut map = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map still references the slot: nobody holds or waits on it.
        if map
            .get(&self.id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            map.remove(&self.id);
        }
    }
}

impl core::fmt::Debug for JobGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobGuard").field("id", &self.id).finish()
    }
}
