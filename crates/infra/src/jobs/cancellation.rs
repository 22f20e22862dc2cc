//! Cooperative cancellation of in-flight jobs.
//!
//! A processor registers while it works on a job and receives a `CancellationToken` to poll at
//! its checkpoints. Cancelling a running job only trips that token; if no processor is
//! registered the request is reported as not delivered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use tradeq_core::JobId;

#[derive(Debug, Default)]
pub struct ProcessorRegistry {
    active: Mutex<HashMap<JobId, (u64, CancellationToken)>>,
    next: AtomicU64,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> MutexGuard<'_, HashMap<JobId, (u64, CancellationToken)>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a live processor for `id`. Dropping the registration unregisters it.
    ///
    /// A newer registration for the same id replaces the older one.
    pub fn register(self: &Arc<Self>, id: &JobId) -> Registration {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.active()
            .insert(id.clone(), (seq, token.clone()));

        Registration {
            registry: Arc::clone(self),
            id: id.clone(),
            seq,
            token,
        }
    }

    /// Ask the processor working on `id` to stop. Returns whether one was registered.
    pub fn request_cancel(&self, id: &JobId) -> bool {
        match self.active().get(id) {
            Some((_, token)) => {
                token.cancel();
                debug!(job_id = %id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, id: &JobId) -> bool {
        self.active().contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.active().len()
    }
}

/// A processor's claim on one job.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ProcessorRegistry>,
    id: JobId,
    seq: u64,
    token: CancellationToken,
}

impl Registration {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut active = self.registry.active();
        if active.get(&self.id).is_some_and(|(seq, _)| *seq == self.seq) {
            active.remove(&self.id);
        }
    }
}
