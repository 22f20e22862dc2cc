//! Delayed requeueing of failed jobs.
//!
//! Each scheduled retry is a one-shot tokio task that sleeps for the policy delay and then
//! requeues the job. The timer table maps a job id to its armed task plus a token; a firing
//! timer removes its own entry before doing any work, so after that point `cancel_retry` finds
//! nothing and the requeue runs exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use tradeq_core::{AnalysisJob, JobId, JobStatus, TransitionError};
use tradeq_events::JobEvent;

use super::locks::JobLocks;
use super::policy::JobRetryPolicy;
use super::queue::{PriorityQueueManager, QueueError};
use crate::repository::RepositoryError;
use crate::{SharedEventBus, SharedJobRepository, publish_event};

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("job {id} is {status}, only failed jobs can be retried")]
    NotFailed { id: JobId, status: JobStatus },
    #[error("job {id} has used {retry_count} of {max_retries} retries")]
    Exhausted {
        id: JobId,
        retry_count: u32,
        max_retries: u32,
    },
    #[error("a retry is already scheduled for job {0}")]
    AlreadyScheduled(JobId),
    #[error("no tokio runtime available to arm the retry timer")]
    NoRuntime,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Debug)]
struct ArmedTimer {
    token: u64,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    repository: SharedJobRepository,
    queue: Arc<PriorityQueueManager>,
    bus: SharedEventBus,
    policy: JobRetryPolicy,
    locks: JobLocks,
    timers: Mutex<HashMap<JobId, ArmedTimer>>,
    next_token: AtomicU64,
}

impl SchedulerInner {
    fn timers(&self) -> MutexGuard<'_, HashMap<JobId, ArmedTimer>> {
        self.timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn fire(self: Arc<Self>, id: JobId, token: u64) {
        {
            let mut timers = self.timers();
            match timers.get(&id) {
                Some(timer) if timer.token == token => {
                    timers.remove(&id);
                }
                _ => return,
            }
        }

        if let Err(err) = self.requeue(&id).await {
            warn!(job_id = %id, error = %err, "retry requeue failed; job stays failed");
        }
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn requeue(&self, id: &JobId) -> Result<Option<AnalysisJob>, RetryError> {
        let _guard = self.locks.lock(id).await;

        // Reload: the job may have been cancelled or purged since the timer was armed.
        let Some(job) = self.repository.get_by_id(id).await? else {
            debug!("job no longer exists; retry dropped");
            return Ok(None);
        };
        if !job.is_retryable() {
            debug!(status = %job.status(), "job no longer retryable; retry dropped");
            return Ok(None);
        }

        let requeued = job.mark_requeued()?;
        let stored = self.queue.enqueue(&requeued).await?;
        info!(retry_count = stored.retry_count(), "job requeued for retry");

        publish_event(&self.bus, JobEvent::requeued(stored.clone()));
        Ok(Some(stored))
    }
}

/// Arms, tracks and cancels retry timers. Cheap to clone.
#[derive(Clone)]
pub struct RetryScheduler {
    inner: Arc<SchedulerInner>,
}

impl RetryScheduler {
    pub fn new(
        repository: SharedJobRepository,
        queue: Arc<PriorityQueueManager>,
        bus: SharedEventBus,
        policy: JobRetryPolicy,
        locks: JobLocks,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                repository,
                queue,
                bus,
                policy,
                locks,
                timers: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(0),
            }),
        }
    }

    pub fn policy(&self) -> &JobRetryPolicy {
        &self.inner.policy
    }

    /// Arm a one-shot timer that requeues `job` after the policy delay.
    ///
    /// Refuses jobs that are not `failed`, jobs whose retries are used up (by the job's own
    /// ceiling or the policy's), and jobs that already have a timer armed.
    pub fn schedule_retry(&self, job: &AnalysisJob) -> Result<Duration, RetryError> {
        let id = job.id().clone();
        if job.status() != JobStatus::Failed {
            return Err(RetryError::NotFailed {
                id,
                status: job.status(),
            });
        }

        let exhausted = || RetryError::Exhausted {
            id: job.id().clone(),
            retry_count: job.retry_count(),
            max_retries: job.max_retries().min(self.inner.policy.max_retries),
        };
        if !job.is_retryable() {
            return Err(exhausted());
        }
        let delay = self
            .inner
            .policy
            .delay_for(job.retry_count())
            .ok_or_else(exhausted)?;

        let runtime = Handle::try_current().map_err(|_| RetryError::NoRuntime)?;

        let mut timers = self.inner.timers();
        if timers.contains_key(&id) {
            return Err(RetryError::AlreadyScheduled(id));
        }

        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let timer_id = id.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(timer_id, token).await;
        });
        timers.insert(id.clone(), ArmedTimer { token, handle });

        info!(
            job_id = %id,
            retry_count = job.retry_count(),
            delay_ms = delay.as_millis() as u64,
            "retry scheduled"
        );
        Ok(delay)
    }

    /// Disarm the pending timer for `id`. Returns whether one was armed.
    ///
    /// A timer that has already started firing is past cancellation; this then returns
    /// `false` and the requeue proceeds.
    pub fn cancel_retry(&self, id: &JobId) -> bool {
        match self.inner.timers().remove(id) {
            Some(timer) => {
                timer.handle.abort();
                debug!(job_id = %id, "retry cancelled");
                true
            }
            None => false,
        }
    }

    /// Disarm every pending timer. Returns how many were armed.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<ArmedTimer> = self.inner.timers().drain().map(|(_, t)| t).collect();
        for timer in &drained {
            timer.handle.abort();
        }
        drained.len()
    }

    /// Number of currently armed timers.
    pub fn scheduled_retry_count(&self) -> usize {
        self.inner.timers().len()
    }

    /// Requeue a failed job right away, bypassing the timer. Any armed timer is disarmed.
    pub async fn retry_now(&self, id: &JobId) -> Result<Option<AnalysisJob>, RetryError> {
        self.cancel_retry(id);
        self.inner.requeue(id).await
    }
}

impl core::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("policy", &self.inner.policy)
            .field("scheduled", &self.scheduled_retry_count())
            .finish_non_exhaustive()
    }
}
