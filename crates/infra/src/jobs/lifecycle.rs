//! Status callbacks: the path by which workers, the engine submission and the status poller
//! move a job through its lifecycle.
//!
//! Every operation reloads the job under its lock, applies one transition, persists the full
//! snapshot, then publishes the matching event.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use tradeq_core::{AnalysisJob, JobId, JobStatus, TransitionError};
use tradeq_events::JobEvent;

use super::locks::JobLocks;
use super::queue::{PriorityQueueManager, QueueError};
use super::retry::RetryScheduler;
use crate::repository::RepositoryError;
use crate::{SharedEventBus, SharedJobRepository, publish_event};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub struct JobLifecycle {
    repository: SharedJobRepository,
    queue: Arc<PriorityQueueManager>,
    retries: RetryScheduler,
    bus: SharedEventBus,
    locks: JobLocks,
}

impl JobLifecycle {
    pub fn new(
        repository: SharedJobRepository,
        queue: Arc<PriorityQueueManager>,
        retries: RetryScheduler,
        bus: SharedEventBus,
        locks: JobLocks,
    ) -> Self {
        Self {
            repository,
            queue,
            retries,
            bus,
            locks,
        }
    }

    pub fn retries(&self) -> &RetryScheduler {
        &self.retries
    }

    async fn load(&self, id: &JobId) -> Result<AnalysisJob, LifecycleError> {
        self.repository
            .get_by_id(id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(id.clone()))
    }

    /// `queued → running` and out of the ready set. Caller holds the job lock.
    async fn start(&self, job: &AnalysisJob) -> Result<AnalysisJob, LifecycleError> {
        let running = job.mark_running(Utc::now())?;
        self.queue.remove(job.id());
        self.repository.update(&running).await?;
        info!(job_id = %running.id(), ticker = %running.ticker(), "job started");
        publish_event(&self.bus, JobEvent::started(running.clone()));
        Ok(running)
    }

    /// Engine reports are allowed to overtake the local `queued → running` step.
    async fn ensure_running(&self, job: AnalysisJob) -> Result<AnalysisJob, LifecycleError> {
        if job.status() == JobStatus::Queued {
            self.start(&job).await
        } else {
            Ok(job)
        }
    }

    /// `queued → running`, once a worker slot is confirmed.
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn mark_running(&self, id: &JobId) -> Result<AnalysisJob, LifecycleError> {
        let _guard = self.locks.lock(id).await;
        let job = self.load(id).await?;
        self.start(&job).await
    }

    /// Record the engine's run identifiers after a successful submission.
    ///
    /// When the engine reports the run as already executing, a `queued` job also moves to
    /// `running`.
    #[instrument(skip(self, run_id, thread_id), fields(job_id = %id))]
    pub async fn record_submission(
        &self,
        id: &JobId,
        run_id: &str,
        thread_id: &str,
        remote_running: bool,
    ) -> Result<AnalysisJob, LifecycleError> {
        let _guard = self.locks.lock(id).await;
        let job = self.load(id).await?.with_remote_run(run_id, thread_id);

        if remote_running && job.status() == JobStatus::Queued {
            return self.start(&job).await;
        }

        self.repository.update(&job).await?;
        info!(run_id, status = %job.status(), "engine run recorded");
        Ok(job)
    }

    /// `running → completed` with the engine's result reference.
    #[instrument(skip(self, result_id), fields(job_id = %id))]
    pub async fn complete(&self, id: &JobId, result_id: &str) -> Result<AnalysisJob, LifecycleError> {
        let _guard = self.locks.lock(id).await;
        let job = self.ensure_running(self.load(id).await?).await?;

        let completed = job.mark_completed(result_id, Utc::now())?;
        self.repository.update(&completed).await?;
        info!(result_id, "job completed");

        publish_event(&self.bus, JobEvent::completed(completed.clone(), result_id));
        Ok(completed)
    }

    /// `running → failed`, then arm a retry if the job has retries left.
    ///
    /// A retry the scheduler refuses is logged and the job stays `failed`.
    #[instrument(skip(self, error), fields(job_id = %id))]
    pub async fn fail(&self, id: &JobId, error: &str) -> Result<AnalysisJob, LifecycleError> {
        let _guard = self.locks.lock(id).await;
        let job = self.ensure_running(self.load(id).await?).await?;

        let failed = job.mark_failed(error, Utc::now())?;
        self.repository.update(&failed).await?;

        let will_retry = failed.is_retryable()
            && match self.retries.schedule_retry(&failed) {
                Ok(_) => true,
                Err(err) => {
                    warn!(error = %err, "retry not scheduled; job needs manual attention");
                    false
                }
            };
        info!(
            retry_count = failed.retry_count(),
            will_retry,
            error,
            "job failed"
        );

        publish_event(&self.bus, JobEvent::failed(failed.clone(), error, will_retry));
        Ok(failed)
    }

    /// `{pending, queued, running} → cancelled`. Drops the job from the ready set and disarms
    /// any pending retry.
    #[instrument(skip(self, reason), fields(job_id = %id))]
    pub async fn cancel(&self, id: &JobId, reason: &str) -> Result<AnalysisJob, LifecycleError> {
        let _guard = self.locks.lock(id).await;
        let job = self.load(id).await?;
        self.apply_cancel(&job, reason).await
    }

    /// Cancel only while the job is still `pending` or `queued`.
    ///
    /// Returns `None` without touching the record if the job has already been dispatched or
    /// finished.
    #[instrument(skip(self, reason), fields(job_id = %id))]
    pub async fn cancel_waiting(
        &self,
        id: &JobId,
        reason: &str,
    ) -> Result<Option<AnalysisJob>, LifecycleError> {
        let _guard = self.locks.lock(id).await;
        let job = self.load(id).await?;
        if !matches!(job.status(), JobStatus::Pending | JobStatus::Queued) {
            return Ok(None);
        }
        self.apply_cancel(&job, reason).await.map(Some)
    }

    async fn apply_cancel(
        &self,
        job: &AnalysisJob,
        reason: &str,
    ) -> Result<AnalysisJob, LifecycleError> {
        let cancelled = job.mark_cancelled(Utc::now())?;
        self.repository.update(&cancelled).await?;
        self.queue.remove(job.id());
        self.retries.cancel_retry(job.id());
        info!(reason, "job cancelled");

        publish_event(&self.bus, JobEvent::cancelled(cancelled.clone(), reason));
        Ok(cancelled)
    }
}

impl core::fmt::Debug for JobLifecycle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobLifecycle")
            .field("queue", &self.queue)
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}
