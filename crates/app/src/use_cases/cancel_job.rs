use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use tradeq_core::{JobId, JobStatus};
use tradeq_infra::SharedJobRepository;
use tradeq_infra::jobs::{JobLifecycle, ProcessorRegistry};

use super::get_job_status::dedupe_ids;
use crate::error::{UseCaseError, UseCaseResult};

const CANCEL_REASON: &str = "cancelled by user";

/// Aggregate outcome of [`CancelJobUseCase::execute_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchCancelResult {
    /// Distinct ids requested (blank entries included, duplicates not).
    pub total_requested: usize,
    pub succeeded: usize,
    /// Attempted but errored.
    pub failed: usize,
    pub not_found: usize,
    /// Found, but finished or running without a live processor.
    pub not_cancellable: usize,
}

impl BatchCancelResult {
    pub fn not_cancelled(&self) -> usize {
        self.failed + self.not_found + self.not_cancellable
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total_requested
    }

    pub fn any_succeeded(&self) -> bool {
        self.succeeded > 0
    }
}

impl core::fmt::Display for BatchCancelResult {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "BatchCancelResult(total={}, succeeded={}, failed={}, not_found={}, not_cancellable={})",
            self.total_requested, self.succeeded, self.failed, self.not_found, self.not_cancellable
        )
    }
}

/// Cancels jobs that have not finished.
///
/// Waiting jobs are cancelled in storage directly. A running job can only be asked to stop
/// through its registered processor; `Ok(false)` means nothing was cancelled.
pub struct CancelJobUseCase {
    repository: SharedJobRepository,
    lifecycle: Arc<JobLifecycle>,
    registry: Arc<ProcessorRegistry>,
}

impl CancelJobUseCase {
    pub fn new(
        repository: SharedJobRepository,
        lifecycle: Arc<JobLifecycle>,
        registry: Arc<ProcessorRegistry>,
    ) -> Self {
        Self {
            repository,
            lifecycle,
            registry,
        }
    }

    #[instrument(skip(self))]
    pub async fn execute(&self, id: &str) -> UseCaseResult<bool> {
        let id = id.trim();
        if id.is_empty() {
            return Err(UseCaseError::InvalidArgument(
                "job id must not be empty".to_string(),
            ));
        }
        self.cancel(&JobId::new(id)).await
    }

    async fn cancel(&self, id: &JobId) -> UseCaseResult<bool> {
        let job = self
            .repository
            .get_by_id(id)
            .await?
            .ok_or_else(|| UseCaseError::NotFound(id.clone()))?;

        match job.status() {
            JobStatus::Pending | JobStatus::Queued => {
                if self.lifecycle.cancel_waiting(id, CANCEL_REASON).await?.is_some() {
                    return Ok(true);
                }
                // Dispatched between the read and the cancel.
                debug!(job_id = %id, "job left the waiting states; retrying as running");
                self.cancel_running(id).await
            }
            JobStatus::Running => self.cancel_running(id).await,
            status => {
                debug!(job_id = %id, %status, "job already finished; nothing to cancel");
                Ok(false)
            }
        }
    }

    async fn cancel_running(&self, id: &JobId) -> UseCaseResult<bool> {
        let delivered = self.registry.request_cancel(id);
        if delivered {
            info!(job_id = %id, "cancellation signalled to running processor");
        } else {
            debug!(job_id = %id, "no live processor; running job not cancelled");
        }
        Ok(delivered)
    }

    /// Cancel each distinct id independently and tally the outcomes.
    pub async fn execute_batch<S: AsRef<str>>(&self, ids: &[S]) -> BatchCancelResult {
        let blanks = usize::from(ids.iter().any(|id| id.as_ref().trim().is_empty()));
        let ids = dedupe_ids(ids);
        let mut result = BatchCancelResult {
            total_requested: ids.len() + blanks,
            failed: blanks,
            ..BatchCancelResult::default()
        };

        for id in &ids {
            match self.cancel(id).await {
                Ok(true) => result.succeeded += 1,
                Ok(false) => result.not_cancellable += 1,
                Err(UseCaseError::NotFound(_)) => result.not_found += 1,
                Err(err) => {
                    warn!(job_id = %id, error = %err, "cancellation failed");
                    result.failed += 1;
                }
            }
        }

        info!(%result, "batch cancellation finished");
        result
    }
}
