//! Durable job storage.
//!
//! One record per job, keyed by id. Writes are whole-record upserts (last write wins), so
//! callers that change a subset of fields must re-read the latest snapshot first; the
//! lifecycle and use-case layers do this under a per-job lock (see `jobs::JobLocks`).
//!
//! Scans return records in no particular order. Ordering belongs to the queue manager and
//! the query use cases.

pub mod in_memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use tradeq_core::{AnalysisJob, JobId, JobStatus};

pub use in_memory::InMemoryJobRepository;
pub use sqlite::SqliteJobRepository;

/// Job repository error.
///
/// Persistence errors are never swallowed: the local write is what makes a job exist.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("corrupt job record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Job repository abstraction.
///
/// All operations are safe to call concurrently.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert or replace the record for `job.id()`.
    async fn save(&self, job: &AnalysisJob) -> Result<(), RepositoryError>;

    /// Current snapshot of a job, if it exists.
    async fn get_by_id(&self, id: &JobId) -> Result<Option<AnalysisJob>, RepositoryError>;

    /// Every stored job.
    async fn get_all(&self) -> Result<Vec<AnalysisJob>, RepositoryError>;

    /// Jobs currently in `status`.
    async fn get_by_status(&self, status: JobStatus) -> Result<Vec<AnalysisJob>, RepositoryError>;

    /// Overwrite a job with a full snapshot. Same semantics as [`JobRepository::save`].
    async fn update(&self, job: &AnalysisJob) -> Result<(), RepositoryError> {
        self.save(job).await
    }

    /// Remove one job. Returns whether a record existed.
    async fn delete(&self, id: &JobId) -> Result<bool, RepositoryError>;

    /// Remove every job.
    async fn clear_all(&self) -> Result<(), RepositoryError>;
}

#[async_trait]
impl<R> JobRepository for Arc<R>
where
    R: JobRepository + ?Sized,
{
    async fn save(&self, job: &AnalysisJob) -> Result<(), RepositoryError> {
        (**self).save(job).await
    }

    async fn get_by_id(&self, id: &JobId) -> Result<Option<AnalysisJob>, RepositoryError> {
        (**self).get_by_id(id).await
    }

    async fn get_all(&self) -> Result<Vec<AnalysisJob>, RepositoryError> {
        (**self).get_all().await
    }

    async fn get_by_status(&self, status: JobStatus) -> Result<Vec<AnalysisJob>, RepositoryError> {
        (**self).get_by_status(status).await
    }

    async fn update(&self, job: &AnalysisJob) -> Result<(), RepositoryError> {
        (**self).update(job).await
    }

    async fn delete(&self, id: &JobId) -> Result<bool, RepositoryError> {
        (**self).delete(id).await
    }

    async fn clear_all(&self) -> Result<(), RepositoryError> {
        (**self).clear_all().await
    }
}
