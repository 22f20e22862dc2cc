//! In-memory job repository for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use tradeq_core::{AnalysisJob, JobId, JobStatus};

use super::{JobRepository, RepositoryError};

/// Process-local repository. Contents do not survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<JobId, AnalysisJob>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, AnalysisJob>>, RepositoryError> {
        self.jobs
            .read()
            .map_err(|_| RepositoryError::Storage("job map lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, AnalysisJob>>, RepositoryError> {
        self.jobs
            .write()
            .map_err(|_| RepositoryError::Storage("job map lock poisoned".to_string()))
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn save(&self, job: &AnalysisJob) -> Result<(), RepositoryError> {
        self.write()?.insert(job.id().clone(), job.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &JobId) -> Result<Option<AnalysisJob>, RepositoryError> {
        Ok(self.read()?.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<AnalysisJob>, RepositoryError> {
        Ok(self.read()?.values().cloned().collect())
    }

    async fn get_by_status(&self, status: JobStatus) -> Result<Vec<AnalysisJob>, RepositoryError> {
        Ok(self
            .read()?
            .values()
            .filter(|job| job.status() == status)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &JobId) -> Result<bool, RepositoryError> {
        Ok(self.write()?.remove(id).is_some())
    }

    async fn clear_all(&self) -> Result<(), RepositoryError> {
        self.write()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::job;

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let repo = InMemoryJobRepository::new();
        let job = job("AAPL").with_remote_run("run-1", "thread-1");

        repo.save(&job).await.unwrap();

        assert_eq!(repo.get_by_id(job.id()).await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn update_overwrites_whole_record() {
        let repo = InMemoryJobRepository::new();
        let job = job("AAPL");
        repo.save(&job).await.unwrap();

        let queued = job.mark_queued().unwrap();
        repo.update(&queued).await.unwrap();

        let stored = repo.get_by_id(job.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Queued);
        assert_eq!(repo.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn filters_by_status() {
        let repo = InMemoryJobRepository::new();
        let pending = job("AAPL");
        let queued = job("MSFT").mark_queued().unwrap();
        repo.save(&pending).await.unwrap();
        repo.save(&queued).await.unwrap();

        let found = repo.get_by_status(JobStatus::Queued).await.unwrap();
        assert_eq!(found, vec![queued]);
        assert!(repo.get_by_status(JobStatus::Running).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let repo = InMemoryJobRepository::new();
        let a = job("AAPL");
        let b = job("MSFT");
        repo.save(&a).await.unwrap();
        repo.save(&b).await.unwrap();

        assert!(repo.delete(a.id()).await.unwrap());
        assert!(!repo.delete(a.id()).await.unwrap());
        assert!(repo.get_by_id(a.id()).await.unwrap().is_none());

        repo.clear_all().await.unwrap();
        assert!(repo.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_job_is_none() {
        let repo = InMemoryJobRepository::new();
        assert!(repo.get_by_id(&JobId::new("nope")).await.unwrap().is_none());
    }
}
