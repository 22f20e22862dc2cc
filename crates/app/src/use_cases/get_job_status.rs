use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tradeq_core::{AnalysisJob, JobId, JobPriority, JobStatus};
use tradeq_infra::SharedJobRepository;
use tradeq_infra::jobs::JobStatistics;

use crate::error::{UseCaseError, UseCaseResult};

/// Conjunctive filter for [`GetJobStatusUseCase::get_all`]. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub priority: Option<JobPriority>,
    /// Case-insensitive ticker match.
    pub ticker: Option<String>,
    /// Earliest trade date, inclusive.
    pub start_date: Option<NaiveDate>,
    /// Latest trade date, inclusive.
    pub end_date: Option<NaiveDate>,
    /// Applied after sorting newest-first.
    pub limit: Option<usize>,
}

impl JobFilter {
    fn matches(&self, job: &AnalysisJob) -> bool {
        let trade_date = job.trade_date().as_date();
        self.status.is_none_or(|status| job.status() == status)
            && self.priority.is_none_or(|priority| job.priority() == priority)
            && self
                .ticker
                .as_deref()
                .is_none_or(|ticker| job.ticker().matches(ticker))
            && self.start_date.is_none_or(|start| trade_date >= start)
            && self.end_date.is_none_or(|end| trade_date <= end)
    }
}

/// Status counts plus derived aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobStatisticsSummary {
    #[serde(flatten)]
    pub counts: JobStatistics,
    pub total: usize,
    /// `pending + queued + running`
    pub active: usize,
    /// `completed + failed + cancelled`
    pub terminal: usize,
    /// `completed / (completed + failed)`, `0.0` when nothing has finished either way.
    pub success_rate: f64,
}

impl From<JobStatistics> for JobStatisticsSummary {
    fn from(counts: JobStatistics) -> Self {
        let finished = counts.completed + counts.failed;
        let success_rate = if finished == 0 {
            0.0
        } else {
            counts.completed as f64 / finished as f64
        };
        Self {
            counts,
            total: counts.total(),
            active: counts.pending + counts.queued + counts.running,
            terminal: counts.completed + counts.failed + counts.cancelled,
            success_rate,
        }
    }
}

/// Read-only job queries. Lookups return `None` for unknown ids instead of erroring.
pub struct GetJobStatusUseCase {
    repository: SharedJobRepository,
}

impl GetJobStatusUseCase {
    pub fn new(repository: SharedJobRepository) -> Self {
        Self { repository }
    }

    #[instrument(skip(self))]
    pub async fn execute(&self, id: &str) -> UseCaseResult<Option<AnalysisJob>> {
        let id = id.trim();
        if id.is_empty() {
            return Err(UseCaseError::InvalidArgument(
                "job id must not be empty".to_string(),
            ));
        }
        Ok(self.repository.get_by_id(&JobId::new(id)).await?)
    }

    /// Best-effort fetch: duplicates and empty ids are dropped, missing jobs omitted.
    /// Results keep the order of first appearance.
    pub async fn execute_batch<S: AsRef<str>>(&self, ids: &[S]) -> UseCaseResult<Vec<AnalysisJob>> {
        let mut jobs = Vec::new();
        for id in dedupe_ids(ids) {
            if let Some(job) = self.repository.get_by_id(&id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Jobs matching `filter`, newest first.
    pub async fn get_all(&self, filter: &JobFilter) -> UseCaseResult<Vec<AnalysisJob>> {
        let mut jobs: Vec<AnalysisJob> = match filter.status {
            Some(status) => self.repository.get_by_status(status).await?,
            None => self.repository.get_all().await?,
        };
        jobs.retain(|job| filter.matches(job));
        jobs.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    pub async fn get_statistics(&self) -> UseCaseResult<JobStatisticsSummary> {
        let jobs = self.repository.get_all().await?;
        Ok(JobStatistics::from_jobs(&jobs).into())
    }
}

/// Trimmed, non-empty ids in order of first appearance.
pub(crate) fn dedupe_ids<S: AsRef<str>>(ids: &[S]) -> Vec<JobId> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|id| id.as_ref().trim())
        .filter(|id| !id.is_empty() && seen.insert(id.to_string()))
        .map(JobId::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Harness, job_on};
    use proptest::prelude::*;

    #[tokio::test]
    async fn empty_id_is_an_argument_error() {
        let h = Harness::new();
        let err = h.get_job_status.execute("  ").await.unwrap_err();
        assert!(matches!(err, UseCaseError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn unknown_id_is_absent_not_an_error() {
        let h = Harness::new();
        assert!(h.get_job_status.execute("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_dedupes_and_omits_missing() {
        let h = Harness::new();
        let a = h.insert(job_on("AAPL", "2024-01-10", JobPriority::Normal, 0)).await;
        let b = h.insert(job_on("MSFT", "2024-01-11", JobPriority::Normal, 1)).await;

        let jobs = h
            .get_job_status
            .execute_batch(&[b.as_str(), "", a.as_str(), b.as_str(), "nope"])
            .await
            .unwrap();

        let ids: Vec<&str> = jobs.iter().map(|job| job.id().as_str()).collect();
        assert_eq!(ids, vec![b.as_str(), a.as_str()]);

        let single = h
            .get_job_status
            .execute_batch(&[a.as_str(), a.as_str(), a.as_str()])
            .await
            .unwrap();
        assert_eq!(single.len(), 1);
    }

    #[tokio::test]
    async fn get_all_sorts_newest_first_and_applies_filters() {
        let h = Harness::new();
        h.insert(job_on("AAPL", "2024-01-10", JobPriority::Low, 0)).await;
        h.insert(job_on("aapl", "2024-01-15", JobPriority::High, 10)).await;
        h.insert(job_on("MSFT", "2024-01-20", JobPriority::High, 20)).await;
        h.insert(job_on("AAPL", "2024-01-20", JobPriority::High, 30)).await;

        let all = h.get_job_status.get_all(&JobFilter::default()).await.unwrap();
        let times: Vec<_> = all.iter().map(|job| job.created_at()).collect();
        let mut sorted = times.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(times, sorted);

        let filter = JobFilter {
            ticker: Some("Aapl".into()),
            priority: Some(JobPriority::High),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 15),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 20),
            ..JobFilter::default()
        };
        let filtered = h.get_job_status.get_all(&filter).await.unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|job| job.ticker().as_str() == "AAPL"));

        let limited = h
            .get_job_status
            .get_all(&JobFilter {
                limit: Some(1),
                ..filter
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id(), filtered[0].id());
    }

    #[tokio::test]
    async fn statistics_success_rate_is_zero_without_finished_jobs() {
        let h = Harness::new();
        h.insert(job_on("AAPL", "2024-01-10", JobPriority::Normal, 0)).await;

        let summary = h.get_job_status.get_statistics().await.unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(summary.active, 1);
        assert_eq!(summary.terminal, 0);
        assert_eq!(summary.success_rate, 0.0);
    }

    #[test]
    fn success_rate_counts_completed_over_finished() {
        let summary = JobStatisticsSummary::from(JobStatistics {
            completed: 3,
            failed: 1,
            cancelled: 4,
            ..JobStatistics::default()
        });
        assert_eq!(summary.success_rate, 0.75);
        assert_eq!(summary.terminal, 8);
    }

    proptest! {
        #[test]
        fn summary_counts_add_up(
            pending in 0usize..50,
            queued in 0usize..50,
            running in 0usize..50,
            completed in 0usize..50,
            failed in 0usize..50,
            cancelled in 0usize..50,
        ) {
            let summary = JobStatisticsSummary::from(JobStatistics {
                pending, queued, running, completed, failed, cancelled,
            });
            prop_assert_eq!(summary.active + summary.terminal, summary.total);
            prop_assert!((0.0..=1.0).contains(&summary.success_rate));
            if completed + failed == 0 {
                prop_assert_eq!(summary.success_rate, 0.0);
            }
        }

        #[test]
        fn dedupe_never_returns_duplicates_or_blanks(ids in proptest::collection::vec("[ a-c]{0,3}", 0..20)) {
            let out = dedupe_ids(&ids);
            let unique: HashSet<_> = out.iter().collect();
            prop_assert_eq!(unique.len(), out.len());
            prop_assert!(out.iter().all(|id| !id.is_empty()));
        }
    }
}
