//! Reactive adapter for presentation code.
//!
//! The view-model keeps a local snapshot of every job, fed by the event bus, and talks to the
//! queue only through the use cases.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use tradeq_core::{AnalysisJob, JobId, JobPriority, JobStatus};
use tradeq_events::{JobEvent, Subscription};
use tradeq_infra::jobs::JobStatistics;

use crate::error::UseCaseError;
use crate::use_cases::{CancelJobUseCase, GetJobStatusUseCase, JobFilter, QueueAnalysisUseCase};

pub struct JobsViewModel {
    queue_analysis: Arc<QueueAnalysisUseCase>,
    get_job_status: Arc<GetJobStatusUseCase>,
    cancel_job: Arc<CancelJobUseCase>,
    events: Subscription<JobEvent>,
    jobs: HashMap<JobId, AnalysisJob>,
    loading: bool,
    last_error: Option<String>,
}

impl JobsViewModel {
    pub fn new(
        queue_analysis: Arc<QueueAnalysisUseCase>,
        get_job_status: Arc<GetJobStatusUseCase>,
        cancel_job: Arc<CancelJobUseCase>,
        events: Subscription<JobEvent>,
    ) -> Self {
        Self {
            queue_analysis,
            get_job_status,
            cancel_job,
            events,
            jobs: HashMap::new(),
            loading: false,
            last_error: None,
        }
    }

    /// Reload every job from storage. Events already buffered are superseded.
    pub async fn refresh(&mut self) {
        self.loading = true;
        self.events.drain();
        match self.get_job_status.get_all(&JobFilter::default()).await {
            Ok(jobs) => {
                self.jobs = jobs
                    .into_iter()
                    .map(|job| (job.id().clone(), job))
                    .collect();
            }
            Err(err) => self.record_error(&err),
        }
        self.loading = false;
    }

    /// Apply every buffered lifecycle event. Returns how many were applied.
    pub fn apply_events(&mut self) -> usize {
        let events = self.events.drain();
        let applied = events.len();
        for event in events {
            let job = event.into_job();
            self.jobs.insert(job.id().clone(), job);
        }
        if applied > 0 {
            debug!(applied, "view-model updated from events");
        }
        applied
    }

    /// Submit a request. Failures land in [`Self::last_error`].
    pub async fn submit(
        &mut self,
        ticker: &str,
        trade_date: &str,
        priority: JobPriority,
    ) -> Option<AnalysisJob> {
        self.loading = true;
        let result = self
            .queue_analysis
            .execute(ticker, trade_date, priority)
            .await;
        self.loading = false;

        match result {
            Ok(job) => {
                self.last_error = None;
                self.jobs.insert(job.id().clone(), job.clone());
                Some(job)
            }
            Err(err) => {
                self.record_error(&err);
                // A failed submission still leaves a visible job behind.
                self.apply_events();
                None
            }
        }
    }

    /// Cancel one job. Returns whether it was cancelled.
    pub async fn cancel(&mut self, id: &str) -> bool {
        match self.cancel_job.execute(id).await {
            Ok(cancelled) => {
                self.apply_events();
                cancelled
            }
            Err(err) => {
                self.record_error(&err);
                false
            }
        }
    }

    /// Pending, queued and running jobs, highest priority first, newest first within a tier.
    pub fn active_jobs(&self) -> Vec<AnalysisJob> {
        let mut jobs: Vec<AnalysisJob> = self
            .jobs
            .values()
            .filter(|job| job.status().is_active())
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (Reverse(job.priority()), Reverse(job.created_at())));
        jobs
    }

    pub fn completed_jobs(&self) -> Vec<AnalysisJob> {
        self.with_status(JobStatus::Completed)
    }

    pub fn failed_jobs(&self) -> Vec<AnalysisJob> {
        self.with_status(JobStatus::Failed)
    }

    pub fn counts(&self) -> JobStatistics {
        JobStatistics::from_jobs(self.jobs.values())
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    fn with_status(&self, status: JobStatus) -> Vec<AnalysisJob> {
        let mut jobs: Vec<AnalysisJob> = self
            .jobs
            .values()
            .filter(|job| job.status() == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| Reverse(job.created_at()));
        jobs
    }

    fn record_error(&mut self, err: &UseCaseError) {
        self.last_error = Some(err.user_message());
    }
}
