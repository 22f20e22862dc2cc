use std::sync::Arc;

use tracing::{info, instrument, warn};

use tradeq_core::{AnalysisJob, DEFAULT_MAX_RETRIES, JobPriority, Ticker, TradeDate};
use tradeq_events::JobEvent;
use tradeq_infra::external::{AnalysisEngineClient, RemoteRunStatus, RunStatusNotifier};
use tradeq_infra::jobs::{JobLifecycle, PriorityQueueManager};
use tradeq_infra::{SharedEventBus, SharedJobRepository, publish_event};

use crate::clock::Clock;
use crate::error::{UseCaseError, UseCaseResult};

/// One request in a batch submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub ticker: String,
    pub trade_date: String,
    pub priority: JobPriority,
}

impl AnalysisRequest {
    pub fn new(ticker: impl Into<String>, trade_date: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            trade_date: trade_date.into(),
            priority: JobPriority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Validates a request, persists the job and submits it to the analysis engine.
///
/// The job is stored before any remote call. A failed submission leaves it `queued` and
/// visible; the engine, not this use case, decides whether a request is a duplicate.
pub struct QueueAnalysisUseCase {
    repository: SharedJobRepository,
    queue: Arc<PriorityQueueManager>,
    lifecycle: Arc<JobLifecycle>,
    engine: Arc<dyn AnalysisEngineClient>,
    notifier: Arc<dyn RunStatusNotifier>,
    bus: SharedEventBus,
    clock: Arc<dyn Clock>,
    max_retries: u32,
}

impl QueueAnalysisUseCase {
    pub fn new(
        repository: SharedJobRepository,
        queue: Arc<PriorityQueueManager>,
        lifecycle: Arc<JobLifecycle>,
        engine: Arc<dyn AnalysisEngineClient>,
        notifier: Arc<dyn RunStatusNotifier>,
        bus: SharedEventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            queue,
            lifecycle,
            engine,
            notifier,
            bus,
            clock,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Retry ceiling stamped on new jobs.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[instrument(skip(self))]
    pub async fn execute(
        &self,
        ticker: &str,
        trade_date: &str,
        priority: JobPriority,
    ) -> UseCaseResult<AnalysisJob> {
        let ticker = Ticker::parse(ticker)?;
        let trade_date = TradeDate::parse(trade_date, self.clock.today())?;

        let job = AnalysisJob::new(ticker, trade_date, priority)
            .with_max_retries(self.max_retries)
            .mark_queued()?;
        self.repository.save(&job).await?;
        info!(job_id = %job.id(), ticker = %job.ticker(), "analysis job queued");

        // Published before the job is dequeueable so `job.queued` leads its stream.
        publish_event(&self.bus, JobEvent::queued(job.clone()));
        let job = self.queue.enqueue(&job).await?;

        // A worker may have claimed it already; it then owns the submission.
        let Some(job) = self.queue.take(job.id()).await? else {
            return Ok(self
                .repository
                .get_by_id(job.id())
                .await?
                .unwrap_or(job));
        };

        let run = match self.engine.start_analysis(job.ticker(), job.trade_date()).await {
            Ok(run) => run,
            Err(source) => {
                warn!(job_id = %job.id(), error = %source, "engine submission failed");
                return Err(UseCaseError::Submission {
                    id: job.id().clone(),
                    source,
                });
            }
        };

        let remote_running = run.status != RemoteRunStatus::Pending;
        let job = self
            .lifecycle
            .record_submission(job.id(), &run.run_id, &run.thread_id, remote_running)
            .await?;
        self.notifier
            .on_analysis_submitted(job.id(), &run.run_id, &run.thread_id);

        Ok(job)
    }

    /// Submit each request independently; one failure does not affect the others.
    pub async fn execute_batch(
        &self,
        requests: Vec<AnalysisRequest>,
    ) -> Vec<UseCaseResult<AnalysisJob>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(
                self.execute(&request.ticker, &request.trade_date, request.priority)
                    .await,
            );
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use tradeq_core::{JobStatus, ValidationError};
    use tradeq_events::Event;
    use tradeq_infra::JobRepository;
    use tradeq_infra::external::EngineError;

    #[tokio::test]
    async fn valid_request_is_persisted_and_submitted() {
        let h = Harness::new();

        let job = h
            .queue_analysis
            .execute("aapl", "2024-01-20", JobPriority::Normal)
            .await
            .unwrap();

        assert_eq!(job.ticker().as_str(), "AAPL");
        assert_eq!(job.status(), JobStatus::Running);
        assert_eq!(job.run_id(), Some("run-1"));
        assert_eq!(h.stored(job.id()).await, job);
        assert!(h.poller.is_tracking(job.id()));
        assert_eq!(h.queue.ready_len(), 0);
    }

    #[tokio::test]
    async fn queued_event_precedes_the_submission_events() {
        let h = Harness::new();
        let events = h.runtime.subscribe();

        let job = h
            .queue_analysis
            .execute("AAPL", "2024-01-20", JobPriority::Normal)
            .await
            .unwrap();

        let kinds: Vec<_> = events
            .drain()
            .iter()
            .filter(|event| event.job_id() == job.id())
            .map(|event| event.event_type())
            .collect();
        assert_eq!(kinds, ["job.queued", "job.started"]);
    }

    #[tokio::test]
    async fn pending_remote_run_keeps_job_queued() {
        let h = Harness::with_engine_status(RemoteRunStatus::Pending);

        let job = h
            .queue_analysis
            .execute("MSFT", "2024-01-20", JobPriority::High)
            .await
            .unwrap();

        assert_eq!(job.status(), JobStatus::Queued);
        assert_eq!(job.run_id(), Some("run-1"));
    }

    #[tokio::test]
    async fn invalid_input_never_touches_storage() {
        let h = Harness::new();

        let err = h
            .queue_analysis
            .execute("AAPL!", "2024-01-20", JobPriority::Normal)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UseCaseError::Validation(ValidationError::TickerNotAlphanumeric(_))
        ));

        let err = h
            .queue_analysis
            .execute("AAPL", "2099-01-01", JobPriority::Normal)
            .await
            .unwrap_err();
        assert_eq!(
            match err {
                UseCaseError::Validation(v) => v.field(),
                other => panic!("unexpected error: {other}"),
            },
            "trade_date"
        );

        assert!(h.repo.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn submission_failure_keeps_the_local_record() {
        let h = Harness::new();
        h.engine.fail_next_submission(EngineError::Transport("connection refused".into()));

        let err = h
            .queue_analysis
            .execute("AAPL", "2024-01-20", JobPriority::Normal)
            .await
            .unwrap_err();

        let UseCaseError::Submission { id, .. } = err else {
            panic!("expected a submission error");
        };
        let stored = h.stored(&id).await;
        assert_eq!(stored.status(), JobStatus::Queued);
        assert!(stored.run_id().is_none());
        assert!(!h.queue.contains(&id));
    }

    #[tokio::test]
    async fn duplicate_requests_are_all_accepted() {
        let h = Harness::new();

        let first = h
            .queue_analysis
            .execute("AAPL", "2024-01-20", JobPriority::Normal)
            .await
            .unwrap();
        let second = h
            .queue_analysis
            .execute("AAPL", "2024-01-20", JobPriority::Normal)
            .await
            .unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(h.engine.submissions().len(), 2);
    }

    #[tokio::test]
    async fn batch_elements_succeed_or_fail_independently() {
        let h = Harness::new();

        let results = h
            .queue_analysis
            .execute_batch(vec![
                AnalysisRequest::new("AAPL", "2024-01-20"),
                AnalysisRequest::new("", "2024-01-20"),
                AnalysisRequest::new("NVDA", "2024-01-19").with_priority(JobPriority::Critical),
            ])
            .await;

        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(UseCaseError::Validation(ValidationError::EmptyTicker))
        ));
        assert_eq!(
            results[2].as_ref().unwrap().priority(),
            JobPriority::Critical
        );
        assert_eq!(h.repo.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn new_jobs_carry_the_configured_retry_ceiling() {
        let h = Harness::new();
        let use_case = h.queue_analysis_with_max_retries(5);

        let job = use_case
            .execute("AAPL", "2024-01-20", JobPriority::Low)
            .await
            .unwrap();

        assert_eq!(job.max_retries(), 5);
    }
}
