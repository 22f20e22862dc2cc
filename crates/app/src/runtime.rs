//! Component wiring.
//!
//! `QueueRuntime` owns one instance of every queue component and hands out the use cases.
//! Background work (dispatch worker, status poller, retry timers) only runs between
//! [`QueueRuntime::start`] and [`RunningQueue::shutdown`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tradeq_core::JobStatus;
use tradeq_events::{EventBus, InMemoryEventBus, JobEvent, Subscription};
use tradeq_infra::external::{
    AnalysisEngineClient, EngineSubmissionProcessor, HttpAnalysisEngineClient, StatusPoller,
};
use tradeq_infra::jobs::{
    JobLifecycle, JobLocks, PriorityQueueManager, ProcessorRegistry, QueueWorker,
    QueueWorkerHandle, RetryScheduler, WorkerStats,
};
use tradeq_infra::{SharedEventBus, SharedJobRepository, SqliteJobRepository};

use crate::clock::{Clock, SystemClock};
use crate::config::QueueConfig;
use crate::use_cases::{CancelJobUseCase, GetJobStatusUseCase, QueueAnalysisUseCase};
use crate::view_model::JobsViewModel;

pub struct QueueRuntime {
    config: QueueConfig,
    repository: SharedJobRepository,
    bus: Arc<InMemoryEventBus<JobEvent>>,
    engine: Arc<dyn AnalysisEngineClient>,
    queue: Arc<PriorityQueueManager>,
    retries: RetryScheduler,
    lifecycle: Arc<JobLifecycle>,
    registry: Arc<ProcessorRegistry>,
    poller: Arc<StatusPoller>,
    queue_analysis: Arc<QueueAnalysisUseCase>,
    get_job_status: Arc<GetJobStatusUseCase>,
    cancel_job: Arc<CancelJobUseCase>,
}

impl QueueRuntime {
    /// SQLite storage and the HTTP engine client from `config`.
    pub async fn connect(config: QueueConfig) -> Result<Self> {
        let repository = SqliteJobRepository::connect(&config.database_url)
            .await
            .with_context(|| format!("failed to open job database {}", config.database_url))?;
        let engine = HttpAnalysisEngineClient::new(config.engine_url.clone())
            .context("failed to build analysis engine client")?;

        Ok(Self::assemble(
            config,
            Arc::new(repository),
            Arc::new(engine),
            Arc::new(SystemClock),
        ))
    }

    /// Wire every component around the given storage, engine and clock.
    pub fn assemble(
        config: QueueConfig,
        repository: SharedJobRepository,
        engine: Arc<dyn AnalysisEngineClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let bus = Arc::new(InMemoryEventBus::<JobEvent>::new());
        let shared_bus: SharedEventBus = bus.clone();
        let locks = JobLocks::new();

        let queue = Arc::new(PriorityQueueManager::new(repository.clone()));
        let retries = RetryScheduler::new(
            repository.clone(),
            queue.clone(),
            shared_bus.clone(),
            config.retry_policy(),
            locks.clone(),
        );
        let lifecycle = Arc::new(JobLifecycle::new(
            repository.clone(),
            queue.clone(),
            retries.clone(),
            shared_bus.clone(),
            locks,
        ));
        let registry = Arc::new(ProcessorRegistry::new());
        let poller = Arc::new(StatusPoller::new(engine.clone(), lifecycle.clone()));

        let queue_analysis = Arc::new(
            QueueAnalysisUseCase::new(
                repository.clone(),
                queue.clone(),
                lifecycle.clone(),
                engine.clone(),
                poller.clone(),
                shared_bus,
                clock,
            )
            .with_max_retries(config.max_retries),
        );
        let get_job_status = Arc::new(GetJobStatusUseCase::new(repository.clone()));
        let cancel_job = Arc::new(CancelJobUseCase::new(
            repository.clone(),
            lifecycle.clone(),
            registry.clone(),
        ));

        Self {
            config,
            repository,
            bus,
            engine,
            queue,
            retries,
            lifecycle,
            registry,
            poller,
            queue_analysis,
            get_job_status,
            cancel_job,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn repository(&self) -> &SharedJobRepository {
        &self.repository
    }

    pub fn queue(&self) -> &Arc<PriorityQueueManager> {
        &self.queue
    }

    pub fn retries(&self) -> &RetryScheduler {
        &self.retries
    }

    pub fn lifecycle(&self) -> &Arc<JobLifecycle> {
        &self.lifecycle
    }

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    pub fn poller(&self) -> &Arc<StatusPoller> {
        &self.poller
    }

    pub fn queue_analysis(&self) -> &Arc<QueueAnalysisUseCase> {
        &self.queue_analysis
    }

    pub fn get_job_status(&self) -> &Arc<GetJobStatusUseCase> {
        &self.get_job_status
    }

    pub fn cancel_job(&self) -> &Arc<CancelJobUseCase> {
        &self.cancel_job
    }

    pub fn subscribe(&self) -> Subscription<JobEvent> {
        self.bus.subscribe()
    }

    pub fn view_model(&self) -> JobsViewModel {
        JobsViewModel::new(
            self.queue_analysis.clone(),
            self.get_job_status.clone(),
            self.cancel_job.clone(),
            self.subscribe(),
        )
    }

    /// Restore persisted work and start the worker and status poller.
    ///
    /// `queued` jobs not yet accepted by the engine go back into the ready set. Jobs with a
    /// remote run are polled again. Retryable `failed` jobs get a fresh retry timer.
    pub async fn start(&self) -> Result<RunningQueue> {
        let requeued = self
            .queue
            .rehydrate()
            .await
            .context("failed to restore queued jobs")?;
        let polling = self
            .poller
            .sync(&self.repository)
            .await
            .context("failed to resume status polling")?;
        let retrying = self.resume_retries().await?;
        info!(requeued, polling, retrying, "queue state restored");

        let processor = Arc::new(EngineSubmissionProcessor::new(
            self.engine.clone(),
            self.poller.clone(),
        ));
        let worker = QueueWorker::new(
            self.queue.clone(),
            self.lifecycle.clone(),
            self.registry.clone(),
            processor,
        )
        .spawn(self.config.worker_config());

        let shutdown = CancellationToken::new();
        let poller = self
            .poller
            .clone()
            .spawn(
                self.repository.clone(),
                self.config.status_poll_interval,
                shutdown.clone(),
            );

        Ok(RunningQueue {
            worker,
            poller,
            shutdown,
            retries: self.retries.clone(),
        })
    }

    async fn resume_retries(&self) -> Result<usize> {
        let failed = self
            .repository
            .get_by_status(JobStatus::Failed)
            .await
            .context("failed to load failed jobs")?;

        let mut armed = 0;
        for job in failed.iter().filter(|job| job.is_retryable()) {
            match self.retries.schedule_retry(job) {
                Ok(_) => armed += 1,
                Err(err) => warn!(job_id = %job.id(), error = %err, "retry not resumed"),
            }
        }
        Ok(armed)
    }
}

impl core::fmt::Debug for QueueRuntime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueueRuntime")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Background tasks started by [`QueueRuntime::start`].
#[derive(Debug)]
pub struct RunningQueue {
    worker: QueueWorkerHandle,
    poller: JoinHandle<()>,
    shutdown: CancellationToken,
    retries: RetryScheduler,
}

impl RunningQueue {
    pub fn worker_stats(&self) -> WorkerStats {
        self.worker.stats()
    }

    /// Stop dispatching, stop polling and disarm retry timers.
    ///
    /// Disarmed retries are re-armed by the next `start`.
    pub async fn shutdown(self) {
        self.worker.shutdown().await;
        self.shutdown.cancel();
        if let Err(err) = self.poller.await {
            error!(error = %err, "status poller ended abnormally");
        }
        let disarmed = self.retries.cancel_all();
        info!(disarmed, "queue stopped");
    }
}
