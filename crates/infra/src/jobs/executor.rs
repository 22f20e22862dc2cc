//! Queue worker: pulls ready jobs and hands them to a processor.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use tradeq_core::{AnalysisJob, JobId};

use super::cancellation::ProcessorRegistry;
use super::lifecycle::{JobLifecycle, LifecycleError};
use super::queue::{PriorityQueueManager, QueueError};

/// What a processor made of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Finished locally with a result reference.
    Completed { result_id: String },
    /// Failed; the lifecycle decides whether to retry.
    Failed { error: String },
    /// Handed to the analysis engine; the terminal status arrives later.
    Submitted { run_id: String, thread_id: String },
    /// Stopped at a checkpoint after cancellation was requested.
    Cancelled,
}

/// Does the work for one running job.
///
/// `cancel` is tripped when cancellation of the job is requested; processors check it at
/// their checkpoints and return [`ProcessOutcome::Cancelled`].
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &AnalysisJob, cancel: CancellationToken) -> ProcessOutcome;
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Queue worker configuration.
#[derive(Debug, Clone)]
pub struct QueueWorkerConfig {
    /// Name for logging
    pub name: String,
    /// Maximum concurrent dispatches
    pub max_concurrent: usize,
    /// How long to idle when the queue is empty and no enqueue wakes the worker
    pub poll_interval: Duration,
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            name: "queue-worker".to_string(),
            max_concurrent: 2,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl QueueWorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_dispatched: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_submitted: u64,
    pub jobs_cancelled: u64,
    /// Dequeued but no longer runnable (e.g. cancelled in between).
    pub jobs_skipped: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Dispatches ready jobs. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct QueueWorker {
    queue: Arc<PriorityQueueManager>,
    lifecycle: Arc<JobLifecycle>,
    registry: Arc<ProcessorRegistry>,
    processor: Arc<dyn JobProcessor>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<PriorityQueueManager>,
        lifecycle: Arc<JobLifecycle>,
        registry: Arc<ProcessorRegistry>,
        processor: Arc<dyn JobProcessor>,
    ) -> Self {
        Self {
            queue,
            lifecycle,
            registry,
            processor,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    fn stats_mut(&self) -> MutexGuard<'_, WorkerStats> {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats_mut().clone()
    }

    /// Dispatch the next ready job, if any, and wait for it (for tests or synchronous use).
    pub async fn run_once(&self) -> Result<Option<JobId>, WorkerError> {
        let Some(job) = self.queue.dequeue().await? else {
            return Ok(None);
        };
        let id = job.id().clone();
        self.dispatch(job).await?;
        Ok(Some(id))
    }

    /// Run one dequeued job: mark it running, call the processor with a registered
    /// cancellation token, then route the outcome through the lifecycle.
    ///
    /// Returns `None` when the job stopped being runnable between dequeue and dispatch.
    pub async fn dispatch(&self, job: AnalysisJob) -> Result<Option<ProcessOutcome>, WorkerError> {
        let id = job.id().clone();

        let running = match self.lifecycle.mark_running(&id).await {
            Ok(running) => running,
            Err(LifecycleError::Transition(err)) => {
                debug!(job_id = %id, error = %err, "job no longer runnable; skipped");
                self.stats_mut().jobs_skipped += 1;
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let registration = self.registry.register(&id);
        {
            let mut stats = self.stats_mut();
            stats.jobs_dispatched += 1;
            stats.current_running += 1;
        }
        debug!(job_id = %id, ticker = %running.ticker(), priority = %running.priority(), "dispatching job");

        let outcome = self.processor.process(&running, registration.token()).await;
        drop(registration);

        let applied = self.apply(&id, &outcome).await;

        let mut stats = self.stats_mut();
        stats.current_running = stats.current_running.saturating_sub(1);
        match (&outcome, &applied) {
            (_, Err(_)) => stats.jobs_failed += 1,
            (ProcessOutcome::Completed { .. }, Ok(())) => stats.jobs_completed += 1,
            (ProcessOutcome::Failed { .. }, Ok(())) => stats.jobs_failed += 1,
            (ProcessOutcome::Submitted { .. }, Ok(())) => stats.jobs_submitted += 1,
            (ProcessOutcome::Cancelled, Ok(())) => stats.jobs_cancelled += 1,
        }
        drop(stats);

        applied.map(|()| Some(outcome))
    }

    async fn apply(&self, id: &JobId, outcome: &ProcessOutcome) -> Result<(), WorkerError> {
        match outcome {
            ProcessOutcome::Completed { result_id } => {
                self.lifecycle.complete(id, result_id).await?;
            }
            ProcessOutcome::Failed { error } => {
                self.lifecycle.fail(id, error).await?;
            }
            ProcessOutcome::Submitted { run_id, thread_id } => {
                self.lifecycle
                    .record_submission(id, run_id, thread_id, true)
                    .await?;
            }
            ProcessOutcome::Cancelled => {
                self.lifecycle.cancel(id, "cancelled while running").await?;
            }
        }
        Ok(())
    }

    /// Spawn the dispatch loop on the current tokio runtime.
    pub fn spawn(self, config: QueueWorkerConfig) -> QueueWorkerHandle {
        let shutdown = CancellationToken::new();
        let stats = self.stats.clone();
        let join = tokio::spawn(worker_loop(self, config, shutdown.clone()));

        QueueWorkerHandle {
            shutdown,
            join: Some(join),
            stats,
        }
    }
}

impl core::fmt::Debug for QueueWorker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueueWorker")
            .field("queue", &self.queue)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct QueueWorkerHandle {
    shutdown: CancellationToken,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl QueueWorkerHandle {
    /// Stop taking new jobs and wait for in-flight dispatches to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                error!(error = %err, "queue worker task ended abnormally");
            }
        }
    }

    /// Get current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }
}

async fn worker_loop(worker: QueueWorker, config: QueueWorkerConfig, shutdown: CancellationToken) {
    let max_concurrent = config.max_concurrent.max(1);
    info!(worker = %config.name, max_concurrent, "queue worker started");
    let started = Instant::now();
    let slots = Arc::new(Semaphore::new(max_concurrent));

    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        worker.stats_mut().uptime_secs = started.elapsed().as_secs();

        // Not raced against shutdown: a dequeue interrupted after the pop would drop the job
        // from the ready set.
        match worker.queue.dequeue().await {
            Ok(Some(job)) => {
                let worker = worker.clone();
                tokio::spawn(async move {
                    let id = job.id().clone();
                    if let Err(err) = worker.dispatch(job).await {
                        error!(job_id = %id, error = %err, "job dispatch failed");
                    }
                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = worker.queue.notified() => {}
                    _ = tokio::time::sleep(config.poll_interval) => {}
                }
            }
            Err(err) => {
                drop(permit);
                error!(worker = %config.name, error = %err, "failed to dequeue job");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(config.poll_interval) => {}
                }
            }
        }
    }

    // Wait for in-flight dispatches.
    let _ = slots.acquire_many(max_concurrent as u32).await;
    info!(worker = %config.name, "queue worker stopped");
}
