//! Remote status polling.
//!
//! The poller remembers every submitted run and periodically asks the engine for its status,
//! delivering terminal results into the job lifecycle. A run stops being tracked once its
//! result has been applied, or once the local job can no longer accept it.
//!
//! Storage is the shared record of submitted runs: every tick first picks up runs recorded
//! by other processes on the same database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tradeq_core::{JobId, JobStatus};

use super::{AnalysisEngineClient, AnalysisRun, RemoteRunStatus, RunStatusNotifier};
use crate::SharedJobRepository;
use crate::jobs::{JobLifecycle, LifecycleError};
use crate::repository::RepositoryError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct TrackedRun {
    run_id: String,
    thread_id: String,
}

pub struct StatusPoller {
    engine: Arc<dyn AnalysisEngineClient>,
    lifecycle: Arc<JobLifecycle>,
    tracked: Mutex<HashMap<JobId, TrackedRun>>,
}

impl StatusPoller {
    pub fn new(engine: Arc<dyn AnalysisEngineClient>, lifecycle: Arc<JobLifecycle>) -> Self {
        Self {
            engine,
            lifecycle,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    fn tracked(&self) -> MutexGuard<'_, HashMap<JobId, TrackedRun>> {
        self.tracked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked().len()
    }

    pub fn is_tracking(&self, id: &JobId) -> bool {
        self.tracked().contains_key(id)
    }

    /// Track every stored `queued` or `running` job that carries a remote run and is not
    /// tracked yet. Returns how many runs were newly picked up.
    pub async fn sync(&self, repository: &SharedJobRepository) -> Result<usize, RepositoryError> {
        let mut jobs = repository.get_by_status(JobStatus::Queued).await?;
        jobs.extend(repository.get_by_status(JobStatus::Running).await?);

        let mut map = self.tracked();
        let mut picked_up = 0;
        for job in &jobs {
            let Some((run_id, thread_id)) = job.remote_run() else {
                continue;
            };
            // Runs recorded in this process are newer than a storage read.
            if map.contains_key(job.id()) {
                continue;
            }
            map.insert(
                job.id().clone(),
                TrackedRun {
                    run_id: run_id.to_string(),
                    thread_id: thread_id.to_string(),
                },
            );
            debug!(job_id = %job.id(), run_id, "tracking stored remote run");
            picked_up += 1;
        }
        Ok(picked_up)
    }

    /// Poll every tracked run once. Returns how many runs were resolved.
    pub async fn poll_once(&self) -> usize {
        let snapshot: Vec<(JobId, TrackedRun)> = self
            .tracked()
            .iter()
            .map(|(id, run)| (id.clone(), run.clone()))
            .collect();

        let mut resolved = 0;
        for (id, tracked) in snapshot {
            let run = match self.engine.get_run(&tracked.thread_id, &tracked.run_id).await {
                Ok(run) => run,
                Err(err) => {
                    warn!(job_id = %id, run_id = %tracked.run_id, error = %err, "status poll failed");
                    continue;
                }
            };

            if self.apply(&id, &run).await {
                // A newer submission for the same job may have replaced this entry.
                let mut map = self.tracked();
                if map.get(&id) == Some(&tracked) {
                    map.remove(&id);
                }
                resolved += 1;
            }
        }
        resolved
    }

    /// Deliver one run status. Returns whether the run no longer needs polling.
    async fn apply(&self, id: &JobId, run: &AnalysisRun) -> bool {
        let result = match run.status {
            RemoteRunStatus::Pending => return false,
            RemoteRunStatus::Running => {
                return match self.lifecycle.mark_running(id).await {
                    Ok(_) | Err(LifecycleError::Transition(_)) => false,
                    Err(LifecycleError::NotFound(_)) => true,
                    Err(err) => {
                        warn!(job_id = %id, error = %err, "failed to apply running status");
                        false
                    }
                };
            }
            RemoteRunStatus::Success => {
                let result_id = run.result_id.as_deref().unwrap_or(&run.run_id);
                self.lifecycle.complete(id, result_id).await
            }
            RemoteRunStatus::Error | RemoteRunStatus::Timeout | RemoteRunStatus::Interrupted => {
                let error = run
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("remote run ended with status {:?}", run.status));
                self.lifecycle.fail(id, &error).await
            }
        };

        match result {
            Ok(job) => {
                debug!(job_id = %id, status = %job.status(), "remote status applied");
                true
            }
            Err(LifecycleError::NotFound(_) | LifecycleError::Transition(_)) => {
                debug!(job_id = %id, "job no longer accepts remote status; untracked");
                true
            }
            Err(err) => {
                warn!(job_id = %id, error = %err, "failed to apply remote status");
                false
            }
        }
    }

    /// Sync from `repository` and poll on a fixed interval until `shutdown` is cancelled.
    pub fn spawn(
        self: Arc<Self>,
        repository: SharedJobRepository,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "status poller started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.sync(&repository).await {
                            warn!(error = %err, "failed to load submitted runs");
                        }
                        if self.tracked_count() > 0 {
                            self.poll_once().await;
                        }
                    }
                }
            }
            info!("status poller stopped");
        })
    }
}

impl RunStatusNotifier for StatusPoller {
    fn on_analysis_submitted(&self, job_id: &JobId, run_id: &str, thread_id: &str) {
        self.tracked().insert(
            job_id.clone(),
            TrackedRun {
                run_id: run_id.to_string(),
                thread_id: thread_id.to_string(),
            },
        );
        debug!(job_id = %job_id, run_id, "tracking remote run");
    }
}

impl core::fmt::Debug for StatusPoller {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StatusPoller")
            .field("tracked", &self.tracked_count())
            .finish_non_exhaustive()
    }
}
