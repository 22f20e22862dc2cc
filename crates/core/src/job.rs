//! The analysis job record and its status state machine.
//!
//! `AnalysisJob` is an immutable value: every transition returns an updated copy and leaves
//! the original untouched. Transitions outside the table below are rejected with a
//! [`TransitionError`] and never applied.
//!
//! ```text
//! pending ──► queued ──► running ──► completed
//!    │          ▲  │        │
//!    │          │  │        └──────► failed ──(retry_count < max_retries)──► queued
//!    └──────────┴──┴───────────────► cancelled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, TransitionError};
use crate::id::JobId;
use crate::value_object::{Ticker, TradeDate};

/// Retry ceiling used when no policy supplies one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet persisted into the queue.
    Pending,
    /// Waiting in the ready set for dispatch.
    Queued,
    /// Dispatched; the analysis is in flight.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error (may still be retried).
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// `pending`, `queued` or `running`.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Queued | JobStatus::Running)
    }

    /// `completed`, `failed` or `cancelled`.
    pub fn is_finished(&self) -> bool {
        !self.is_active()
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::unknown_variant("job status", s))
    }
}

/// Dispatch priority tier, ordered `Low < Normal < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl JobPriority {
    pub const ALL: [JobPriority; 4] = [
        JobPriority::Low,
        JobPriority::Normal,
        JobPriority::High,
        JobPriority::Critical,
    ];

    /// Numeric rank; higher dispatches first.
    pub fn rank(&self) -> u8 {
        match self {
            JobPriority::Low => 0,
            JobPriority::Normal => 1,
            JobPriority::High => 2,
            JobPriority::Critical => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
            JobPriority::Critical => "critical",
        }
    }
}

impl core::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for JobPriority {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobPriority::ALL
            .into_iter()
            .find(|priority| priority.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::unknown_variant("job priority", s))
    }
}

/// One requested analysis, tracked through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisJob {
    id: JobId,
    ticker: Ticker,
    trade_date: TradeDate,
    status: JobStatus,
    priority: JobPriority,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    result_id: Option<String>,
    error_message: Option<String>,
    retry_count: u32,
    max_retries: u32,
    /// Remote run identifier assigned by the analysis engine.
    run_id: Option<String>,
    /// Remote thread identifier assigned by the analysis engine.
    thread_id: Option<String>,
}

impl AnalysisJob {
    /// Create a new `pending` job with a freshly generated id.
    pub fn new(ticker: Ticker, trade_date: TradeDate, priority: JobPriority) -> Self {
        Self {
            id: JobId::generate(),
            ticker,
            trade_date,
            status: JobStatus::Pending,
            priority,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result_id: None,
            error_message: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            run_id: None,
            thread_id: None,
        }
    }

    /// Use an explicit id (imports, deterministic tests).
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    /// Set the retry ceiling supplied by the retry policy.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self.retry_count = self.retry_count.min(max_retries);
        self
    }

    /// Override the creation timestamp. Only meaningful before the job is persisted.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn ticker(&self) -> &Ticker {
        &self.ticker
    }

    pub fn trade_date(&self) -> TradeDate {
        self.trade_date
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn result_id(&self) -> Option<&str> {
        self.result_id.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// `(run_id, thread_id)` of the current attempt, once the engine has accepted it.
    pub fn remote_run(&self) -> Option<(&str, &str)> {
        self.run_id().zip(self.thread_id())
    }

    /// Failed with retries left; expected to be requeued rather than left terminal.
    pub fn is_retryable(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count < self.max_retries
    }

    /// No further automatic transitions: completed, cancelled, or failed with no retries left.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            JobStatus::Completed | JobStatus::Cancelled => true,
            JobStatus::Failed => !self.is_retryable(),
            _ => false,
        }
    }

    /// Whether the state machine allows moving to `target` from the current status.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        match (self.status, target) {
            (Pending, Queued) | (Queued, Running) | (Running, Completed) | (Running, Failed) => {
                true
            }
            (Pending | Queued | Running, Cancelled) => true,
            (Failed, Queued) => self.retry_count < self.max_retries,
            _ => false,
        }
    }

    fn guard(&self, target: JobStatus) -> Result<(), TransitionError> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                to: target,
            })
        }
    }

    /// `pending → queued`, after the record is persisted locally.
    pub fn mark_queued(&self) -> Result<Self, TransitionError> {
        self.guard(JobStatus::Queued)?;
        if self.status == JobStatus::Failed {
            return Err(TransitionError {
                from: self.status,
                to: JobStatus::Queued,
            });
        }
        Ok(Self {
            status: JobStatus::Queued,
            ..self.clone()
        })
    }

    /// `queued → running`, when a worker takes the job.
    pub fn mark_running(&self, at: DateTime<Utc>) -> Result<Self, TransitionError> {
        self.guard(JobStatus::Running)?;
        Ok(Self {
            status: JobStatus::Running,
            started_at: Some(at),
            ..self.clone()
        })
    }

    /// `running → completed`, recording the engine's result reference.
    pub fn mark_completed(
        &self,
        result_id: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<Self, TransitionError> {
        self.guard(JobStatus::Completed)?;
        Ok(Self {
            status: JobStatus::Completed,
            result_id: Some(result_id.into()),
            completed_at: Some(at),
            ..self.clone()
        })
    }

    /// `running → failed`, recording the error.
    pub fn mark_failed(
        &self,
        error: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<Self, TransitionError> {
        self.guard(JobStatus::Failed)?;
        Ok(Self {
            status: JobStatus::Failed,
            error_message: Some(error.into()),
            completed_at: Some(at),
            ..self.clone()
        })
    }

    /// `failed → queued` for another attempt.
    ///
    /// Clears the per-attempt fields, including the previous remote run, and increments
    /// `retry_count`. Rejected once `retry_count` has reached `max_retries`.
    pub fn mark_requeued(&self) -> Result<Self, TransitionError> {
        if self.status != JobStatus::Failed {
            return Err(TransitionError {
                from: self.status,
                to: JobStatus::Queued,
            });
        }
        self.guard(JobStatus::Queued)?;
        Ok(Self {
            status: JobStatus::Queued,
            started_at: None,
            completed_at: None,
            error_message: None,
            run_id: None,
            thread_id: None,
            retry_count: self.retry_count + 1,
            ..self.clone()
        })
    }

    /// `{pending, queued, running} → cancelled`.
    pub fn mark_cancelled(&self, at: DateTime<Utc>) -> Result<Self, TransitionError> {
        self.guard(JobStatus::Cancelled)?;
        Ok(Self {
            status: JobStatus::Cancelled,
            completed_at: Some(at),
            ..self.clone()
        })
    }

    /// Attach the engine's run/thread identifiers. Status is unchanged.
    pub fn with_remote_run(&self, run_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            thread_id: Some(thread_id.into()),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn test_job() -> AnalysisJob {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        AnalysisJob::new(
            Ticker::parse("AAPL").unwrap(),
            TradeDate::parse("2024-01-20", today).unwrap(),
            JobPriority::Normal,
        )
    }

    fn failed_job(retry_count: u32, max_retries: u32) -> AnalysisJob {
        let mut job = test_job().with_max_retries(max_retries).mark_queued().unwrap();
        for _ in 0..retry_count {
            job = job
                .mark_running(Utc::now())
                .unwrap()
                .mark_failed("boom", Utc::now())
                .unwrap()
                .mark_requeued()
                .unwrap();
        }
        job.mark_running(Utc::now())
            .unwrap()
            .mark_failed("boom", Utc::now())
            .unwrap()
    }

    #[test]
    fn new_job_starts_pending_with_defaults() {
        let job = test_job();
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.retry_count(), 0);
        assert_eq!(job.max_retries(), DEFAULT_MAX_RETRIES);
        assert!(job.started_at().is_none());
        assert!(job.completed_at().is_none());
    }

    #[test]
    fn happy_path_lifecycle() {
        let job = test_job();
        let queued = job.mark_queued().unwrap();
        let running = queued.mark_running(Utc::now()).unwrap();
        assert!(running.started_at().is_some());

        let done = running.mark_completed("result-1", Utc::now()).unwrap();
        assert_eq!(done.status(), JobStatus::Completed);
        assert_eq!(done.result_id(), Some("result-1"));
        assert!(done.completed_at().is_some());
        assert!(done.is_terminal());

        // Copy-on-write: the original is untouched.
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(done.created_at(), job.created_at());
    }

    #[test]
    fn failure_sets_error_and_completion_time() {
        let failed = failed_job(0, 3);
        assert_eq!(failed.status(), JobStatus::Failed);
        assert_eq!(failed.error_message(), Some("boom"));
        assert!(failed.completed_at().is_some());
        assert!(failed.is_retryable());
        assert!(!failed.is_terminal());
    }

    #[test]
    fn requeue_resets_attempt_fields_and_counts_retry() {
        let failed = failed_job(2, 3).with_remote_run("run-7", "thread-7");
        assert_eq!(failed.retry_count(), 2);

        let requeued = failed.mark_requeued().unwrap();
        assert_eq!(requeued.status(), JobStatus::Queued);
        assert_eq!(requeued.retry_count(), 3);
        assert!(requeued.error_message().is_none());
        assert!(requeued.started_at().is_none());
        assert!(requeued.completed_at().is_none());
        assert!(requeued.remote_run().is_none());

        let failed_again = requeued
            .mark_running(Utc::now())
            .unwrap()
            .mark_failed("boom again", Utc::now())
            .unwrap();
        assert!(!failed_again.is_retryable());
        assert!(failed_again.is_terminal());
        assert_eq!(
            failed_again.mark_requeued(),
            Err(TransitionError {
                from: JobStatus::Failed,
                to: JobStatus::Queued,
            })
        );
    }

    #[test]
    fn cancellation_only_from_active_states() {
        let pending = test_job();
        assert!(pending.mark_cancelled(Utc::now()).is_ok());

        let queued = pending.mark_queued().unwrap();
        let cancelled = queued.mark_cancelled(Utc::now()).unwrap();
        assert!(cancelled.completed_at().is_some());
        assert!(cancelled.mark_cancelled(Utc::now()).is_err());

        let running = queued.mark_running(Utc::now()).unwrap();
        assert!(running.mark_cancelled(Utc::now()).is_ok());

        let completed = running.mark_completed("r", Utc::now()).unwrap();
        assert!(completed.mark_cancelled(Utc::now()).is_err());
        assert!(failed_job(0, 3).mark_cancelled(Utc::now()).is_err());
    }

    #[test]
    fn unlisted_transitions_are_rejected() {
        let pending = test_job();
        assert!(pending.mark_running(Utc::now()).is_err());
        assert!(pending.mark_completed("r", Utc::now()).is_err());
        assert!(pending.mark_failed("e", Utc::now()).is_err());
        assert!(pending.mark_requeued().is_err());

        let queued = pending.mark_queued().unwrap();
        assert!(queued.mark_queued().is_err());
        assert!(queued.mark_completed("r", Utc::now()).is_err());
        assert!(failed_job(0, 3).mark_queued().is_err());
    }

    #[test]
    fn remote_run_ids_do_not_change_status() {
        let queued = test_job().mark_queued().unwrap();
        let tagged = queued.with_remote_run("run-123", "thread-9");
        assert_eq!(tagged.status(), JobStatus::Queued);
        assert_eq!(tagged.run_id(), Some("run-123"));
        assert_eq!(tagged.thread_id(), Some("thread-9"));
        assert_eq!(tagged.remote_run(), Some(("run-123", "thread-9")));
        assert!(queued.remote_run().is_none());
    }

    #[test]
    fn priority_and_status_parse_case_insensitively() {
        assert_eq!("HIGH".parse::<JobPriority>().unwrap(), JobPriority::High);
        assert_eq!("cancelled".parse::<JobStatus>().unwrap(), JobStatus::Cancelled);
        assert!("urgent".parse::<JobPriority>().is_err());
        assert!(JobPriority::Low < JobPriority::Normal);
        assert!(JobPriority::High < JobPriority::Critical);
    }

    #[test]
    fn serde_round_trip_preserves_every_field() {
        let job = failed_job(1, 3).with_remote_run("run-1", "thread-1");
        let json = serde_json::to_string(&job).unwrap();
        let back: AnalysisJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: however many failures occur, a job is requeued at most `max_retries`
        /// times and `retry_count` never exceeds the ceiling.
        #[test]
        fn retry_count_never_exceeds_ceiling(max_retries in 0u32..6, failures in 0u32..10) {
            let mut job = test_job().with_max_retries(max_retries).mark_queued().unwrap();
            let mut requeues = 0;

            for _ in 0..failures {
                job = job
                    .mark_running(Utc::now())
                    .unwrap()
                    .mark_failed("boom", Utc::now())
                    .unwrap();
                match job.mark_requeued() {
                    Ok(next) => {
                        requeues += 1;
                        job = next;
                    }
                    Err(_) => break,
                }
                prop_assert!(job.retry_count() <= job.max_retries());
            }

            prop_assert!(requeues <= max_retries);
            prop_assert!(job.retry_count() <= job.max_retries());
        }
    }
}
