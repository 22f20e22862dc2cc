//! Job lifecycle events.

use serde::{Deserialize, Serialize};

use tradeq_core::{AnalysisJob, JobId};

/// A published fact.
///
/// Events are immutable values; `stream_key` identifies the stream whose ordering the bus
/// must preserve.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "job.queued").
    fn event_type(&self) -> &'static str;

    /// Ordering key: events with the same key are delivered in publication order.
    fn stream_key(&self) -> &str;
}

/// A job status transition, carrying the job snapshot taken right after the transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Queued {
        job: AnalysisJob,
    },
    Started {
        job: AnalysisJob,
    },
    Completed {
        job: AnalysisJob,
        result_id: String,
    },
    Failed {
        job: AnalysisJob,
        error_message: String,
        will_retry: bool,
    },
    Cancelled {
        job: AnalysisJob,
        reason: String,
    },
    Requeued {
        job: AnalysisJob,
        retry_attempt: u32,
    },
}

impl JobEvent {
    pub fn queued(job: AnalysisJob) -> Self {
        Self::Queued { job }
    }

    pub fn started(job: AnalysisJob) -> Self {
        Self::Started { job }
    }

    pub fn completed(job: AnalysisJob, result_id: impl Into<String>) -> Self {
        Self::Completed {
            job,
            result_id: result_id.into(),
        }
    }

    pub fn failed(job: AnalysisJob, error_message: impl Into<String>, will_retry: bool) -> Self {
        Self::Failed {
            job,
            error_message: error_message.into(),
            will_retry,
        }
    }

    pub fn cancelled(job: AnalysisJob, reason: impl Into<String>) -> Self {
        Self::Cancelled {
            job,
            reason: reason.into(),
        }
    }

    pub fn requeued(job: AnalysisJob) -> Self {
        let retry_attempt = job.retry_count();
        Self::Requeued { job, retry_attempt }
    }

    /// The job snapshot carried by the event.
    pub fn job(&self) -> &AnalysisJob {
        match self {
            JobEvent::Queued { job }
            | JobEvent::Started { job }
            | JobEvent::Completed { job, .. }
            | JobEvent::Failed { job, .. }
            | JobEvent::Cancelled { job, .. }
            | JobEvent::Requeued { job, .. } => job,
        }
    }

    pub fn job_id(&self) -> &JobId {
        self.job().id()
    }

    pub fn into_job(self) -> AnalysisJob {
        match self {
            JobEvent::Queued { job }
            | JobEvent::Started { job }
            | JobEvent::Completed { job, .. }
            | JobEvent::Failed { job, .. }
            | JobEvent::Cancelled { job, .. }
            | JobEvent::Requeued { job, .. } => job,
        }
    }
}

impl Event for JobEvent {
    fn event_type(&self) -> &'static str {
        match self {
            JobEvent::Queued { .. } => "job.queued",
            JobEvent::Started { .. } => "job.started",
            JobEvent::Completed { .. } => "job.completed",
            JobEvent::Failed { .. } => "job.failed",
            JobEvent::Cancelled { .. } => "job.cancelled",
            JobEvent::Requeued { .. } => "job.requeued",
        }
    }

    fn stream_key(&self) -> &str {
        self.job_id().as_str()
    }
}
