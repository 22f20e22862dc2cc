//! Analysis engine adapter.
//!
//! The queue only needs two things from the remote engine: a way to start a run for a
//! ticker/date, and a way to read a run's status later. Everything else about the engine is
//! opaque.

pub mod http;
pub mod in_memory;
pub mod poller;
pub mod processor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tradeq_core::{JobId, Ticker, TradeDate};

pub use http::HttpAnalysisEngineClient;
pub use in_memory::InMemoryAnalysisEngine;
pub use poller::StatusPoller;
pub use processor::EngineSubmissionProcessor;

/// Status of a remote run as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteRunStatus {
    Pending,
    Running,
    Success,
    Error,
    Timeout,
    Interrupted,
}

impl RemoteRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RemoteRunStatus::Success
                | RemoteRunStatus::Error
                | RemoteRunStatus::Timeout
                | RemoteRunStatus::Interrupted
        )
    }
}

/// A run as returned by `start_analysis` and `get_run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub run_id: String,
    pub thread_id: String,
    pub status: RemoteRunStatus,
    pub created_at: DateTime<Utc>,
    /// Result reference, present once the run succeeded.
    #[serde(default)]
    pub result_id: Option<String>,
    /// Failure detail, present once the run errored.
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("engine unreachable: {0}")]
    Transport(String),
    #[error("engine rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid engine response: {0}")]
    Decode(String),
}

/// Client for the remote analysis engine.
#[async_trait]
pub trait AnalysisEngineClient: Send + Sync {
    /// Start a remote run. The engine decides whether a request is a duplicate.
    async fn start_analysis(
        &self,
        ticker: &Ticker,
        trade_date: TradeDate,
    ) -> Result<AnalysisRun, EngineError>;

    /// Current state of a previously started run.
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<AnalysisRun, EngineError>;
}

/// Told about every accepted submission so terminal status can be delivered later.
pub trait RunStatusNotifier: Send + Sync {
    fn on_analysis_submitted(&self, job_id: &JobId, run_id: &str, thread_id: &str);
}
