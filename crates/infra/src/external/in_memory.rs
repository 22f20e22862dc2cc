//! In-memory analysis engine for tests/dev.
//!
//! Every submission creates a run in the configured initial status. Runs are then driven by
//! hand with [`InMemoryAnalysisEngine::succeed`] / [`InMemoryAnalysisEngine::fail_run`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use tradeq_core::{Ticker, TradeDate};

use super::{AnalysisEngineClient, AnalysisRun, EngineError, RemoteRunStatus};

#[derive(Debug)]
pub struct InMemoryAnalysisEngine {
    initial_status: RemoteRunStatus,
    runs: Mutex<HashMap<String, AnalysisRun>>,
    submissions: Mutex<Vec<(Ticker, TradeDate)>>,
    scripted_failures: Mutex<VecDeque<EngineError>>,
    next: AtomicU64,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for InMemoryAnalysisEngine {
    fn default() -> Self {
        Self::new(RemoteRunStatus::Running)
    }
}

impl InMemoryAnalysisEngine {
    /// Engine whose new runs start in `initial_status`.
    pub fn new(initial_status: RemoteRunStatus) -> Self {
        Self {
            initial_status,
            runs: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
            next: AtomicU64::new(1),
        }
    }

    /// Make the next `start_analysis` call fail with `error`. Calls queue up.
    pub fn fail_next_submission(&self, error: EngineError) {
        locked(&self.scripted_failures).push_back(error);
    }

    /// Every accepted or rejected submission, in call order.
    pub fn submissions(&self) -> Vec<(Ticker, TradeDate)> {
        locked(&self.submissions).clone()
    }

    pub fn run(&self, run_id: &str) -> Option<AnalysisRun> {
        locked(&self.runs).get(run_id).cloned()
    }

    pub fn set_status(&self, run_id: &str, status: RemoteRunStatus) -> bool {
        self.update(run_id, |run| run.status = status)
    }

    pub fn succeed(&self, run_id: &str, result_id: &str) -> bool {
        self.update(run_id, |run| {
            run.status = RemoteRunStatus::Success;
            run.result_id = Some(result_id.to_string());
        })
    }

    pub fn fail_run(&self, run_id: &str, error: &str) -> bool {
        self.update(run_id, |run| {
            run.status = RemoteRunStatus::Error;
            run.error = Some(error.to_string());
        })
    }

    fn update(&self, run_id: &str, apply: impl FnOnce(&mut AnalysisRun)) -> bool {
        match locked(&self.runs).get_mut(run_id) {
            Some(run) => {
                apply(run);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl AnalysisEngineClient for InMemoryAnalysisEngine {
    async fn start_analysis(
        &self,
        ticker: &Ticker,
        trade_date: TradeDate,
    ) -> Result<AnalysisRun, EngineError> {
        locked(&self.submissions).push((ticker.clone(), trade_date));

        if let Some(error) = locked(&self.scripted_failures).pop_front() {
            return Err(error);
        }

        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let run = AnalysisRun {
            run_id: format!("run-{n}"),
            thread_id: format!("thread-{n}"),
            status: self.initial_status,
            created_at: Utc::now(),
            result_id: None,
            error: None,
        };
        locked(&self.runs).insert(run.run_id.clone(), run.clone());
        Ok(run)
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<AnalysisRun, EngineError> {
        locked(&self.runs)
            .get(run_id)
            .filter(|run| run.thread_id == thread_id)
            .cloned()
            .ok_or_else(|| EngineError::Rejected {
                status: 404,
                message: format!("run {run_id} not found in thread {thread_id}"),
            })
    }
}
