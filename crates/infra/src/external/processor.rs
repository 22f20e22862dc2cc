use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tradeq_core::AnalysisJob;

use super::{AnalysisEngineClient, RunStatusNotifier};
use crate::jobs::{JobProcessor, ProcessOutcome};

/// Worker processor that submits a job to the analysis engine.
///
/// Used for jobs the worker dispatches (requeued retries, rehydrated jobs, and submissions
/// that failed on the direct path). Results arrive later through the notifier.
pub struct EngineSubmissionProcessor {
    engine: Arc<dyn AnalysisEngineClient>,
    notifier: Arc<dyn RunStatusNotifier>,
}

impl EngineSubmissionProcessor {
    pub fn new(engine: Arc<dyn AnalysisEngineClient>, notifier: Arc<dyn RunStatusNotifier>) -> Self {
        Self { engine, notifier }
    }
}

#[async_trait]
impl JobProcessor for EngineSubmissionProcessor {
    async fn process(&self, job: &AnalysisJob, cancel: CancellationToken) -> ProcessOutcome {
        if cancel.is_cancelled() {
            return ProcessOutcome::Cancelled;
        }

        let submission = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ProcessOutcome::Cancelled,
            result = self.engine.start_analysis(job.ticker(), job.trade_date()) => result,
        };

        match submission {
            Ok(run) => {
                self.notifier
                    .on_analysis_submitted(job.id(), &run.run_id, &run.thread_id);
                debug!(job_id = %job.id(), run_id = %run.run_id, "job submitted to engine");
                ProcessOutcome::Submitted {
                    run_id: run.run_id,
                    thread_id: run.thread_id,
                }
            }
            Err(err) => {
                warn!(job_id = %job.id(), error = %err, "engine submission failed");
                ProcessOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::external::{EngineError, InMemoryAnalysisEngine};
    use crate::test_support::job;
    use tradeq_core::JobId;

    #[derive(Default)]
    struct RecordingNotifier(Mutex<Vec<(JobId, String)>>);

    impl RunStatusNotifier for RecordingNotifier {
        fn on_analysis_submitted(&self, job_id: &JobId, run_id: &str, _thread_id: &str) {
            self.0.lock().unwrap().push((job_id.clone(), run_id.to_string()));
        }
    }

    #[tokio::test]
    async fn accepted_submission_notifies_and_reports_run() {
        let engine = Arc::new(InMemoryAnalysisEngine::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let processor = EngineSubmissionProcessor::new(engine.clone(), notifier.clone());
        let job = job("AAPL");

        let outcome = processor.process(&job, CancellationToken::new()).await;

        assert_eq!(
            outcome,
            ProcessOutcome::Submitted {
                run_id: "run-1".into(),
                thread_id: "thread-1".into(),
            }
        );
        assert_eq!(*notifier.0.lock().unwrap(), vec![(job.id().clone(), "run-1".to_string())]);
    }

    #[tokio::test]
    async fn engine_error_becomes_failure() {
        let engine = Arc::new(InMemoryAnalysisEngine::default());
        engine.fail_next_submission(EngineError::Rejected {
            status: 503,
            message: "busy".into(),
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let processor = EngineSubmissionProcessor::new(engine, notifier.clone());

        let outcome = processor.process(&job("AAPL"), CancellationToken::new()).await;

        assert!(matches!(outcome, ProcessOutcome::Failed { ref error } if error.contains("503")));
        assert!(notifier.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_skips_submission() {
        let engine = Arc::new(InMemoryAnalysisEngine::default());
        let processor =
            EngineSubmissionProcessor::new(engine.clone(), Arc::new(RecordingNotifier::default()));
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(processor.process(&job("AAPL"), token).await, ProcessOutcome::Cancelled);
        assert!(engine.submissions().is_empty());
    }
}
