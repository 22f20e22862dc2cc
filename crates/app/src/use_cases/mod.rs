//! Application use cases: the only entry points external callers use.

pub mod cancel_job;
pub mod get_job_status;
pub mod queue_analysis;

pub use cancel_job::{BatchCancelResult, CancelJobUseCase};
pub use get_job_status::{GetJobStatusUseCase, JobFilter, JobStatisticsSummary};
pub use queue_analysis::{AnalysisRequest, QueueAnalysisUseCase};
