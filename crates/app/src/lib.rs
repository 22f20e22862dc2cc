//! Application layer: use cases, the jobs view-model, configuration and runtime wiring.

pub mod clock;
pub mod config;
pub mod error;
pub mod runtime;
pub mod use_cases;
pub mod view_model;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::QueueConfig;
pub use error::{UseCaseError, UseCaseResult};
pub use runtime::{QueueRuntime, RunningQueue};
pub use use_cases::{
    AnalysisRequest, BatchCancelResult, CancelJobUseCase, GetJobStatusUseCase, JobFilter,
    JobStatisticsSummary, QueueAnalysisUseCase,
};
pub use view_model::JobsViewModel;
