use tradeq_core::{JobId, TransitionError, ValidationError};
use tradeq_infra::external::EngineError;
use tradeq_infra::jobs::{LifecycleError, QueueError};
use tradeq_infra::repository::RepositoryError;

/// Errors surfaced by the use cases.
///
/// Validation, argument and not-found errors describe the caller's input; the rest are
/// operational and propagate as-is.
#[derive(Debug, thiserror::Error)]
pub enum UseCaseError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("analysis submission failed for job {id}: {source}")]
    Submission {
        id: JobId,
        #[source]
        source: EngineError,
    },

    #[error("persistence error: {0}")]
    Persistence(#[from] RepositoryError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl UseCaseError {
    /// Whether the error is about the caller's input rather than the system.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            UseCaseError::Validation(_) | UseCaseError::InvalidArgument(_) | UseCaseError::NotFound(_)
        )
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            UseCaseError::Validation(err) => err.to_string(),
            UseCaseError::InvalidArgument(msg) => msg.clone(),
            UseCaseError::NotFound(_) => "Job not found".to_string(),
            UseCaseError::Submission { .. } => {
                "The analysis service could not accept the request. The job was saved and can be retried."
                    .to_string()
            }
            UseCaseError::Persistence(_) | UseCaseError::Queue(_) | UseCaseError::Transition(_) => {
                format!("Something went wrong: {self}")
            }
        }
    }
}

impl From<LifecycleError> for UseCaseError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotFound(id) => UseCaseError::NotFound(id),
            LifecycleError::Transition(err) => UseCaseError::Transition(err),
            LifecycleError::Repository(err) => UseCaseError::Persistence(err),
            LifecycleError::Queue(err) => UseCaseError::Queue(err),
        }
    }
}

pub type UseCaseResult<T> = Result<T, UseCaseError>;
