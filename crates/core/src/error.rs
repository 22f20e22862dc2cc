//! Domain error model.

use chrono::NaiveDate;
use thiserror::Error;

use crate::job::JobStatus;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Input validation failure.
///
/// Each variant is attributable to exactly one request field (see [`ValidationError::field`]).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("ticker must not be empty")]
    EmptyTicker,

    #[error("ticker must be at most {max} characters (got {len})")]
    TickerTooLong { len: usize, max: usize },

    #[error("ticker must contain only letters and digits: {0:?}")]
    TickerNotAlphanumeric(String),

    #[error("trade date must use the YYYY-MM-DD format: {0:?}")]
    MalformedTradeDate(String),

    #[error("trade date is not a real calendar date: {0}")]
    InvalidCalendarDate(String),

    #[error("trade date {0} is before 2000-01-01")]
    TradeDateTooEarly(NaiveDate),

    #[error("trade date {date} is after today ({today})")]
    TradeDateInFuture { date: NaiveDate, today: NaiveDate },
}

impl ValidationError {
    /// Name of the request field that failed validation.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::EmptyTicker
            | ValidationError::TickerTooLong { .. }
            | ValidationError::TickerNotAlphanumeric(_) => "ticker",
            ValidationError::MalformedTradeDate(_)
            | ValidationError::InvalidCalendarDate(_)
            | ValidationError::TradeDateTooEarly(_)
            | ValidationError::TradeDateInFuture { .. } => "trade_date",
        }
    }
}

/// A status change that the job state machine does not allow.
///
/// Rejected transitions never mutate the job; callers treat them as "not applicable".
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("transition {from} -> {to} is not applicable")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Domain-level error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// A stored or user-supplied token did not name a known variant.
    #[error("unknown {kind}: {value:?}")]
    UnknownVariant { kind: &'static str, value: String },
}

impl DomainError {
    pub fn unknown_variant(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownVariant {
            kind,
            value: value.into(),
        }
    }
}
