//! `tradeq-core` — the analysis job model.
//!
//! This crate contains **pure domain** types (no I/O): the job record, its state machine,
//! and validation of submitted values.

pub mod error;
pub mod id;
pub mod job;
pub mod value_object;

pub use error::{DomainError, DomainResult, TransitionError, ValidationError};
pub use id::JobId;
pub use job::{AnalysisJob, DEFAULT_MAX_RETRIES, JobPriority, JobStatus};
pub use value_object::{EARLIEST_TRADE_YEAR, MAX_TICKER_LEN, Ticker, TradeDate};
