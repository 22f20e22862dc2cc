//! Job queueing, retry and dispatch.
//!
//! ## Components
//!
//! - `PriorityQueueManager`: ready set ordered by priority, then creation time
//! - `JobRetryPolicy` / `RetryScheduler`: bounded backoff and one-shot requeue timers
//! - `JobLocks`: per-job serialization of read-modify-write cycles
//! - `JobLifecycle`: status callbacks (running, submitted, completed, failed, cancelled)
//! - `ProcessorRegistry`: cooperative cancellation tokens for in-flight jobs
//! - `QueueWorker`: dispatch loop bounded by a concurrency limit

pub mod cancellation;
pub mod executor;
pub mod lifecycle;
pub mod locks;
pub mod policy;
pub mod queue;
pub mod retry;
pub mod stats;

pub use cancellation::{ProcessorRegistry, Registration};
pub use executor::{
    JobProcessor, ProcessOutcome, QueueWorker, QueueWorkerConfig, QueueWorkerHandle, WorkerError,
    WorkerStats,
};
pub use lifecycle::{JobLifecycle, LifecycleError};
pub use locks::{JobGuard, JobLocks};
pub use policy::{BackoffStrategy, JobRetryPolicy};
pub use queue::{PriorityQueueManager, QueueError};
pub use retry::{RetryError, RetryScheduler};
pub use stats::JobStatistics;
