//! Infrastructure layer: job storage, queueing, retries, dispatch and the analysis engine adapter.

pub mod external;
pub mod jobs;
pub mod repository;

use std::sync::Arc;

use tradeq_events::{BusError, EventBus, JobEvent};

pub use repository::{InMemoryJobRepository, JobRepository, RepositoryError, SqliteJobRepository};

/// Repository handle shared by every component.
pub type SharedJobRepository = Arc<dyn JobRepository>;

/// Lifecycle event bus shared by every component.
pub type SharedEventBus = Arc<dyn EventBus<JobEvent, Error = BusError>>;

/// Publish a lifecycle event. Failures are logged; the persisted record stays authoritative.
pub fn publish_event(bus: &SharedEventBus, event: JobEvent) {
    let event_type = tradeq_events::Event::event_type(&event);
    if let Err(err) = bus.publish(event) {
        tracing::warn!(event_type, error = %err, "failed to publish job event");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, NaiveDate, Utc};

    use tradeq_core::{AnalysisJob, JobPriority, Ticker, TradeDate};
    use tradeq_events::InMemoryEventBus;

    use super::*;

    pub fn job(ticker: &str) -> AnalysisJob {
        job_with(ticker, JobPriority::Normal)
    }

    pub fn job_with(ticker: &str, priority: JobPriority) -> AnalysisJob {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        AnalysisJob::new(
            Ticker::parse(ticker).unwrap(),
            TradeDate::parse("2024-01-20", today).unwrap(),
            priority,
        )
    }

    /// Job with a creation time `offset_ms` after a fixed epoch.
    pub fn job_at(ticker: &str, priority: JobPriority, offset_ms: i64) -> AnalysisJob {
        let base = DateTime::parse_from_rfc3339("2024-01-20T09:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        job_with(ticker, priority).with_created_at(base + chrono::Duration::milliseconds(offset_ms))
    }

    pub fn bus() -> (Arc<InMemoryEventBus<JobEvent>>, SharedEventBus) {
        let bus = Arc::new(InMemoryEventBus::<JobEvent>::new());
        let shared: SharedEventBus = bus.clone();
        (bus, shared)
    }
}
