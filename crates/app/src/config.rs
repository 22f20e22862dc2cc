//! Environment-driven configuration.
//!
//! Every setting has a default; a variable that is set but unparsable is an error.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use tradeq_infra::jobs::{BackoffStrategy, JobRetryPolicy, QueueWorkerConfig};
use tradeq_observability::LogFormat;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://tradeq.db";
pub const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:8123";

#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub database_url: String,
    pub engine_url: String,
    pub workers: usize,
    pub poll_interval: Duration,
    pub status_poll_interval: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_strategy: BackoffStrategy,
    pub log_format: LogFormat,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            engine_url: DEFAULT_ENGINE_URL.to_string(),
            workers: 2,
            poll_interval: Duration::from_millis(500),
            status_poll_interval: Duration::from_millis(5_000),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(5_000),
            retry_max_delay: Duration::from_millis(300_000),
            retry_strategy: BackoffStrategy::Exponential,
            log_format: LogFormat::Json,
        }
    }
}

impl QueueConfig {
    /// Read `TRADEQ_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests, env files).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let config = Self {
            database_url: get("TRADEQ_DATABASE_URL").unwrap_or(defaults.database_url),
            engine_url: get("TRADEQ_ENGINE_URL").unwrap_or(defaults.engine_url),
            workers: parse_or(&get, "TRADEQ_WORKERS", defaults.workers)?,
            poll_interval: millis_or(&get, "TRADEQ_POLL_INTERVAL_MS", defaults.poll_interval)?,
            status_poll_interval: millis_or(
                &get,
                "TRADEQ_STATUS_POLL_INTERVAL_MS",
                defaults.status_poll_interval,
            )?,
            max_retries: parse_or(&get, "TRADEQ_MAX_RETRIES", defaults.max_retries)?,
            retry_base_delay: millis_or(&get, "TRADEQ_RETRY_BASE_MS", defaults.retry_base_delay)?,
            retry_max_delay: millis_or(&get, "TRADEQ_RETRY_MAX_MS", defaults.retry_max_delay)?,
            retry_strategy: parse_or(&get, "TRADEQ_RETRY_STRATEGY", defaults.retry_strategy)?,
            log_format: parse_or(&get, "TRADEQ_LOG_FORMAT", defaults.log_format)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("TRADEQ_WORKERS must be at least 1");
        }
        if self.poll_interval.is_zero() || self.status_poll_interval.is_zero() {
            bail!("poll intervals must be greater than zero");
        }
        if self.retry_max_delay < self.retry_base_delay {
            bail!(
                "TRADEQ_RETRY_MAX_MS ({}) must not be below TRADEQ_RETRY_BASE_MS ({})",
                self.retry_max_delay.as_millis(),
                self.retry_base_delay.as_millis()
            );
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> JobRetryPolicy {
        JobRetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            strategy: self.retry_strategy,
            ..JobRetryPolicy::default()
        }
    }

    pub fn worker_config(&self) -> QueueWorkerConfig {
        QueueWorkerConfig::default()
            .with_name("tradeq-worker")
            .with_max_concurrent(self.workers)
            .with_poll_interval(self.poll_interval)
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

fn millis_or(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    let millis = parse_or(get, key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}
