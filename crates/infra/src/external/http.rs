//! JSON-over-HTTP engine client.
//!
//! - `POST {base}/runs` with `{"ticker", "trade_date"}` starts a run
//! - `GET {base}/threads/{thread_id}/runs/{run_id}` reads one back

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

use tradeq_core::{Ticker, TradeDate};

use super::{AnalysisEngineClient, AnalysisRun, EngineError};

#[derive(Debug, Serialize)]
struct StartRunRequest<'a> {
    ticker: &'a str,
    trade_date: String,
}

#[derive(Debug, Clone)]
pub struct HttpAnalysisEngineClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAnalysisEngineClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn runs_url(&self) -> String {
        format!("{}/runs", self.base_url)
    }

    fn run_url(&self, thread_id: &str, run_id: &str) -> String {
        format!("{}/threads/{}/runs/{}", self.base_url, thread_id, run_id)
    }

    async fn decode(resp: reqwest::Response) -> Result<AnalysisRun, EngineError> {
        if !resp.status().is_success() {
            return Err(EngineError::Rejected {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        resp.json()
            .await
            .map_err(|e| EngineError::Decode(e.to_string()))
    }
}

#[async_trait]
impl AnalysisEngineClient for HttpAnalysisEngineClient {
    #[instrument(skip(self, ticker, trade_date), fields(ticker = %ticker, trade_date = %trade_date), err)]
    async fn start_analysis(
        &self,
        ticker: &Ticker,
        trade_date: TradeDate,
    ) -> Result<AnalysisRun, EngineError> {
        let body = StartRunRequest {
            ticker: ticker.as_str(),
            trade_date: trade_date.to_string(),
        };
        let resp = self
            .client
            .post(self.runs_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        let run = Self::decode(resp).await?;
        debug!(run_id = %run.run_id, thread_id = %run.thread_id, "engine run started");
        Ok(run)
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<AnalysisRun, EngineError> {
        let resp = self
            .client
            .get(self.run_url(thread_id, run_id))
            .send()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        Self::decode(resp).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::external::RemoteRunStatus;

    #[test]
    fn urls_ignore_trailing_slash() {
        let client = HttpAnalysisEngineClient::with_client(reqwest::Client::new(), "http://engine:8123/");
        assert_eq!(client.base_url(), "http://engine:8123");
        assert_eq!(client.runs_url(), "http://engine:8123/runs");
        assert_eq!(
            client.run_url("thread-1", "run-123"),
            "http://engine:8123/threads/thread-1/runs/run-123"
        );
    }

    #[test]
    fn run_payload_decodes_with_optional_fields_missing() {
        let run: AnalysisRun = serde_json::from_str(
            r#"{"run_id":"run-123","thread_id":"thread-1","status":"running","created_at":"2024-01-20T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(run.status, RemoteRunStatus::Running);
        assert!(run.result_id.is_none());
        assert!(!run.status.is_terminal());
    }

    #[tokio::test]
    async fn unreachable_engine_is_a_transport_error() {
        let client = HttpAnalysisEngineClient::new("http://127.0.0.1:1").unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let err = client
            .start_analysis(
                &Ticker::parse("AAPL").unwrap(),
                TradeDate::parse("2024-01-20", today).unwrap(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Transport(_)));
    }
}
