//! SQLite-backed job repository.
//!
//! Each job is one row in `analysis_jobs`. The full record is stored as a JSON `payload`;
//! `status`, `priority`, `ticker`, `trade_date` and `created_at` are duplicated into columns
//! so scans by status can use an index.
//!
//! Use `sqlite::memory:` for an ephemeral database (tests); the pool is then pinned to a
//! single connection that is never recycled, since each SQLite memory connection is its own
//! database.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use tradeq_core::{AnalysisJob, JobId, JobStatus};

use super::{JobRepository, RepositoryError};

/// Durable repository over a SQLite connection pool.
///
/// Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    /// Open (creating if missing) the database at `database_url` and ensure the schema.
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| map_sqlx_error("connect", e))?
            .create_if_missing(true);

        let in_memory = database_url.contains(":memory:");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and ensure the schema.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, RepositoryError> {
        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_jobs (
                id          TEXT PRIMARY KEY,
                ticker      TEXT NOT NULL,
                trade_date  TEXT NOT NULL,
                status      TEXT NOT NULL,
                priority    TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                payload     TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create table", e))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_analysis_jobs_status ON analysis_jobs (status)")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create index", e))?;

        debug!("analysis_jobs schema ready");
        Ok(())
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    #[instrument(skip(self, job), fields(job_id = %job.id(), status = %job.status()), err)]
    async fn save(&self, job: &AnalysisJob) -> Result<(), RepositoryError> {
        let payload = serde_json::to_string(job).map_err(|e| RepositoryError::Corrupt {
            id: job.id().to_string(),
            reason: format!("failed to encode payload: {e}"),
        })?;

        sqlx::query(
            r#"
            INSERT INTO analysis_jobs (id, ticker, trade_date, status, priority, created_at, payload)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                ticker = excluded.ticker,
                trade_date = excluded.trade_date,
                status = excluded.status,
                priority = excluded.priority,
                created_at = excluded.created_at,
                payload = excluded.payload
            "#,
        )
        .bind(job.id().as_str())
        .bind(job.ticker().as_str())
        .bind(job.trade_date().to_string())
        .bind(job.status().as_str())
        .bind(job.priority().as_str())
        .bind(job.created_at().to_rfc3339())
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save", e))?;

        Ok(())
    }

    async fn get_by_id(&self, id: &JobId) -> Result<Option<AnalysisJob>, RepositoryError> {
        let row = sqlx::query("SELECT id, payload FROM analysis_jobs WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_by_id", e))?;

        row.map(row_to_job).transpose()
    }

    async fn get_all(&self) -> Result<Vec<AnalysisJob>, RepositoryError> {
        let rows = sqlx::query("SELECT id, payload FROM analysis_jobs")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_all", e))?;

        rows.into_iter().map(row_to_job).collect()
    }

    async fn get_by_status(&self, status: JobStatus) -> Result<Vec<AnalysisJob>, RepositoryError> {
        let rows = sqlx::query("SELECT id, payload FROM analysis_jobs WHERE status = ?1")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_by_status", e))?;

        rows.into_iter().map(row_to_job).collect()
    }

    async fn delete(&self, id: &JobId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM analysis_jobs WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_all(&self) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM analysis_jobs")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("clear_all", e))?;
        Ok(())
    }
}

/// Map a database row into an `AnalysisJob`.
fn row_to_job(row: SqliteRow) -> Result<AnalysisJob, RepositoryError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| map_sqlx_error("read id", e))?;
    let payload: String = row
        .try_get("payload")
        .map_err(|e| map_sqlx_error("read payload", e))?;

    serde_json::from_str(&payload).map_err(|e| RepositoryError::Corrupt {
        id,
        reason: format!("invalid payload: {e}"),
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => RepositoryError::Storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            RepositoryError::Storage(format!("connection pool closed in {operation}"))
        }
        other => RepositoryError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
