//! SQLite storage layer -- job definitions and execution history.

pub mod schema;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use thiserror::Error;

use crate::job::{ExecutionOutcome, ExecutionRecord, JobDefinition, JobId};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid timestamp '{value}' in execution history")]
    BadTimestamp { value: String },
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Single-connection in-memory pool. Every SQLite memory connection is its own
/// database, so the pool is capped at one.
pub fn open_in_memory() -> Result<Pool> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = R2D2Pool::builder().max_size(1).build(manager)?;
    let conn = pool.get()?;
    schema::migrate(&conn)?;
    Ok(pool)
}

/// The narrow storage contract the scheduler depends on.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// All persisted job definitions.
    async fn list_jobs(&self) -> Result<Vec<JobDefinition>, StorageError>;

    /// Append one outcome to the execution history.
    async fn append_execution(&self, outcome: &ExecutionOutcome) -> Result<(), StorageError>;
}

/// `JobStore` backed by the SQLite pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Run `f` against a pooled connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }

    /// Persist a new job definition with a fresh identifier.
    pub async fn create_job(
        &self,
        schedule: &str,
        target: &str,
        kind: &str,
    ) -> Result<JobDefinition, StorageError> {
        let job = JobDefinition {
            id: JobId::new(),
            schedule: schedule.to_string(),
            target: target.to_string(),
            kind: kind.to_string(),
        };
        let row = job.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO jobs (id, schedule, target, kind) VALUES (?1, ?2, ?3, ?4)",
                params![row.id.as_str(), row.schedule, row.target, row.kind],
            )?;
            Ok(())
        })
        .await?;

        tracing::info!(job_id = %job.id, target = %job.target, "Job created");
        Ok(job)
    }

    /// Most recent executions of a job, newest first.
    pub async fn recent_executions(
        &self,
        job_id: &JobId,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StorageError> {
        let job_id = job_id.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, executed_at, status_code, duration_ms, success
                 FROM job_executions
                 WHERE job_id = ?1
                 ORDER BY executed_at DESC, id DESC
                 LIMIT ?2",
            )?;

            let rows = stmt.query_map(params![job_id.as_str(), limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<u16>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, bool>(4)?,
                ))
            })?;

            let mut records = Vec::new();
            for r in rows {
                let (id, executed_at, status_code, duration_ms, success) = r?;
                let executed_at = DateTime::parse_from_rfc3339(&executed_at)
                    .map_err(|_| StorageError::BadTimestamp {
                        value: executed_at.clone(),
                    })?
                    .with_timezone(&Utc);
                records.push(ExecutionRecord {
                    id,
                    executed_at,
                    status_code,
                    duration_ms: duration_ms.max(0) as u64,
                    success,
                });
            }
            Ok(records)
        })
        .await
    }

    /// Cheap round-trip used by the health check.
    pub async fn ping(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn list_jobs(&self) -> Result<Vec<JobDefinition>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, schedule, target, kind FROM jobs ORDER BY created_at, id")?;
            let rows = stmt.query_map([], |row| {
                Ok(JobDefinition {
                    id: JobId::from(row.get::<_, String>(0)?),
                    schedule: row.get(1)?,
                    target: row.get(2)?,
                    kind: row.get(3)?,
                })
            })?;

            let mut jobs = Vec::new();
            for r in rows {
                jobs.push(r?);
            }
            Ok(jobs)
        })
        .await
    }

    async fn append_execution(&self, outcome: &ExecutionOutcome) -> Result<(), StorageError> {
        let row = outcome.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO job_executions (job_id, status_code, duration_ms, success, executed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.job_id.as_str(),
                    row.status_code,
                    row.duration_ms.min(i64::MAX as u64) as i64,
                    row.success,
                    row.executed_at
                        .to_rfc3339_opts(SecondsFormat::Millis, true),
                ],
            )?;
            Ok(())
        })
        .await?;

        tracing::info!(
            job_id = %outcome.job_id,
            status_code = ?outcome.status_code,
            duration_ms = outcome.duration_ms,
            success = outcome.success,
            "Execution recorded"
        );
        Ok(())
    }
}
