//! Postgres-backed job store.
//!
//! Each job is one row. The full record lives in a `record` jsonb column; the
//! columns the store filters and orders on (`kind`, `status`,
//! `run_generation`, `created_at`) are kept beside it. Every mutation runs in a
//! transaction that locks the row (`SELECT ... FOR UPDATE`), checks the
//! generation/status precondition, applies the change with the same
//! [`Job`] methods the in-memory store uses, and writes the row back.
//! `claim_next` uses `FOR UPDATE SKIP LOCKED` so concurrent dispatchers never
//! claim the same row.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError | Scenario |
//! |------------|----------------------|---------------|----------|
//! | Database (unique violation) | `23505` | `AlreadyExists` | `create` with an id already in use |
//! | Database (other) | Any other | `Storage` | Constraint or server errors |
//! | PoolClosed | N/A | `Storage` | Connection pool was closed |
//! | Other | N/A | `Storage` | Network errors, connection failures, decode errors |
//!
//! ## Sync bridge
//!
//! [`JobStore`] is synchronous. Calls are driven on the runtime handle captured
//! at construction; from inside a runtime worker the call is wrapped in
//! `block_in_place`, which needs the multi-threaded runtime.

use std::collections::HashSet;
use std::future::Future;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use uuid::Uuid;

use kitchenline_core::{JobId, JobKind, JobStatus};

use super::store::{JobStore, JobStoreError, check_transition};
use super::types::{Job, JobFilter, LogEntry, StatusUpdate};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id              UUID PRIMARY KEY,
    kind            TEXT NOT NULL,
    status          TEXT NOT NULL,
    run_generation  BIGINT NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL,
    record          JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS jobs_status_created_idx ON jobs (status, created_at, id);
"#;

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
    handle: Handle,
}

impl PostgresJobStore {
    /// Must be called from within a tokio runtime; the handle is kept for the
    /// sync bridge.
    pub fn new(pool: PgPool) -> Result<Self, JobStoreError> {
        let handle = Handle::try_current().map_err(|_| {
            JobStoreError::Storage("PostgresJobStore requires a tokio runtime".to_string())
        })?;
        Ok(Self { pool, handle })
    }

    /// Create the `jobs` table and its index if missing.
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    fn run<F, T>(&self, fut: F) -> Result<T, JobStoreError>
    where
        F: Future<Output = Result<T, JobStoreError>>,
    {
        if Handle::try_current().is_ok() {
            tokio::task::block_in_place(|| self.handle.block_on(fut))
        } else {
            self.handle.block_on(fut)
        }
    }

    async fn lock_row(
        tx: &mut Transaction<'_, Postgres>,
        id: JobId,
    ) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query("SELECT record FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(*id.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("lock_row", e))?;
        row.map(|r| decode_record(&r)).transpose()
    }

    async fn write_row(tx: &mut Transaction<'_, Postgres>, job: &Job) -> Result<(), JobStoreError> {
        let record = encode_record(job)?;
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, run_generation = $3, updated_at = $4, record = $5
            WHERE id = $1
            "#,
        )
        .bind(*job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(generation_to_db(job.run_generation))
        .bind(job.updated_at)
        .bind(record)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_row", e))?;
        Ok(())
    }

    /// Lock `id`, hand the record to `f`, and write it back when `f` says it
    /// changed something.
    async fn mutate<T>(
        &self,
        operation: &'static str,
        id: JobId,
        f: impl FnOnce(&mut Job) -> Result<(bool, T), JobStoreError>,
    ) -> Result<T, JobStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        let mut job = Self::lock_row(&mut tx, id)
            .await?
            .ok_or(JobStoreError::NotFound(id))?;

        let (changed, out) = f(&mut job)?;
        if changed {
            Self::write_row(&mut tx, &job).await?;
            tx.commit().await.map_err(|e| map_sqlx_error(operation, e))?;
        } else {
            tx.rollback().await.map_err(|e| map_sqlx_error(operation, e))?;
        }
        Ok(out)
    }

    async fn mutate_running(
        &self,
        operation: &'static str,
        id: JobId,
        generation: u64,
        f: impl FnOnce(&mut Job),
    ) -> Result<bool, JobStoreError> {
        self.mutate(operation, id, |job| {
            if job.run_generation != generation || job.status != JobStatus::Running {
                return Ok((false, false));
            }
            f(job);
            job.updated_at = Utc::now();
            Ok((true, true))
        })
        .await
    }

    async fn create_async(&self, job: Job) -> Result<Job, JobStoreError> {
        let record = encode_record(&job)?;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, status, run_generation, created_at, updated_at, record)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(*job.id.as_uuid())
        .bind(job.kind.as_str())
        .bind(job.status.as_str())
        .bind(generation_to_db(job.run_generation))
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(record)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::AlreadyExists(job.id)
            } else {
                map_sqlx_error("create", e)
            }
        })?;
        Ok(job)
    }

    async fn get_async(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query("SELECT record FROM jobs WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.map(|r| decode_record(&r)).transpose()
    }

    async fn list_async(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT record FROM jobs
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR kind = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;
        rows.iter().map(decode_record).collect()
    }

    async fn in_status_async(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query("SELECT record FROM jobs WHERE status = $1 ORDER BY created_at, id")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("in_status", e))?;
        rows.iter().map(decode_record).collect()
    }

    async fn claim_next_async(
        &self,
        kinds: &[JobKind],
        skip: &HashSet<JobId>,
    ) -> Result<Option<Job>, JobStoreError> {
        let kinds: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();
        let skip: Vec<Uuid> = skip.iter().map(|id| *id.as_uuid()).collect();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("claim_next", e))?;
        let row = sqlx::query(
            r#"
            SELECT record FROM jobs
            WHERE (status = 'QUEUED'
                   OR (status = 'NEEDS_INPUT' AND record -> 'pending_input' IS NOT NULL))
              AND kind = ANY($1)
              AND NOT (id = ANY($2))
            ORDER BY created_at, id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(kinds)
        .bind(skip)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim_next", e))?;

        let Some(row) = row else {
            tx.rollback().await.map_err(|e| map_sqlx_error("claim_next", e))?;
            return Ok(None);
        };
        let mut job = decode_record(&row)?;

        let message = if job.status == JobStatus::NeedsInput {
            "Resumed with operator input".to_string()
        } else {
            format!("Run {} started", job.run_generation)
        };
        job.apply(StatusUpdate::to(JobStatus::Running).with_log(message), Utc::now());

        let claimed = job.clone();
        job.pending_input = None;
        Self::write_row(&mut tx, &job).await?;
        tx.commit().await.map_err(|e| map_sqlx_error("claim_next", e))?;
        Ok(Some(claimed))
    }
}

impl JobStore for PostgresJobStore {
    fn create(&self, job: Job) -> Result<Job, JobStoreError> {
        self.run(self.create_async(job))
    }

    fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        self.run(self.get_async(id))
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobStoreError> {
        self.run(self.list_async(filter))
    }

    fn in_status(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError> {
        self.run(self.in_status_async(status))
    }

    fn compare_and_swap_status(
        &self,
        id: JobId,
        generation: u64,
        expected: JobStatus,
        update: StatusUpdate,
    ) -> Result<bool, JobStoreError> {
        check_transition(expected, update.to)?;
        self.run(self.mutate("compare_and_swap_status", id, move |job| {
            if job.run_generation != generation || job.status != expected {
                return Ok((false, false));
            }
            job.apply(update, Utc::now());
            Ok((true, true))
        }))
    }

    fn append_log(&self, id: JobId, generation: u64, message: &str) -> Result<bool, JobStoreError> {
        self.run(self.mutate_running("append_log", id, generation, |job| {
            job.logs.push(LogEntry::now(message))
        }))
    }

    fn set_progress(
        &self,
        id: JobId,
        generation: u64,
        percent: u8,
        step: &str,
    ) -> Result<bool, JobStoreError> {
        self.run(self.mutate_running("set_progress", id, generation, |job| {
            job.progress = job.progress.max(percent.min(100));
            job.current_step = Some(step.to_string());
        }))
    }

    fn merge_metadata(
        &self,
        id: JobId,
        generation: u64,
        key: &str,
        value: serde_json::Value,
    ) -> Result<bool, JobStoreError> {
        self.run(self.mutate_running("merge_metadata", id, generation, |job| {
            job.metadata.insert(key.to_string(), value);
        }))
    }

    fn claim_next(&self, kinds: &[JobKind], skip: &HashSet<JobId>) -> Result<Option<Job>, JobStoreError> {
        self.run(self.claim_next_async(kinds, skip))
    }

    fn begin_retry(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        self.run(self.mutate("begin_retry", id, |job| {
            if !job.status.is_retryable() {
                return Ok((false, None));
            }
            job.reset_for_retry(Utc::now());
            Ok((true, Some(job.clone())))
        }))
    }

    fn supply_input(
        &self,
        id: JobId,
        generation: u64,
        decision: serde_json::Value,
    ) -> Result<bool, JobStoreError> {
        self.run(self.mutate("supply_input", id, move |job| {
            if job.run_generation != generation || job.status != JobStatus::NeedsInput {
                return Ok((false, false));
            }
            let now: DateTime<Utc> = Utc::now();
            job.pending_input = Some(decision);
            job.updated_at = now;
            job.logs.push(LogEntry {
                timestamp: now,
                message: "Operator input received".to_string(),
            });
            Ok((true, true))
        }))
    }
}

fn generation_to_db(generation: u64) -> i64 {
    i64::try_from(generation).unwrap_or(i64::MAX)
}

fn encode_record(job: &Job) -> Result<serde_json::Value, JobStoreError> {
    serde_json::to_value(job)
        .map_err(|e| JobStoreError::Storage(format!("failed to encode job {}: {e}", job.id)))
}

fn decode_record(row: &sqlx::postgres::PgRow) -> Result<Job, JobStoreError> {
    let record: serde_json::Value = row
        .try_get("record")
        .map_err(|e| JobStoreError::Storage(format!("failed to read job row: {e}")))?;
    serde_json::from_value(record)
        .map_err(|e| JobStoreError::Storage(format!("failed to decode job record: {e}")))
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

/// Map SQLx errors to JobStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
            JobStoreError::Storage(format!(
                "database error in {operation} ({code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}
