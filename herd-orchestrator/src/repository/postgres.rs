//! Postgres job store
//!
//! History is a JSONB array appended with `||`; counters are nullable
//! integer columns (NULL for plain jobs) incremented with `RETURNING`.
//! Parent logs use array index 0.

use async_trait::async_trait;
use herd_core::domain::failure::FailureEntry;
use herd_core::domain::job::{JobId, JobRecord, JobSpec};
use herd_core::domain::log::{ArrayProgress, HistoryEntry, JobLog, LaunchResult};
use herd_core::domain::result::{JobResult, ResultType};
use herd_core::domain::status::Status;
use sqlx::PgPool;
use sqlx::types::Json;

use super::{JobStore, StoreError, StoreResult};

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn log_exists(&self, job_id: JobId, array_index: Option<u32>) -> StoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT job_id FROM herd_job_logs WHERE job_id = $1 AND array_index = $2",
        )
        .bind(job_id)
        .bind(slot(array_index))
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Explains why a counter update touched no row
    async fn progress_error(&self, job_id: JobId) -> StoreError {
        match self.log_exists(job_id, None).await {
            Ok(true) => StoreError::NotArray(job_id),
            Ok(false) => StoreError::LogNotFound {
                job_id,
                array_index: None,
            },
            Err(err) => err,
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, spec: &JobSpec, entry: &HistoryEntry) -> StoreResult<JobRecord> {
        let created_at = chrono::Utc::now();
        let counters: Option<i32> = spec.is_array().then_some(0);

        let mut tx = self.pool.begin().await?;

        let id: JobId = sqlx::query_scalar(
            r#"
            INSERT INTO herd_jobs (owner_id, spec, created_at)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(spec.owner_id.as_deref())
        .bind(Json(spec))
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO herd_job_logs
                (job_id, array_index, history, num_started, num_ended, num_canceled, num_failed)
            VALUES ($1, 0, jsonb_build_array($2::jsonb), $3, $3, $3, $3)
            "#,
        )
        .bind(id)
        .bind(Json(entry))
        .bind(counters)
        .execute(&mut *tx)
        .await?;

        if let Some(size) = spec.array_size() {
            sqlx::query(
                r#"
                INSERT INTO herd_job_logs (job_id, array_index, history)
                SELECT $1, i, jsonb_build_array($2::jsonb)
                FROM generate_series(1, $3) AS i
                "#,
            )
            .bind(id)
            .bind(Json(entry))
            .bind(slot(Some(size)))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(JobRecord {
            id: Some(id),
            spec: spec.clone(),
            created_at: Some(created_at),
        })
    }

    async fn get(&self, job_id: JobId) -> StoreResult<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT id, spec, created_at FROM herd_jobs WHERE id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, spec, created_at
            FROM herd_jobs
            WHERE owner_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn log(&self, job_id: JobId, array_index: Option<u32>) -> StoreResult<Option<JobLog>> {
        let row = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT job_id, array_index, history, launch, result,
                   num_started, num_ended, num_canceled, num_failed
            FROM herd_job_logs
            WHERE job_id = $1 AND array_index = $2
            "#,
        )
        .bind(job_id)
        .bind(slot(array_index))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn append_history(
        &self,
        job_id: JobId,
        array_index: Option<u32>,
        entry: &HistoryEntry,
    ) -> StoreResult<()> {
        let affected = match array_index {
            None => sqlx::query(
                r#"
                UPDATE herd_job_logs
                SET history = history || jsonb_build_array($2::jsonb)
                WHERE job_id = $1 AND array_index = 0
                "#,
            )
            .bind(job_id)
            .bind(Json(entry))
            .execute(&self.pool)
            .await?
            .rows_affected(),
            Some(_) => sqlx::query(
                r#"
                INSERT INTO herd_job_logs (job_id, array_index, history)
                SELECT $1, $2, jsonb_build_array($3::jsonb)
                WHERE EXISTS (SELECT 1 FROM herd_jobs WHERE id = $1)
                ON CONFLICT (job_id, array_index)
                DO UPDATE SET history = herd_job_logs.history || EXCLUDED.history
                "#,
            )
            .bind(job_id)
            .bind(slot(array_index))
            .bind(Json(entry))
            .execute(&self.pool)
            .await?
            .rows_affected(),
        };

        if affected == 0 {
            return Err(match array_index {
                None => StoreError::LogNotFound { job_id, array_index },
                Some(_) => StoreError::JobNotFound(job_id),
            });
        }
        Ok(())
    }

    async fn transition(
        &self,
        job_id: JobId,
        array_index: Option<u32>,
        from: &[Status],
        entry: &HistoryEntry,
    ) -> StoreResult<bool> {
        let from: Vec<String> = from.iter().map(|status| status.as_str().to_string()).collect();

        let affected = sqlx::query(
            r#"
            UPDATE herd_job_logs
            SET history = history || jsonb_build_array($3::jsonb)
            WHERE job_id = $1 AND array_index = $2
              AND (history -> -1) ->> 'status' = ANY($4)
            "#,
        )
        .bind(job_id)
        .bind(slot(array_index))
        .bind(Json(entry))
        .bind(from)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected > 0 {
            return Ok(true);
        }
        if self.log_exists(job_id, array_index).await? {
            Ok(false)
        } else {
            Err(StoreError::LogNotFound { job_id, array_index })
        }
    }

    async fn set_launch(&self, job_id: JobId, launch: &LaunchResult) -> StoreResult<()> {
        let affected = sqlx::query(
            "UPDATE herd_job_logs SET launch = $2 WHERE job_id = $1 AND array_index = 0",
        )
        .bind(job_id)
        .bind(Json(launch))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::LogNotFound {
                job_id,
                array_index: None,
            });
        }
        Ok(())
    }

    async fn set_result(
        &self,
        job_id: JobId,
        array_index: Option<u32>,
        result: &JobResult,
    ) -> StoreResult<()> {
        let affected = sqlx::query(
            r#"
            INSERT INTO herd_job_logs (job_id, array_index, history, result)
            SELECT $1, $2, '[]'::jsonb, $3
            WHERE EXISTS (SELECT 1 FROM herd_jobs WHERE id = $1)
            ON CONFLICT (job_id, array_index)
            DO UPDATE SET result = EXCLUDED.result
            "#,
        )
        .bind(job_id)
        .bind(slot(array_index))
        .bind(Json(result))
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::JobNotFound(job_id));
        }
        Ok(())
    }

    async fn increment_started(&self, job_id: JobId) -> StoreResult<ArrayProgress> {
        let row = sqlx::query_as::<_, ProgressRow>(
            r#"
            UPDATE herd_job_logs
            SET num_started = num_started + 1
            WHERE job_id = $1 AND array_index = 0 AND num_started IS NOT NULL
            RETURNING num_started, num_ended, num_canceled, num_failed
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => Err(self.progress_error(job_id).await),
        }
    }

    async fn record_element_end(
        &self,
        job_id: JobId,
        result_type: ResultType,
    ) -> StoreResult<ArrayProgress> {
        let failed = i32::from(result_type == ResultType::Failure);
        let canceled = i32::from(result_type == ResultType::Canceled);

        let row = sqlx::query_as::<_, ProgressRow>(
            r#"
            UPDATE herd_job_logs
            SET num_ended = num_ended + 1,
                num_failed = num_failed + $2,
                num_canceled = num_canceled + $3
            WHERE job_id = $1 AND array_index = 0 AND num_ended IS NOT NULL
            RETURNING num_started, num_ended, num_canceled, num_failed
            "#,
        )
        .bind(job_id)
        .bind(failed)
        .bind(canceled)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => Err(self.progress_error(job_id).await),
        }
    }

    async fn add_failure(&self, entry: &FailureEntry) -> StoreResult<()> {
        let affected = sqlx::query(
            r#"
            INSERT INTO herd_job_failures (job_id, array_index, message, recorded_at)
            SELECT $1, $2, $3, $4
            WHERE EXISTS (SELECT 1 FROM herd_jobs WHERE id = $1)
            "#,
        )
        .bind(entry.job_id)
        .bind(entry.array_index.map(|index| slot(Some(index))))
        .bind(&entry.message)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::JobNotFound(entry.job_id));
        }
        Ok(())
    }

    async fn failures(&self, job_id: JobId) -> StoreResult<Vec<FailureEntry>> {
        let rows = sqlx::query_as::<_, FailureRow>(
            r#"
            SELECT job_id, array_index, message, recorded_at
            FROM herd_job_failures
            WHERE job_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete(&self, job_id: JobId) -> StoreResult<bool> {
        // logs and failures go with the record (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM herd_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn slot(array_index: Option<u32>) -> i32 {
    array_index
        .map(|index| i32::try_from(index).unwrap_or(i32::MAX))
        .unwrap_or(0)
}

fn unslot(slot: i32) -> Option<u32> {
    u32::try_from(slot).ok().filter(|index| *index > 0)
}

fn counter(value: Option<i32>) -> u32 {
    value.and_then(|value| u32::try_from(value).ok()).unwrap_or(0)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    spec: Json<JobSpec>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<JobRow> for JobRecord {
    fn from(row: JobRow) -> Self {
        JobRecord {
            id: Some(row.id),
            spec: row.spec.0,
            created_at: Some(row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    job_id: i64,
    array_index: i32,
    history: Json<Vec<HistoryEntry>>,
    launch: Option<Json<LaunchResult>>,
    result: Option<Json<JobResult>>,
    num_started: Option<i32>,
    num_ended: Option<i32>,
    num_canceled: Option<i32>,
    num_failed: Option<i32>,
}

impl From<LogRow> for JobLog {
    fn from(row: LogRow) -> Self {
        let progress = row.num_started.map(|_| ArrayProgress {
            num_started: counter(row.num_started),
            num_ended: counter(row.num_ended),
            num_canceled: counter(row.num_canceled),
            num_failed: counter(row.num_failed),
        });

        JobLog {
            job_id: row.job_id,
            array_index: unslot(row.array_index),
            history: row.history.0,
            launch: row.launch.map(|launch| launch.0),
            result: row.result.map(|result| result.0),
            progress,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProgressRow {
    num_started: Option<i32>,
    num_ended: Option<i32>,
    num_canceled: Option<i32>,
    num_failed: Option<i32>,
}

impl From<ProgressRow> for ArrayProgress {
    fn from(row: ProgressRow) -> Self {
        ArrayProgress {
            num_started: counter(row.num_started),
            num_ended: counter(row.num_ended),
            num_canceled: counter(row.num_canceled),
            num_failed: counter(row.num_failed),
        }
    }
}

#[derive(sqlx::FromRow)]
struct FailureRow {
    job_id: i64,
    array_index: Option<i32>,
    message: String,
    recorded_at: chrono::DateTime<chrono::Utc>,
}

impl From<FailureRow> for FailureEntry {
    fn from(row: FailureRow) -> Self {
        FailureEntry {
            job_id: row.job_id,
            array_index: row.array_index.and_then(unslot),
            message: row.message,
            recorded_at: row.recorded_at,
        }
    }
}
