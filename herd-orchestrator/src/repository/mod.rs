//! Repository Module
//!
//! Persistence contract for job records, logs and failure entries.
//!
//! Every mutation is a single atomic store operation: history appends,
//! array counters and the conditional status transition never read and
//! then write.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use herd_core::domain::failure::FailureEntry;
use herd_core::domain::job::{JobId, JobRecord, JobSpec};
use herd_core::domain::log::{ArrayProgress, HistoryEntry, JobLog, LaunchResult};
use herd_core::domain::result::{JobResult, ResultType};
use herd_core::domain::status::Status;
use thiserror::Error;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("no log for job {job_id} (array index {array_index:?})")]
    LogNotFound {
        job_id: JobId,
        array_index: Option<u32>,
    },

    #[error("job {0} is not an array job")]
    NotArray(JobId),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Job persistence
///
/// `array_index == None` addresses the parent log of a job; `Some(i)`
/// addresses the log of array element `i`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a new record and its parent log holding `entry`.
    ///
    /// Array jobs start with zeroed progress counters and one element log
    /// per index, each holding `entry` as well.
    async fn create(&self, spec: &JobSpec, entry: &HistoryEntry) -> StoreResult<JobRecord>;

    async fn get(&self, job_id: JobId) -> StoreResult<Option<JobRecord>>;

    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<JobRecord>>;

    async fn log(&self, job_id: JobId, array_index: Option<u32>) -> StoreResult<Option<JobLog>>;

    /// Appends to a history. Element logs are created on first append.
    async fn append_history(
        &self,
        job_id: JobId,
        array_index: Option<u32>,
        entry: &HistoryEntry,
    ) -> StoreResult<()>;

    /// Appends `entry` only if the current status is one of `from`.
    ///
    /// Returns whether the append happened.
    async fn transition(
        &self,
        job_id: JobId,
        array_index: Option<u32>,
        from: &[Status],
        entry: &HistoryEntry,
    ) -> StoreResult<bool>;

    async fn set_launch(&self, job_id: JobId, launch: &LaunchResult) -> StoreResult<()>;

    async fn set_result(
        &self,
        job_id: JobId,
        array_index: Option<u32>,
        result: &JobResult,
    ) -> StoreResult<()>;

    /// Increments `num_started` and returns the counters after the increment
    async fn increment_started(&self, job_id: JobId) -> StoreResult<ArrayProgress>;

    /// Increments `num_ended`, plus `num_failed` or `num_canceled` for the
    /// matching result type, and returns the counters after the increment
    async fn record_element_end(
        &self,
        job_id: JobId,
        result_type: ResultType,
    ) -> StoreResult<ArrayProgress>;

    async fn add_failure(&self, entry: &FailureEntry) -> StoreResult<()>;

    async fn failures(&self, job_id: JobId) -> StoreResult<Vec<FailureEntry>>;

    /// Removes the record, every log and every failure entry of a job
    async fn delete(&self, job_id: JobId) -> StoreResult<bool>;
}
