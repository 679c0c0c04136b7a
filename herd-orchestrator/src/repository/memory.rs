//! In-memory job store
//!
//! Used when no database is configured and by the orchestrator tests.
//! A single mutex makes every operation atomic.

use async_trait::async_trait;
use herd_core::domain::failure::FailureEntry;
use herd_core::domain::job::{JobId, JobRecord, JobSpec};
use herd_core::domain::log::{ArrayProgress, HistoryEntry, JobLog, LaunchResult};
use herd_core::domain::result::{JobResult, ResultType};
use herd_core::domain::status::Status;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::{JobStore, StoreError, StoreResult};

/// Parent logs live at element slot 0
const PARENT: u32 = 0;

#[derive(Default)]
struct Inner {
    next_id: JobId,
    records: BTreeMap<JobId, JobRecord>,
    logs: HashMap<(JobId, u32), JobLog>,
    failures: Vec<FailureEntry>,
}

impl Inner {
    fn ensure_job(&self, job_id: JobId) -> StoreResult<()> {
        if self.records.contains_key(&job_id) {
            Ok(())
        } else {
            Err(StoreError::JobNotFound(job_id))
        }
    }

    fn existing_log(&mut self, job_id: JobId, array_index: Option<u32>) -> StoreResult<&mut JobLog> {
        self.logs
            .get_mut(&(job_id, array_index.unwrap_or(PARENT)))
            .ok_or(StoreError::LogNotFound { job_id, array_index })
    }

    /// Parent logs must exist; element logs are created on demand
    fn log_for_write(&mut self, job_id: JobId, array_index: Option<u32>) -> StoreResult<&mut JobLog> {
        self.ensure_job(job_id)?;
        match array_index {
            None => self.existing_log(job_id, None),
            Some(index) => Ok(self
                .logs
                .entry((job_id, index))
                .or_insert_with(|| JobLog::new(job_id, Some(index)))),
        }
    }

    fn progress(&mut self, job_id: JobId) -> StoreResult<&mut ArrayProgress> {
        self.existing_log(job_id, None)?
            .progress
            .as_mut()
            .ok_or(StoreError::NotArray(job_id))
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, spec: &JobSpec, entry: &HistoryEntry) -> StoreResult<JobRecord> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;

        let record = JobRecord {
            id: Some(id),
            spec: spec.clone(),
            created_at: Some(chrono::Utc::now()),
        };
        let mut log = JobLog::new(id, None);
        log.history.push(entry.clone());
        if spec.is_array() {
            log.progress = Some(ArrayProgress::default());
        }

        inner.records.insert(id, record.clone());
        inner.logs.insert((id, PARENT), log);
        for index in 1..=spec.array_size().unwrap_or(0) {
            let mut element = JobLog::new(id, Some(index));
            element.history.push(entry.clone());
            inner.logs.insert((id, index), element);
        }
        Ok(record)
    }

    async fn get(&self, job_id: JobId) -> StoreResult<Option<JobRecord>> {
        Ok(self.lock().records.get(&job_id).cloned())
    }

    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<JobRecord>> {
        Ok(self
            .lock()
            .records
            .values()
            .filter(|record| record.spec.owner_id.as_deref() == Some(owner_id))
            .cloned()
            .collect())
    }

    async fn log(&self, job_id: JobId, array_index: Option<u32>) -> StoreResult<Option<JobLog>> {
        Ok(self
            .lock()
            .logs
            .get(&(job_id, array_index.unwrap_or(PARENT)))
            .cloned())
    }

    async fn append_history(
        &self,
        job_id: JobId,
        array_index: Option<u32>,
        entry: &HistoryEntry,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.log_for_write(job_id, array_index)?.history.push(entry.clone());
        Ok(())
    }

    async fn transition(
        &self,
        job_id: JobId,
        array_index: Option<u32>,
        from: &[Status],
        entry: &HistoryEntry,
    ) -> StoreResult<bool> {
        let mut inner = self.lock();
        let log = inner.existing_log(job_id, array_index)?;
        match log.status() {
            Some(status) if from.contains(&status) => {
                log.history.push(entry.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_launch(&self, job_id: JobId, launch: &LaunchResult) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.existing_log(job_id, None)?.launch = Some(launch.clone());
        Ok(())
    }

    async fn set_result(
        &self,
        job_id: JobId,
        array_index: Option<u32>,
        result: &JobResult,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.log_for_write(job_id, array_index)?.result = Some(result.clone());
        Ok(())
    }

    async fn increment_started(&self, job_id: JobId) -> StoreResult<ArrayProgress> {
        let mut inner = self.lock();
        let progress = inner.progress(job_id)?;
        progress.num_started += 1;
        Ok(*progress)
    }

    async fn record_element_end(
        &self,
        job_id: JobId,
        result_type: ResultType,
    ) -> StoreResult<ArrayProgress> {
        let mut inner = self.lock();
        let progress = inner.progress(job_id)?;
        progress.num_ended += 1;
        match result_type {
            ResultType::Failure => progress.num_failed += 1,
            ResultType::Canceled => progress.num_canceled += 1,
            ResultType::Success => {}
        }
        Ok(*progress)
    }

    async fn add_failure(&self, entry: &FailureEntry) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.ensure_job(entry.job_id)?;
        inner.failures.push(entry.clone());
        Ok(())
    }

    async fn failures(&self, job_id: JobId) -> StoreResult<Vec<FailureEntry>> {
        Ok(self
            .lock()
            .failures
            .iter()
            .filter(|entry| entry.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, job_id: JobId) -> StoreResult<bool> {
        let mut inner = self.lock();
        if inner.records.remove(&job_id).is_none() {
            return Ok(false);
        }
        inner.logs.retain(|(id, _), _| *id != job_id);
        inner.failures.retain(|entry| entry.job_id != job_id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_core::domain::commands::Commands;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn spec(array_size: Option<u32>, owner: &str) -> JobSpec {
        JobSpec {
            container: None,
            commands: Commands::Script {
                commands: vec!["true".to_string()],
                array_size,
            },
            working_dir: PathBuf::from("/tmp"),
            env: BTreeMap::new(),
            args: BTreeMap::new(),
            dependencies: vec![],
            owner_id: Some(owner.to_string()),
            owner_listener_id: None,
            web_name: "t".to_string(),
            cluster_name: "t".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_parent_log() {
        let store = MemoryJobStore::new();
        let first = store
            .create(&spec(None, "a"), &HistoryEntry::now(Status::Submitted))
            .await
            .unwrap();
        let second = store
            .create(&spec(Some(2), "b"), &HistoryEntry::now(Status::Submitted))
            .await
            .unwrap();

        assert_eq!(first.id, Some(1));
        assert_eq!(second.id, Some(2));

        let log = store.log(1, None).await.unwrap().unwrap();
        assert_eq!(log.status(), Some(Status::Submitted));
        assert!(log.progress.is_none());

        let log = store.log(2, None).await.unwrap().unwrap();
        assert_eq!(log.progress, Some(ArrayProgress::default()));
        for index in 1..=2 {
            let element = store.log(2, Some(index)).await.unwrap().unwrap();
            assert_eq!(element.status(), Some(Status::Submitted));
        }
        assert!(store.log(2, Some(3)).await.unwrap().is_none());

        assert_eq!(store.list_by_owner("a").await.unwrap().len(), 1);
        assert!(store.list_by_owner("c").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let store = MemoryJobStore::new();
        store
            .create(&spec(None, "a"), &HistoryEntry::now(Status::Submitted))
            .await
            .unwrap();

        let launched = HistoryEntry::now(Status::Launched);
        assert!(store.transition(1, None, &[Status::Submitted], &launched).await.unwrap());
        assert!(!store.transition(1, None, &[Status::Submitted], &launched).await.unwrap());

        let log = store.log(1, None).await.unwrap().unwrap();
        assert_eq!(log.history.len(), 2);

        let missing = store.transition(9, None, &[Status::Submitted], &launched).await;
        assert!(matches!(missing, Err(StoreError::LogNotFound { job_id: 9, .. })));
    }

    #[tokio::test]
    async fn test_element_logs_created_on_append() {
        let store = MemoryJobStore::new();
        store
            .create(&spec(Some(3), "a"), &HistoryEntry::now(Status::Submitted))
            .await
            .unwrap();

        store
            .append_history(1, Some(2), &HistoryEntry::now(Status::Started))
            .await
            .unwrap();
        let element = store.log(1, Some(2)).await.unwrap().unwrap();
        assert_eq!(element.array_index, Some(2));
        assert_eq!(element.status(), Some(Status::Started));

        let unknown = store
            .append_history(5, Some(1), &HistoryEntry::now(Status::Started))
            .await;
        assert!(matches!(unknown, Err(StoreError::JobNotFound(5))));
    }

    #[tokio::test]
    async fn test_concurrent_counters() {
        let store = Arc::new(MemoryJobStore::new());
        store
            .create(&spec(Some(10), "a"), &HistoryEntry::now(Status::Submitted))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment_started(1).await.unwrap();
                let result_type = if i % 5 == 0 {
                    ResultType::Failure
                } else if i == 3 {
                    ResultType::Canceled
                } else {
                    ResultType::Success
                };
                store.record_element_end(1, result_type).await.unwrap()
            }));
        }

        let mut seen_all_ended = 0;
        for handle in handles {
            if handle.await.unwrap().num_ended == 10 {
                seen_all_ended += 1;
            }
        }
        assert_eq!(seen_all_ended, 1);

        let progress = store.log(1, None).await.unwrap().unwrap().progress.unwrap();
        assert_eq!(
            progress,
            ArrayProgress {
                num_started: 10,
                num_ended: 10,
                num_canceled: 1,
                num_failed: 2,
            }
        );
    }

    #[tokio::test]
    async fn test_counters_need_array_job() {
        let store = MemoryJobStore::new();
        store
            .create(&spec(None, "a"), &HistoryEntry::now(Status::Submitted))
            .await
            .unwrap();
        assert!(matches!(store.increment_started(1).await, Err(StoreError::NotArray(1))));
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let store = MemoryJobStore::new();
        store
            .create(&spec(Some(2), "a"), &HistoryEntry::now(Status::Submitted))
            .await
            .unwrap();
        store
            .append_history(1, Some(1), &HistoryEntry::now(Status::Started))
            .await
            .unwrap();
        store.add_failure(&FailureEntry::new(1, None, "lost")).await.unwrap();

        assert!(store.delete(1).await.unwrap());
        assert!(!store.delete(1).await.unwrap());
        assert!(store.get(1).await.unwrap().is_none());
        assert!(store.log(1, Some(1)).await.unwrap().is_none());
        assert!(store.failures(1).await.unwrap().is_empty());
    }
}
