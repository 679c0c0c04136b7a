//! Started / ended callbacks and owner aggregation

use herd_core::domain::job::{JobId, JobSpec};
use herd_core::domain::log::{ArrayProgress, HistoryEntry};
use herd_core::domain::result::{JobResult, ResultType};
use herd_core::domain::status::Status;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::service::Orchestrator;

impl Orchestrator {
    /// A job, or one element of an array job, began running
    pub async fn started(&self, job_id: JobId, array_index: Option<u32>) -> OrchestratorResult<()> {
        let record = self.record(job_id).await?;
        check_index(&record.spec, job_id, array_index)?;

        let parent = self.parent_log(job_id).await?;
        if parent.is_terminal() {
            tracing::warn!(job_id, ?array_index, "Start reported for finished job, ignoring");
            return Ok(());
        }

        let owner_id = record.spec.owner_id.as_deref();
        let entry = HistoryEntry::now(Status::Started);
        let from = [Status::Submitted, Status::Launched];

        match array_index {
            None => {
                if self.store.transition(job_id, None, &from, &entry).await? {
                    self.listeners.notify_start(owner_id, job_id);
                }
            }
            Some(index) => {
                if !self.store.transition(job_id, Some(index), &from, &entry).await? {
                    tracing::warn!(job_id, index, "Duplicate start for array element, ignoring");
                    return Ok(());
                }
                let progress = self.store.increment_started(job_id).await?;
                if progress.num_started == 1
                    && self.store.transition(job_id, None, &from, &entry).await?
                {
                    self.listeners.notify_start(owner_id, job_id);
                }
                self.listeners
                    .notify_start_array(owner_id, job_id, index, progress.num_started);
            }
        }

        tracing::debug!(job_id, ?array_index, "Job started");
        Ok(())
    }

    /// A job, or one element of an array job, finished
    pub async fn ended(
        &self,
        job_id: JobId,
        array_index: Option<u32>,
        exit_code: Option<i32>,
    ) -> OrchestratorResult<()> {
        let record = self.record(job_id).await?;
        let spec = &record.spec;
        check_index(spec, job_id, array_index)?;

        let parent = self.parent_log(job_id).await?;
        if array_index.is_none() && parent.is_terminal() {
            tracing::warn!(job_id, "End reported for finished job, ignoring");
            return Ok(());
        }

        let mut result = self
            .backend
            .result(job_id, spec, parent.launch.as_ref(), array_index)
            .await;
        if let Some(code) = exit_code {
            result.apply_exit_code(code);
        }
        let failures = self.store.failures(job_id).await?;
        if failures.iter().any(|failure| failure.applies_to(array_index)) {
            result.force_failure();
        }

        let owner_id = spec.owner_id.as_deref();

        let Some(index) = array_index else {
            if !self.finish(job_id).await? {
                tracing::warn!(job_id, "Job finished concurrently, dropping its reported end");
                return Ok(());
            }
            self.store.set_result(job_id, None, &result).await?;
            self.log_stream.stream_log_end(job_id, &result);
            tracing::info!(job_id, result_type = %result.result_type, "Job ended");
            self.listeners.notify_end(owner_id, job_id, result.result_type);
            self.spawn_cleanup(job_id, spec, &parent);
            self.complete_owner(spec).await;
            return Ok(());
        };

        let ended = HistoryEntry::now(Status::Ended);
        let never_started = if self
            .store
            .transition(job_id, Some(index), &[Status::Started, Status::Canceling], &ended)
            .await?
        {
            false
        } else if self
            .store
            .transition(job_id, Some(index), &[Status::Submitted, Status::Launched], &ended)
            .await?
        {
            true
        } else {
            tracing::warn!(job_id, index, "Duplicate end for array element, ignoring");
            return Ok(());
        };

        self.store.set_result(job_id, Some(index), &result).await?;
        if index == 1 {
            self.log_stream.stream_log_end(job_id, &result);
        }

        // its start was lost, count it so started never trails ended
        if never_started {
            self.store.increment_started(job_id).await?;
        }
        let progress = self
            .store
            .record_element_end(job_id, result.result_type)
            .await?;
        self.listeners.notify_end_array(
            owner_id,
            job_id,
            index,
            progress.num_ended,
            progress.num_canceled,
            progress.num_failed,
        );

        // re-read: a cancel may have landed since the first read
        let parent = self.parent_log(job_id).await?;
        let canceling = parent.has_seen(Status::Canceling);
        let size = spec.array_size().unwrap_or(0);
        let all_ended = progress.num_ended >= size
            || (canceling && progress.num_started == progress.num_ended);
        if !all_ended {
            return Ok(());
        }

        if self.finish(job_id).await? {
            let aggregate = aggregate_result(&progress, size, canceling);
            tracing::info!(job_id, result_type = %aggregate.result_type, "Array job ended");
            self.store.set_result(job_id, None, &aggregate).await?;
            self.listeners
                .notify_end(owner_id, job_id, aggregate.result_type);
            self.spawn_cleanup(job_id, spec, &parent);
            self.complete_owner(spec).await;
        }
        Ok(())
    }

    /// Fires the owner listener once every job of the owner is terminal
    pub(crate) async fn complete_owner(&self, spec: &JobSpec) {
        let (Some(owner_id), Some(listener_id)) = (&spec.owner_id, &spec.owner_listener_id) else {
            return;
        };
        let Some(listener) = self.listeners.owner_listener(listener_id) else {
            return;
        };

        match self.owner_outcome(owner_id).await {
            Ok(Some(result_type)) => {
                if self.listeners.claim_owner_completion(owner_id) {
                    tracing::info!(owner_id, %result_type, "Owner completed");
                    listener.ended(owner_id, result_type);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(owner_id, "Failed to check owner completion: {}", e),
        }
    }

    /// Result type of the most recently finished job of an owner, or `None`
    /// while any job is still running.
    ///
    /// A terminal job without a result is still being finalized; whoever
    /// finalizes it checks again afterwards.
    async fn owner_outcome(&self, owner_id: &str) -> OrchestratorResult<Option<ResultType>> {
        let mut latest: Option<(chrono::DateTime<chrono::Utc>, ResultType)> = None;

        for record in self.store.list_by_owner(owner_id).await? {
            let Some(job_id) = record.id else { continue };
            let Some(log) = self.store.log(job_id, None).await? else {
                continue;
            };
            if !log.is_terminal() {
                return Ok(None);
            }
            let Some(result) = &log.result else {
                return Ok(None);
            };
            if let Some(at) = log.last_transition() {
                if latest.is_none_or(|(latest_at, _)| at >= latest_at) {
                    latest = Some((at, result.result_type));
                }
            }
        }

        Ok(Some(
            latest
                .map(|(_, result_type)| result_type)
                .unwrap_or(ResultType::Failure),
        ))
    }
}

/// Array jobs need an index in `1..=size`; plain jobs must not have one
fn check_index(spec: &JobSpec, job_id: JobId, array_index: Option<u32>) -> OrchestratorResult<()> {
    match (spec.array_size(), array_index) {
        (None, None) => Ok(()),
        (Some(size), Some(index)) if (1..=size).contains(&index) => Ok(()),
        (Some(size), Some(index)) => Err(OrchestratorError::Validation(format!(
            "array index {} out of range 1..={} for job {}",
            index, size, job_id
        ))),
        (Some(_), None) => Err(OrchestratorError::Validation(format!(
            "job {} is an array job, an array index is required",
            job_id
        ))),
        (None, Some(_)) => Err(OrchestratorError::Validation(format!(
            "job {} is not an array job",
            job_id
        ))),
    }
}

/// Parent result of a finished array job
pub(crate) fn aggregate_result(progress: &ArrayProgress, size: u32, canceling: bool) -> JobResult {
    let result_type = match progress.aggregate() {
        ResultType::Success if canceling => ResultType::Canceled,
        other => other,
    };
    let summary = format!(
        "{}/{} element(s) ended, {} failed, {} canceled",
        progress.num_ended, size, progress.num_failed, progress.num_canceled
    );
    match result_type {
        ResultType::Success => JobResult::success(summary),
        ResultType::Failure => JobResult::failure(summary),
        ResultType::Canceled => JobResult {
            output: summary,
            ..JobResult::canceled("canceled while running")
        },
    }
}
