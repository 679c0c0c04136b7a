//! Owner-wide cancellation and deletion

use herd_core::backend::CancelTarget;
use herd_core::domain::job::{JobId, JobRecord};
use herd_core::domain::log::HistoryEntry;
use herd_core::domain::result::{JobResult, ResultType};
use herd_core::domain::status::{CancelOutcome, Status};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::service::Orchestrator;
use crate::service::lifecycle::aggregate_result;

/// Attempts per job before giving up on a status that keeps moving
const CANCEL_ATTEMPTS: usize = 3;

const CANCELED_BEFORE_START: &str = "canceled before start";
const ABANDONED: &str = "abandoned after repeated cancel";

impl Orchestrator {
    /// Cancels every job of an owner
    pub async fn cancel_all(&self, owner_id: &str) -> OrchestratorResult<CancelOutcome> {
        let records = self.store.list_by_owner(owner_id).await?;
        if records.is_empty() {
            return Ok(CancelOutcome::UnknownJob);
        }

        let mut targets = Vec::new();
        let mut awaiting = false;
        for record in &records {
            let Some(job_id) = record.id else { continue };
            if self.cancel_job(job_id, record, &mut targets).await? {
                awaiting = true;
            }
        }

        if !targets.is_empty() {
            tracing::info!(owner_id, "Requesting backend cancel of {} job(s)", targets.len());
            if let Err(e) = self.backend.cancel(&targets).await {
                tracing::warn!(owner_id, "Backend cancel failed: {}", e);
            }
        }

        if awaiting {
            return Ok(CancelOutcome::CancelRequested);
        }

        // nothing left to report back
        let listener = records
            .iter()
            .find_map(|record| record.spec.owner_listener_id.as_deref())
            .and_then(|listener_id| self.listeners.owner_listener(listener_id));
        if let Some(listener) = listener {
            if self.listeners.claim_owner_completion(owner_id) {
                listener.ended(owner_id, ResultType::Canceled);
            }
        }
        Ok(CancelOutcome::AllCanceled)
    }

    /// Moves one job towards a canceled state.
    ///
    /// Returns `true` when an `ended` callback is still expected.
    async fn cancel_job(
        &self,
        job_id: JobId,
        record: &JobRecord,
        targets: &mut Vec<CancelTarget>,
    ) -> OrchestratorResult<bool> {
        let spec = &record.spec;
        let canceling = HistoryEntry::now(Status::Canceling);

        for _ in 0..CANCEL_ATTEMPTS {
            let log = self.parent_log(job_id).await?;

            match log.status() {
                None => {
                    self.store.append_history(job_id, None, &canceling).await?;
                    self.finalize_now(job_id, spec, &JobResult::canceled(CANCELED_BEFORE_START))
                        .await?;
                    return Ok(false);
                }
                Some(Status::Submitted) => {
                    if self
                        .store
                        .transition(job_id, None, &[Status::Submitted], &canceling)
                        .await?
                    {
                        self.finalize_now(job_id, spec, &JobResult::canceled(CANCELED_BEFORE_START))
                            .await?;
                        return Ok(false);
                    }
                }
                Some(Status::Launched) => {
                    if self
                        .store
                        .transition(job_id, None, &[Status::Launched], &canceling)
                        .await?
                    {
                        if let Some(launch) = &log.launch {
                            targets.push(CancelTarget {
                                job_id,
                                native_id: launch.native_id.clone(),
                            });
                        }
                        if self
                            .finalize_now(job_id, spec, &JobResult::canceled(CANCELED_BEFORE_START))
                            .await?
                        {
                            self.spawn_cleanup(job_id, spec, &log);
                        }
                        return Ok(false);
                    }
                }
                Some(Status::Started) => {
                    if self
                        .store
                        .transition(job_id, None, &[Status::Started], &canceling)
                        .await?
                    {
                        if let Some(launch) = &log.launch {
                            targets.push(CancelTarget {
                                job_id,
                                native_id: launch.native_id.clone(),
                            });
                        }
                        return self.finish_drained_array(job_id, record).await.map(|done| !done);
                    }
                }
                Some(Status::Canceling) => {
                    if self
                        .store
                        .transition(job_id, None, &[Status::Canceling], &HistoryEntry::now(Status::Abandoned))
                        .await?
                    {
                        tracing::warn!(job_id, "Job did not react to cancel, abandoning it");
                        self.store
                            .set_result(job_id, None, &JobResult::canceled(ABANDONED))
                            .await?;
                        self.listeners
                            .notify_end(spec.owner_id.as_deref(), job_id, ResultType::Canceled);
                        return Ok(false);
                    }
                }
                Some(Status::Ended) | Some(Status::Abandoned) => return Ok(false),
            }
        }

        tracing::warn!(job_id, "Job status kept changing during cancel");
        Ok(true)
    }

    /// Finalizes a canceled array job whose started elements have all
    /// ended, since no further `ended` call can arrive for it.
    ///
    /// Returns whether the job is finished.
    async fn finish_drained_array(&self, job_id: JobId, record: &JobRecord) -> OrchestratorResult<bool> {
        let spec = &record.spec;
        let Some(size) = spec.array_size() else {
            return Ok(false);
        };
        let log = self.parent_log(job_id).await?;
        let Some(progress) = log.progress else {
            return Ok(false);
        };
        if progress.num_started != progress.num_ended {
            return Ok(false);
        }

        if self.finish(job_id).await? {
            let aggregate = aggregate_result(&progress, size, true);
            self.store.set_result(job_id, None, &aggregate).await?;
            self.listeners
                .notify_end(spec.owner_id.as_deref(), job_id, aggregate.result_type);
            self.spawn_cleanup(job_id, spec, &log);
        }
        Ok(true)
    }

    pub async fn delete(&self, job_id: JobId) -> OrchestratorResult<()> {
        if !self.store.delete(job_id).await? {
            return Err(OrchestratorError::NotFound(format!("job {}", job_id)));
        }
        tracing::info!(job_id, "Job deleted");
        Ok(())
    }

    /// Deletes every job of an owner, returning how many were removed
    pub async fn delete_all(&self, owner_id: &str) -> OrchestratorResult<usize> {
        let mut deleted = 0;
        for record in self.store.list_by_owner(owner_id).await? {
            let Some(job_id) = record.id else { continue };
            if self.store.delete(job_id).await? {
                deleted += 1;
            }
        }
        tracing::info!(owner_id, deleted, "Owner jobs deleted");
        Ok(deleted)
    }
}
