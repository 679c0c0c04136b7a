//! Job submission

use herd_core::backend::{CancelTarget, LaunchRequest};
use herd_core::domain::job::{JobId, JobRecord, JobSpec};
use herd_core::domain::log::HistoryEntry;
use herd_core::domain::result::JobResult;
use herd_core::domain::status::Status;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::service::Orchestrator;

impl Orchestrator {
    /// Persists and launches a job.
    ///
    /// Returns `None` when the backend had nothing to queue. A launch
    /// failure finalizes the job as `Failure` before the error is returned.
    pub async fn submit(&self, record: JobRecord) -> OrchestratorResult<Option<JobId>> {
        if let Some(id) = record.id {
            return Err(OrchestratorError::InvalidState(format!(
                "job {} was already submitted",
                id
            )));
        }
        let spec = record.spec;

        if let Some(listener_id) = &spec.owner_listener_id {
            if !self.listeners.has_owner_listener(listener_id) {
                return Err(OrchestratorError::InvalidState(format!(
                    "owner listener {} is not registered",
                    listener_id
                )));
            }
        }
        self.renderer.check(&spec)?;
        self.backend.validate(&spec)?;

        let record = self
            .store
            .create(&spec, &HistoryEntry::now(Status::Submitted))
            .await?;
        let job_id = record
            .id
            .ok_or_else(|| OrchestratorError::InvalidState("store returned a job without id".into()))?;

        tracing::info!(
            job_id,
            backend = self.backend.name(),
            "Job created: {}",
            spec.web_name
        );

        if let Some(owner_id) = &spec.owner_id {
            self.listeners.reset_owner(owner_id);
        }
        self.listeners.notify_submit(&record);

        match self.launch(job_id, &spec).await {
            Ok(launched) => Ok(launched),
            Err(err) => {
                let console = match &err {
                    OrchestratorError::LaunchFailed(launch) => launch.console.clone(),
                    other => other.to_string(),
                };
                self.fail_submission(job_id, &spec, console).await;
                Err(err)
            }
        }
    }

    async fn launch(&self, job_id: JobId, spec: &JobSpec) -> OrchestratorResult<Option<JobId>> {
        let dependencies = self.resolve_dependencies(spec).await?;
        let rendered = self.renderer.render(job_id, spec)?;
        self.backend
            .stage(&rendered.folders, &rendered.files())
            .await?;

        let request = LaunchRequest {
            job_id,
            spec,
            dependencies: &dependencies,
            script_path: &rendered.script_path,
            command: &rendered.command,
        };

        let Some(launch) = self.backend.launch(request).await? else {
            tracing::info!(job_id, "Nothing to launch");
            self.finalize_now(job_id, spec, &JobResult::success(""))
                .await?;
            self.complete_owner(spec).await;
            return Ok(None);
        };

        self.store.set_launch(job_id, &launch).await?;
        let launched = self
            .store
            .transition(job_id, None, &[Status::Submitted], &HistoryEntry::now(Status::Launched))
            .await?;
        tracing::info!(job_id, native_id = %launch.native_id, "Job launched");

        if !launched {
            // canceled while the backend was queueing it
            let log = self.parent_log(job_id).await?;
            if log.is_terminal() || log.status() == Some(Status::Canceling) {
                let target = CancelTarget {
                    job_id,
                    native_id: launch.native_id.clone(),
                };
                if let Err(e) = self.backend.cancel(&[target]).await {
                    tracing::warn!(job_id, "Failed to cancel job launched after cancel: {}", e);
                }
            }
        }

        Ok(Some(job_id))
    }

    /// Translates `<jobId>[_<index>]` dependencies to native ids
    async fn resolve_dependencies(&self, spec: &JobSpec) -> OrchestratorResult<Vec<String>> {
        let mut resolved = Vec::with_capacity(spec.dependencies.len());

        for dependency in &spec.dependencies {
            let (job_part, index_part) = match dependency.split_once('_') {
                Some((job, index)) => (job, Some(index)),
                None => (dependency.as_str(), None),
            };
            let dependency_id: JobId = job_part.parse().map_err(|_| {
                OrchestratorError::Validation(format!("invalid dependency id: {}", dependency))
            })?;

            let log = self.parent_log(dependency_id).await?;
            let launch = log.launch.ok_or_else(|| {
                OrchestratorError::InvalidState(format!(
                    "dependency {} has not been launched",
                    dependency_id
                ))
            })?;

            let native = match index_part {
                Some(index) => format!("{}_{}", launch.native_id, index),
                None => launch.native_id,
            };
            self.backend.validate_dependency(&native)?;
            resolved.push(native);
        }

        Ok(resolved)
    }

    /// Finalizes a job whose launch never happened
    async fn fail_submission(&self, job_id: JobId, spec: &JobSpec, console: String) {
        tracing::error!(job_id, "Launch failed: {}", console);

        match self.finalize_now(job_id, spec, &JobResult::failure(console)).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                tracing::error!(job_id, "Failed to finalize job after launch failure: {}", e);
                return;
            }
        }

        // no element will ever report, close them all for observers
        if let Some(size) = spec.array_size() {
            let owner_id = spec.owner_id.as_deref();
            for index in 1..=size {
                self.listeners.notify_start_array(owner_id, job_id, index, index);
                self.listeners
                    .notify_end_array(owner_id, job_id, index, index, 0, index);
            }
        }

        self.complete_owner(spec).await;
    }
}
