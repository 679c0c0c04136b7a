//! Orchestrator
//!
//! Holds the injected collaborators and the read-side operations. The
//! state-changing operations live in the sibling modules.

use herd_core::backend::{BackendEvent, BackendPort};
use herd_core::domain::failure::FailureEntry;
use herd_core::domain::job::{JobId, JobRecord, JobSpec};
use herd_core::domain::log::{HistoryEntry, JobLog};
use herd_core::domain::result::JobResult;
use herd_core::domain::status::Status;
use herd_core::dto::job::JobView;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::listener::ListenerRegistry;
use crate::render::CommandRenderer;
use crate::repository::JobStore;
use crate::service::log_stream::{LogStream, TracingLogStream};

/// Every status a job can leave
pub(crate) const NON_TERMINAL: [Status; 4] = [
    Status::Submitted,
    Status::Launched,
    Status::Started,
    Status::Canceling,
];

pub struct Orchestrator {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) backend: Arc<dyn BackendPort>,
    pub(crate) listeners: Arc<ListenerRegistry>,
    pub(crate) log_stream: Arc<dyn LogStream>,
    pub(crate) renderer: CommandRenderer,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        backend: Arc<dyn BackendPort>,
        listeners: Arc<ListenerRegistry>,
        renderer: CommandRenderer,
    ) -> Self {
        Self {
            store,
            backend,
            listeners,
            log_stream: Arc::new(TracingLogStream),
            renderer,
        }
    }

    pub fn with_log_stream(mut self, log_stream: Arc<dyn LogStream>) -> Self {
        self.log_stream = log_stream;
        self
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Record and parent log of a job
    pub async fn job(&self, job_id: JobId) -> OrchestratorResult<JobView> {
        let record = self.record(job_id).await?;
        let log = self.parent_log(job_id).await?;
        Ok(JobView { record, log })
    }

    /// Log of a job (`array_index == None`) or of one array element
    pub async fn log(&self, job_id: JobId, array_index: Option<u32>) -> OrchestratorResult<JobLog> {
        self.store
            .log(job_id, array_index)
            .await?
            .ok_or_else(|| match array_index {
                Some(index) => OrchestratorError::NotFound(format!("job {} element {}", job_id, index)),
                None => OrchestratorError::NotFound(format!("job {}", job_id)),
            })
    }

    pub async fn jobs_for_owner(&self, owner_id: &str) -> OrchestratorResult<Vec<JobView>> {
        let records = self.store.list_by_owner(owner_id).await?;
        let mut views = Vec::with_capacity(records.len());
        for record in records {
            let Some(job_id) = record.id else { continue };
            // deleted concurrently
            if let Some(log) = self.store.log(job_id, None).await? {
                views.push(JobView { record, log });
            }
        }
        Ok(views)
    }

    /// Stores an out-of-band failure; the job's result becomes `Failure`
    /// when it ends
    pub async fn record_failure(
        &self,
        job_id: JobId,
        array_index: Option<u32>,
        message: impl Into<String>,
    ) -> OrchestratorResult<FailureEntry> {
        let entry = FailureEntry::new(job_id, array_index, message);
        self.store.add_failure(&entry).await?;
        tracing::warn!(job_id, ?array_index, "Failure recorded: {}", entry.message);
        Ok(entry)
    }

    /// Asks the backend why a launched job has not started yet
    pub async fn waiting_reason(&self, job_id: JobId) -> OrchestratorResult<Option<String>> {
        let log = self.parent_log(job_id).await?;
        if log.status() != Some(Status::Launched) {
            return Ok(None);
        }
        match &log.launch {
            Some(launch) => Ok(self.backend.waiting_reason(launch).await),
            None => Ok(None),
        }
    }

    /// Pumps lifecycle events from an in-process backend.
    ///
    /// Starts are handled in arrival order; every end runs on its own task.
    pub async fn drive(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<BackendEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                BackendEvent::Started { job_id, array_index } => {
                    if let Err(e) = self.started(job_id, array_index).await {
                        tracing::warn!(job_id, ?array_index, "Failed to handle start: {}", e);
                    }
                }
                BackendEvent::Ended {
                    job_id,
                    array_index,
                    exit_code,
                } => {
                    let orchestrator = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = orchestrator.ended(job_id, array_index, exit_code).await {
                            tracing::warn!(job_id, ?array_index, "Failed to handle end: {}", e);
                        }
                    });
                }
            }
        }
        tracing::info!("Backend event channel closed");
    }

    pub(crate) async fn record(&self, job_id: JobId) -> OrchestratorResult<JobRecord> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("job {}", job_id)))
    }

    pub(crate) async fn parent_log(&self, job_id: JobId) -> OrchestratorResult<JobLog> {
        self.log(job_id, None).await
    }

    /// Appends `Ended` unless the job already is terminal.
    ///
    /// Exactly one caller gets `true` for a job.
    pub(crate) async fn finish(&self, job_id: JobId) -> OrchestratorResult<bool> {
        Ok(self
            .store
            .transition(job_id, None, &NON_TERMINAL, &HistoryEntry::now(Status::Ended))
            .await?)
    }

    /// Finalizes a job that will never report back.
    ///
    /// `result` is only stored by the caller that wins the transition, so a
    /// late finalizer never replaces the outcome already reported.
    pub(crate) async fn finalize_now(
        &self,
        job_id: JobId,
        spec: &JobSpec,
        result: &JobResult,
    ) -> OrchestratorResult<bool> {
        if !self.finish(job_id).await? {
            return Ok(false);
        }
        self.store.set_result(job_id, None, result).await?;
        self.listeners
            .notify_end(spec.owner_id.as_deref(), job_id, result.result_type);
        Ok(true)
    }

    /// Deletes the staged script and backend-declared leftovers in the
    /// background
    pub(crate) fn spawn_cleanup(&self, job_id: JobId, spec: &JobSpec, log: &JobLog) {
        let mut paths: Vec<PathBuf> = vec![spec.script_path(job_id)];
        if let Some(launch) = &log.launch {
            paths.extend(launch.cleanup.iter().cloned());
        }
        let backend = self.backend.clone();
        tokio::spawn(async move {
            backend.delete_files(&paths).await;
            tracing::debug!(job_id, "Cleaned up {} file(s)", paths.len());
        });
    }
}
