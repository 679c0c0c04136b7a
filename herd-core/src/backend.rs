//! Backend port
//!
//! The interface every execution backend implements: a real batch
//! scheduler, a local pseudo-cluster or a load-test stub. The orchestrator
//! only ever talks to a backend through [`BackendPort`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::job::{JobId, JobSpec};
use crate::domain::log::LaunchResult;
use crate::domain::result::JobResult;

/// Errors raised by backend validation, staging and control commands
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid job: {0}")]
    Invalid(String),

    #[error("invalid dependency id: {0}")]
    InvalidDependency(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend command failed: {0}")]
    Command(String),
}

/// The backend refused to queue a job
///
/// Carries whatever the backend printed so it can be stored as the job output.
#[derive(Debug, Clone, Error)]
#[error("launch failed: {message}")]
pub struct LaunchError {
    pub message: String,
    pub console: String,
}

impl LaunchError {
    pub fn new(message: impl Into<String>, console: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            console: console.into(),
        }
    }
}

/// Shell details the script renderer needs from a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDialect {
    /// Variable exported with the job directory
    pub submit_dir_var: String,
    /// Variable holding the 1-based array index at runtime
    pub array_index_var: String,
    /// Command used by scripts to report started/ended.
    /// `None` when the backend observes its processes itself.
    pub notify_command: Option<String>,
}

impl ScriptDialect {
    pub fn slurm(notify_command: impl Into<String>) -> Self {
        Self {
            submit_dir_var: "SLURM_SUBMIT_DIR".to_string(),
            array_index_var: "SLURM_ARRAY_TASK_ID".to_string(),
            notify_command: Some(notify_command.into()),
        }
    }

    pub fn local() -> Self {
        Self {
            submit_dir_var: "HERD_SUBMIT_DIR".to_string(),
            array_index_var: "HERD_ARRAY_INDEX".to_string(),
            notify_command: None,
        }
    }
}

/// A file the backend must write before launching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    pub contents: String,
    pub executable: bool,
}

/// Everything a backend needs to queue one job
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    pub job_id: JobId,
    pub spec: &'a JobSpec,
    /// Dependencies already translated to native ids
    pub dependencies: &'a [String],
    pub script_path: &'a Path,
    /// Shell command to queue
    pub command: &'a str,
}

/// A launched job the backend should cancel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelTarget {
    pub job_id: JobId,
    pub native_id: String,
}

/// Lifecycle signal from a backend that watches its own processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendEvent {
    Started {
        job_id: JobId,
        array_index: Option<u32>,
    },
    Ended {
        job_id: JobId,
        array_index: Option<u32>,
        exit_code: Option<i32>,
    },
}

/// Pluggable execution backend
#[async_trait]
pub trait BackendPort: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn dialect(&self) -> ScriptDialect;

    /// Format and sanity checks only; no I/O
    fn validate(&self, spec: &JobSpec) -> Result<(), BackendError>;

    /// Checks one already-translated dependency id
    fn validate_dependency(&self, native_id: &str) -> Result<(), BackendError>;

    /// Creates folders and writes files. Safe to repeat.
    async fn stage(&self, folders: &[PathBuf], files: &[StagedFile]) -> Result<(), BackendError>;

    /// Queues the job.
    ///
    /// `Ok(None)` means nothing was queued (e.g. a zero-element array).
    async fn launch(&self, request: LaunchRequest<'_>) -> Result<Option<LaunchResult>, LaunchError>;

    /// Best-effort batch cancel; completion is reported separately
    async fn cancel(&self, targets: &[CancelTarget]) -> Result<(), BackendError>;

    /// Final result of a job or element.
    ///
    /// Never fails: a job that crashed or produced nothing still gets a result.
    async fn result(
        &self,
        job_id: JobId,
        spec: &JobSpec,
        launch: Option<&LaunchResult>,
        array_index: Option<u32>,
    ) -> JobResult;

    /// Best-effort; failures are logged
    async fn delete_files(&self, paths: &[PathBuf]);

    /// Why a launched job is still queued, if the backend can tell
    async fn waiting_reason(&self, launch: &LaunchResult) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialects() {
        let slurm = ScriptDialect::slurm("herd notify");
        assert_eq!(slurm.array_index_var, "SLURM_ARRAY_TASK_ID");
        assert_eq!(slurm.notify_command.as_deref(), Some("herd notify"));

        let local = ScriptDialect::local();
        assert!(local.notify_command.is_none());
    }

    #[test]
    fn test_launch_error_display() {
        let err = LaunchError::new("sbatch exited with 1", "invalid partition");
        assert_eq!(err.to_string(), "launch failed: sbatch exited with 1");
        assert_eq!(err.console, "invalid partition");
    }
}
