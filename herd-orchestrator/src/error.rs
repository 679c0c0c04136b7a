//! Orchestrator error types

use herd_core::backend::{BackendError, LaunchError};
use thiserror::Error;

use crate::render::RenderError;
use crate::repository::StoreError;

/// Errors surfaced by [`crate::service::Orchestrator`] operations
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No persisted record or log for the given id
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller-side sequencing bug, e.g. re-submitting a job
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// The backend refused the job; it has been finalized as a failure
    #[error(transparent)]
    LaunchFailed(#[from] LaunchError),

    #[error("backend error: {0}")]
    Backend(BackendError),

    #[error("store error: {0}")]
    Store(StoreError),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::JobNotFound(_) | StoreError::LogNotFound { .. } => {
                OrchestratorError::NotFound(err.to_string())
            }
            other => OrchestratorError::Store(other),
        }
    }
}

impl From<BackendError> for OrchestratorError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Invalid(_) | BackendError::InvalidDependency(_) => {
                OrchestratorError::Validation(err.to_string())
            }
            other => OrchestratorError::Backend(other),
        }
    }
}

impl From<RenderError> for OrchestratorError {
    fn from(err: RenderError) -> Self {
        OrchestratorError::Validation(err.to_string())
    }
}
