//! Owner API Handlers
//!
//! Operations over every job of one owner (pipeline stage or session).

use axum::{
    Json,
    extract::{Path, State},
};
use herd_core::dto::job::JobView;
use herd_core::dto::owner::{CancelResponse, DeleteResponse};
use std::sync::Arc;

use crate::api::error::ApiResult;
use crate::service::Orchestrator;

/// GET /api/owners/{owner}/jobs
pub async fn list_jobs(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(owner): Path<String>,
) -> ApiResult<Json<Vec<JobView>>> {
    Ok(Json(orchestrator.jobs_for_owner(&owner).await?))
}

/// POST /api/owners/{owner}/cancel
pub async fn cancel_all(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(owner): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    tracing::info!("Canceling jobs of owner: {}", owner);

    let outcome = orchestrator.cancel_all(&owner).await?;
    Ok(Json(CancelResponse { outcome }))
}

/// DELETE /api/owners/{owner}
pub async fn delete_all(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(owner): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    let deleted = orchestrator.delete_all(&owner).await?;
    Ok(Json(DeleteResponse { deleted }))
}
