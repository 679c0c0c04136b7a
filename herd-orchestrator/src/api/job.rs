//! Job API Handlers
//!
//! Submission, reads and the lifecycle callbacks that job scripts send
//! through `herd notify`.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use herd_core::domain::failure::FailureEntry;
use herd_core::domain::job::{JobId, JobRecord, JobSpec};
use herd_core::domain::log::JobLog;
use herd_core::dto::job::{
    ArrayIndexQuery, EndedNotice, FailureReport, JobView, StartedNotice, SubmitResponse,
    WaitingReason,
};
use std::sync::Arc;

use crate::api::error::ApiResult;
use crate::service::Orchestrator;

/// POST /api/jobs
pub async fn submit_job(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(spec): Json<JobSpec>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    tracing::info!("Submitting job: {}", spec.web_name);

    let id = orchestrator.submit(JobRecord::new(spec)).await?;
    Ok((StatusCode::CREATED, Json(SubmitResponse { id })))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<JobView>> {
    tracing::debug!("Getting job: {}", id);

    Ok(Json(orchestrator.job(id).await?))
}

/// GET /api/jobs/{id}/log?array_index=N
pub async fn get_job_log(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<JobId>,
    Query(query): Query<ArrayIndexQuery>,
) -> ApiResult<Json<JobLog>> {
    Ok(Json(orchestrator.log(id, query.array_index).await?))
}

/// GET /api/jobs/{id}/waiting
pub async fn get_waiting_reason(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<JobId>,
) -> ApiResult<Json<WaitingReason>> {
    let reason = orchestrator.waiting_reason(id).await?;
    Ok(Json(WaitingReason { reason }))
}

/// POST /api/jobs/{id}/started
pub async fn job_started(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<JobId>,
    Json(notice): Json<StartedNotice>,
) -> ApiResult<StatusCode> {
    orchestrator.started(id, notice.array_index).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/jobs/{id}/ended
pub async fn job_ended(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<JobId>,
    Json(notice): Json<EndedNotice>,
) -> ApiResult<StatusCode> {
    orchestrator
        .ended(id, notice.array_index, notice.exit_code)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/jobs/{id}/failures
pub async fn report_failure(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<JobId>,
    Json(report): Json<FailureReport>,
) -> ApiResult<(StatusCode, Json<FailureEntry>)> {
    let entry = orchestrator
        .record_failure(id, report.array_index, report.message)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// DELETE /api/jobs/{id}
pub async fn delete_job(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(id): Path<JobId>,
) -> ApiResult<StatusCode> {
    orchestrator.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
