//! Health Check API Handler

use axum::{Json, extract::State};
use herd_core::dto::health::HealthResponse;
use std::sync::Arc;

use crate::service::Orchestrator;

/// GET /health
///
/// Reports which backend this orchestrator launches jobs on.
pub async fn health_check(State(orchestrator): State<Arc<Orchestrator>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        backend: orchestrator.backend_name().to_string(),
    })
}
