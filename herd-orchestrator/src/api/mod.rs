//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod job;
pub mod owner;

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::service::Orchestrator;

/// Create the main API router with all endpoints
pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job endpoints
        .route("/api/jobs", post(job::submit_job))
        .route("/api/jobs/{id}", get(job::get_job).delete(job::delete_job))
        .route("/api/jobs/{id}/log", get(job::get_job_log))
        .route("/api/jobs/{id}/waiting", get(job::get_waiting_reason))
        .route("/api/jobs/{id}/started", post(job::job_started))
        .route("/api/jobs/{id}/ended", post(job::job_ended))
        .route("/api/jobs/{id}/failures", post(job::report_failure))
        // Owner endpoints
        .route("/api/owners/{owner}/jobs", get(owner::list_jobs))
        .route("/api/owners/{owner}/cancel", post(owner::cancel_all))
        .route("/api/owners/{owner}", delete(owner::delete_all))
        // Add state and middleware
        .with_state(orchestrator)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use herd_backend::{LoadTestBackend, LoadTestConfig};
    use herd_core::backend::BackendPort;
    use std::collections::HashMap;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::listener::{ListenerRegistry, LoggingListener};
    use crate::render::{CommandRenderer, ContainerWrapper};
    use crate::repository::MemoryJobStore;

    fn app() -> Router {
        let (backend, events) = LoadTestBackend::new(LoadTestConfig {
            element_duration: Duration::from_millis(20),
            fail_every: None,
        });
        let listeners = Arc::new(ListenerRegistry::new());
        listeners.register_owner_listener("log", Arc::new(LoggingListener));

        let renderer = CommandRenderer::new(
            backend.dialect(),
            ContainerWrapper::new("apptainer", "/data"),
            HashMap::new(),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(backend),
            listeners,
            renderer,
        ));
        tokio::spawn(orchestrator.clone().drive(events));
        create_router(orchestrator)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(json) => Body::from(json.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn job_spec(array_size: Option<u32>) -> serde_json::Value {
        serde_json::json!({
            "commands": {"type": "script", "commands": ["echo hi"], "array_size": array_size},
            "working_dir": "/data/p1/job",
            "owner_id": "stage-1",
            "owner_listener_id": "log",
            "web_name": "Echo",
            "cluster_name": "echo"
        })
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["backend"], "loadtest");
    }

    #[tokio::test]
    async fn test_submitted_array_job_runs_to_completion() {
        let app = app();
        let (status, body) = send(&app, "POST", "/api/jobs", Some(job_spec(Some(3)))).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["id"].as_i64().unwrap();

        let mut ended = false;
        for _ in 0..100 {
            let (_, view) = send(&app, "GET", &format!("/api/jobs/{}", id), None).await;
            if view["log"]["history"].as_array().unwrap().last().unwrap()["status"] == "Ended" {
                assert_eq!(view["log"]["progress"]["num_ended"], 3);
                assert_eq!(view["log"]["result"]["result_type"], "Success");
                ended = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(ended, "job {} never ended", id);

        let (status, element) = send(&app, "GET", &format!("/api/jobs/{}/log?array_index=2", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(element["array_index"], 2);

        let (_, jobs) = send(&app, "GET", "/api/owners/stage-1/jobs", None).await;
        assert_eq!(jobs.as_array().unwrap().len(), 1);

        let (_, deleted) = send(&app, "DELETE", "/api/owners/stage-1", None).await;
        assert_eq!(deleted["deleted"], 1);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = app();

        let (status, body) = send(&app, "GET", "/api/jobs/404", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());

        let mut spec = job_spec(None);
        spec["owner_listener_id"] = serde_json::json!("unregistered");
        let (status, _) = send(&app, "POST", "/api/jobs", Some(spec)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = send(&app, "POST", "/api/jobs", Some(job_spec(Some(2)))).await;
        let id = body["id"].as_i64().unwrap();
        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/jobs/{}/started", id),
            Some(serde_json::json!({"array_index": 7})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_unknown_owner() {
        let (status, body) = send(&app(), "POST", "/api/owners/nobody/cancel", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "UnknownJob");
    }
}
