//! API client module
//!
//! HTTP client for communicating with the Herd orchestrator API.

use anyhow::{Context, Result};
use herd_core::domain::failure::FailureEntry;
use herd_core::domain::job::{JobId, JobSpec};
use herd_core::domain::log::JobLog;
use herd_core::dto::job::{
    EndedNotice, FailureReport, JobView, StartedNotice, SubmitResponse, WaitingReason,
};
use herd_core::dto::owner::{CancelResponse, DeleteResponse};
use reqwest::Client;

/// HTTP client for the Herd orchestrator API
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    /// Create a new API client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the orchestrator API
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Submit a job
    ///
    /// # Returns
    /// The new job id, or `None` when nothing was queued
    pub async fn submit_job(&self, spec: &JobSpec) -> Result<Option<JobId>> {
        let url = format!("{}/api/jobs", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(spec)
            .send()
            .await
            .context("Failed to send submit request")?;

        let submitted: SubmitResponse = self.handle_response(response).await?;
        Ok(submitted.id)
    }

    pub async fn get_job(&self, id: JobId) -> Result<JobView> {
        let url = format!("{}/api/jobs/{}", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send get job request")?;

        self.handle_response(response).await
    }

    /// Get the log of one array element
    pub async fn get_element_log(&self, id: JobId, array_index: u32) -> Result<JobLog> {
        let url = format!("{}/api/jobs/{}/log", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .query(&[("array_index", array_index)])
            .send()
            .await
            .context("Failed to send get log request")?;

        self.handle_response(response).await
    }

    pub async fn waiting_reason(&self, id: JobId) -> Result<Option<String>> {
        let url = format!("{}/api/jobs/{}/waiting", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send waiting reason request")?;

        let waiting: WaitingReason = self.handle_response(response).await?;
        Ok(waiting.reason)
    }

    pub async fn list_owner_jobs(&self, owner: &str) -> Result<Vec<JobView>> {
        let url = format!("{}/api/owners/{}/jobs", self.base_url, owner);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send list jobs request")?;

        self.handle_response(response).await
    }

    pub async fn cancel_owner(&self, owner: &str) -> Result<CancelResponse> {
        let url = format!("{}/api/owners/{}/cancel", self.base_url, owner);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .context("Failed to send cancel request")?;

        self.handle_response(response).await
    }

    pub async fn delete_owner(&self, owner: &str) -> Result<DeleteResponse> {
        let url = format!("{}/api/owners/{}", self.base_url, owner);
        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .context("Failed to send delete request")?;

        self.handle_response(response).await
    }

    pub async fn report_failure(&self, id: JobId, report: &FailureReport) -> Result<FailureEntry> {
        let url = format!("{}/api/jobs/{}/failures", self.base_url, id);
        let response = self
            .client
            .post(&url)
            .json(report)
            .send()
            .await
            .context("Failed to send failure report")?;

        self.handle_response(response).await
    }

    pub async fn notify_started(&self, id: JobId, notice: &StartedNotice) -> Result<()> {
        let url = format!("{}/api/jobs/{}/started", self.base_url, id);
        let response = self
            .client
            .post(&url)
            .json(notice)
            .send()
            .await
            .context("Failed to send started notification")?;

        self.handle_empty_response(response).await
    }

    pub async fn notify_ended(&self, id: JobId, notice: &EndedNotice) -> Result<()> {
        let url = format!("{}/api/jobs/{}/ended", self.base_url, id);
        let response = self
            .client
            .post(&url)
            .json(notice)
            .send()
            .await
            .context("Failed to send ended notification")?;

        self.handle_empty_response(response).await
    }

    /// Handle API response and deserialize JSON
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let response = Self::check_status(response).await?;
        response
            .json()
            .await
            .context("Failed to parse response JSON")
    }

    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        Self::check_status(response).await.map(|_| ())
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&error_text)
                .ok()
                .and_then(|body| body["error"].as_str().map(str::to_string))
                .unwrap_or(error_text);
            anyhow::bail!("Request failed with status {}: {}", status, message);
        }
        Ok(response)
    }
}
