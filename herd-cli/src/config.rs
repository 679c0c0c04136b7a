//! Where the CLI finds the orchestrator

use crate::api::ApiClient;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the orchestrator, without a trailing slash
    pub orchestrator_url: String,
}

impl Config {
    pub fn new(orchestrator_url: impl Into<String>) -> Self {
        let url: String = orchestrator_url.into();
        Self {
            orchestrator_url: url.trim_end_matches('/').to_string(),
        }
    }

    pub fn client(&self) -> ApiClient {
        ApiClient::new(&self.orchestrator_url)
    }
}
