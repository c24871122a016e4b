//! HTTP client for the task-execution backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::ExecutorConfig;
use crate::error::{ControlError, ControlResult};

use super::{ExecutorError, TaskExecutor, TaskPayload};

/// Error body returned by the execution backend on failure.
#[derive(Debug, Deserialize)]
struct BackendFailure {
    kind: String,
    message: String,
}

/// HTTP client for the execution backend.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExecutor {
    /// Create a new executor client from configuration.
    pub fn new(config: &ExecutorConfig) -> ControlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
        })
    }

    /// Create a new executor client with a custom base URL.
    pub fn with_url(url: impl Into<String>) -> ControlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: url.into().trim_end_matches('/').to_owned(),
        })
    }

    async fn submit(&self, path: &str, payload: &TaskPayload) -> Result<(), ExecutorError> {
        let url = format!("{}/{path}", self.base_url);
        debug!(url = %url, project = %payload.project_name(), "submitting task");

        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ExecutorError::Unreachable(e.to_string()))?;

        if response.status().is_success() {
            return Ok(());
        }

        // The backend names its failure kinds in the response body; a body
        // we cannot parse still surfaces as a backend error.
        match response.json::<BackendFailure>().await {
            Ok(failure) if failure.kind == "NoNeedToDeployBranch" => {
                Err(ExecutorError::NoNeedToDeploy(failure.message))
            }
            Ok(failure) => Err(ExecutorError::Backend(format!(
                "{}: {}",
                failure.kind, failure.message
            ))),
            Err(e) => Err(ExecutorError::Backend(format!(
                "unparseable failure response: {e}"
            ))),
        }
    }
}

#[async_trait]
impl TaskExecutor for HttpExecutor {
    async fn deploy(&self, payload: &TaskPayload) -> Result<(), ExecutorError> {
        self.submit("tasks/deploy", payload).await
    }

    async fn promote(&self, payload: &TaskPayload) -> Result<(), ExecutorError> {
        self.submit("tasks/promote", payload).await
    }
}
