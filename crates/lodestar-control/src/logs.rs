//! Build-log enrichment.
//!
//! The full-text log index is consumed through a single query: the most
//! recent log line whose remote-build-identifier and build-phase fields
//! match a deployment. The result is attached to the transient `build_log`
//! field, never persisted.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LogIndexConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::Deployment;

/// Read-only view onto the full-text log index.
#[async_trait]
pub trait BuildLogIndex: Send + Sync {
    /// The newest log line matching a remote build id and build phase, or
    /// `None` when nothing matches.
    async fn latest_line(&self, remote_id: &str, phase: &str) -> ControlResult<Option<String>>;
}

/// Attach the most recent matching log line to a deployment.
///
/// Deployments without a remote build identifier get `build_log = None`
/// without any index query being issued.
pub async fn enrich(index: &dyn BuildLogIndex, deployment: &mut Deployment) -> ControlResult<()> {
    let Some(remote_id) = deployment.remote_id.clone() else {
        deployment.build_log = None;
        return Ok(());
    };

    deployment.build_log = index
        .latest_line(&remote_id, deployment.status.as_str())
        .await?;
    Ok(())
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    remote_id: &'a str,
    phase: &'a str,
    limit: u32,
    sort: &'a str,
}

#[derive(Deserialize)]
struct SearchResponse {
    message: Option<String>,
}

/// HTTP client for the log index service.
#[derive(Debug, Clone)]
pub struct HttpLogIndex {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLogIndex {
    /// Create a new log index client from configuration.
    pub fn new(config: &LogIndexConfig) -> ControlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
        })
    }

    /// Create a new log index client with a custom base URL.
    pub fn with_url(url: impl Into<String>) -> ControlResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            base_url: url.into().trim_end_matches('/').to_owned(),
        })
    }
}

#[async_trait]
impl BuildLogIndex for HttpLogIndex {
    async fn latest_line(&self, remote_id: &str, phase: &str) -> ControlResult<Option<String>> {
        let url = format!("{}/search", self.base_url);
        debug!(remote_id = %remote_id, phase = %phase, "querying log index");

        let response = self
            .client
            .post(&url)
            .json(&SearchRequest {
                remote_id,
                phase,
                limit: 1,
                sort: "timestamp:desc",
            })
            .send()
            .await
            .map_err(ControlError::Http)?;

        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: SearchResponse = response.json().await.map_err(ControlError::Http)?;
                Ok(body.message)
            }
            status => Err(ControlError::internal(format!(
                "log index query failed: {status}"
            ))),
        }
    }
}

/// In-memory log index for testing.
///
/// Entries are keyed by `(remote_id, phase)`; the query counter makes the
/// no-call-without-remote-id property observable.
#[derive(Debug, Default)]
pub struct MemoryLogIndex {
    entries: std::sync::RwLock<std::collections::HashMap<(String, String), String>>,
    queries: std::sync::atomic::AtomicUsize,
}

impl MemoryLogIndex {
    /// Create a new empty log index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a log line for a remote build id and phase.
    pub fn insert_line(
        &self,
        remote_id: impl Into<String>,
        phase: impl Into<String>,
        message: impl Into<String>,
    ) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert((remote_id.into(), phase.into()), message.into());
        }
    }

    /// How many queries have been issued against this index.
    pub fn queries(&self) -> usize {
        self.queries.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildLogIndex for MemoryLogIndex {
    async fn latest_line(&self, remote_id: &str, phase: &str) -> ControlResult<Option<String>> {
        self.queries
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let entries = self
            .entries
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(entries
            .get(&(remote_id.to_owned(), phase.to_owned()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeploymentId, DeploymentStatus, EnvironmentId};

    fn test_deployment(remote_id: Option<&str>) -> Deployment {
        Deployment {
            id: DeploymentId::generate(),
            name: "build-1".to_owned(),
            status: DeploymentStatus::Running,
            environment_id: EnvironmentId::new("env-1"),
            remote_id: remote_id.map(ToOwned::to_owned),
            created: Some(chrono::Utc::now()),
            started: None,
            completed: None,
            build_log: None,
        }
    }

    #[tokio::test]
    async fn no_remote_id_means_no_query() {
        let index = MemoryLogIndex::new();
        let mut deployment = test_deployment(None);

        enrich(&index, &mut deployment).await.expect("enrich failed");

        assert!(deployment.build_log.is_none());
        assert_eq!(index.queries(), 0);
    }

    #[tokio::test]
    async fn attaches_matching_line() {
        let index = MemoryLogIndex::new();
        index.insert_line("r-17", "running", "step 3/5: building image");

        let mut deployment = test_deployment(Some("r-17"));
        enrich(&index, &mut deployment).await.expect("enrich failed");

        assert_eq!(
            deployment.build_log.as_deref(),
            Some("step 3/5: building image")
        );
        assert_eq!(index.queries(), 1);
    }

    #[tokio::test]
    async fn phase_must_match_current_status() {
        let index = MemoryLogIndex::new();
        index.insert_line("r-17", "complete", "done");

        // Deployment is still running; the complete-phase line is not its.
        let mut deployment = test_deployment(Some("r-17"));
        enrich(&index, &mut deployment).await.expect("enrich failed");

        assert!(deployment.build_log.is_none());
    }
}
