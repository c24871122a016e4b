//! Task-execution backend contract.
//!
//! The backend is consumed through exactly two operations, "start a deploy"
//! and "start a promote", each taking a structured payload and either
//! succeeding or failing with a named, classifiable error kind.

mod client;
mod dispatch;

pub use client::HttpExecutor;
pub use dispatch::build_task;

use async_trait::async_trait;
use serde::Serialize;

/// Errors the execution backend can fail with.
///
/// Closed set: the "no need to deploy" kind is an intentional skip and is
/// classified separately from genuine failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    /// The backend decided the target is already up to date.
    #[error("no need to deploy: {0}")]
    NoNeedToDeploy(String),

    /// Any other backend-reported failure.
    #[error("execution backend error: {0}")]
    Backend(String),

    /// Transport-level failure reaching the backend.
    #[error("execution backend unreachable: {0}")]
    Unreachable(String),
}

impl ExecutorError {
    /// Whether this failure is an intentional skip rather than an error.
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::NoNeedToDeploy(_))
    }

    /// The human-readable message carried by the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::NoNeedToDeploy(msg) | Self::Backend(msg) | Self::Unreachable(msg) => msg,
        }
    }
}

/// Which backend operation a payload is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOp {
    /// Start a deploy task.
    Deploy,
    /// Start a promote task.
    Promote,
}

/// Structured task payload handed to the execution backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskPayload {
    /// Deploy a branch of a project.
    #[serde(rename_all = "camelCase")]
    Branch {
        /// Project display name.
        project_name: String,
        /// Branch to build.
        branch_name: String,
        /// Optional commit sha pinning the build (direct triggers only).
        #[serde(skip_serializing_if = "Option::is_none")]
        sha: Option<String>,
    },
    /// Deploy a pull request.
    #[serde(rename = "pullrequest", rename_all = "camelCase")]
    PullRequest {
        /// Project display name.
        project_name: String,
        /// Pull-request title.
        pullrequest_title: String,
        /// Pull-request number.
        pullrequest_number: String,
        /// Head branch.
        head_branch_name: String,
        /// Head sha or ref.
        head_sha: String,
        /// Base branch.
        base_branch_name: String,
        /// Base sha or ref.
        base_sha: String,
        /// Environment branch name (e.g. "pr-175").
        branch_name: String,
    },
    /// Promote one environment into another.
    #[serde(rename_all = "camelCase")]
    Promote {
        /// Project display name.
        project_name: String,
        /// Destination branch name.
        branch_name: String,
        /// Environment the workload is promoted from.
        promote_source_environment: String,
    },
}

impl TaskPayload {
    /// The backend operation this payload is dispatched to.
    #[must_use]
    pub const fn operation(&self) -> ExecutionOp {
        match self {
            Self::Branch { .. } | Self::PullRequest { .. } => ExecutionOp::Deploy,
            Self::Promote { .. } => ExecutionOp::Promote,
        }
    }

    /// The project display name carried by the payload.
    #[must_use]
    pub fn project_name(&self) -> &str {
        match self {
            Self::Branch { project_name, .. }
            | Self::PullRequest { project_name, .. }
            | Self::Promote { project_name, .. } => project_name,
        }
    }
}

/// The external execution system.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Start a deploy task.
    async fn deploy(&self, payload: &TaskPayload) -> Result<(), ExecutorError>;

    /// Start a promote task.
    async fn promote(&self, payload: &TaskPayload) -> Result<(), ExecutorError>;
}

/// Scripted executor for testing.
///
/// Records every payload it receives and answers with a configurable
/// result.
#[derive(Debug, Default)]
pub struct MockExecutor {
    calls: std::sync::Mutex<Vec<(ExecutionOp, TaskPayload)>>,
    failure: std::sync::Mutex<Option<ExecutorError>>,
}

impl MockExecutor {
    /// Create an executor that accepts every task.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with the given error.
    pub fn fail_with(&self, error: ExecutorError) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(error);
        }
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<(ExecutionOp, TaskPayload)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, op: ExecutionOp, payload: &TaskPayload) -> Result<(), ExecutorError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((op, payload.clone()));
        }
        match self.failure.lock() {
            Ok(failure) => match failure.as_ref() {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            },
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl TaskExecutor for MockExecutor {
    async fn deploy(&self, payload: &TaskPayload) -> Result<(), ExecutorError> {
        self.record(ExecutionOp::Deploy, payload)
    }

    async fn promote(&self, payload: &TaskPayload) -> Result<(), ExecutorError> {
        self.record(ExecutionOp::Promote, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_discrimination() {
        assert!(ExecutorError::NoNeedToDeploy("up to date".to_owned()).is_skip());
        assert!(!ExecutorError::Backend("boom".to_owned()).is_skip());
        assert!(!ExecutorError::Unreachable("refused".to_owned()).is_skip());
    }

    #[test]
    fn payload_operation_mapping() {
        let branch = TaskPayload::Branch {
            project_name: "site1".to_owned(),
            branch_name: "main".to_owned(),
            sha: None,
        };
        assert_eq!(branch.operation(), ExecutionOp::Deploy);

        let promote = TaskPayload::Promote {
            project_name: "site1".to_owned(),
            branch_name: "production".to_owned(),
            promote_source_environment: "staging".to_owned(),
        };
        assert_eq!(promote.operation(), ExecutionOp::Promote);
    }

    #[test]
    fn payload_wire_shape() {
        let payload = TaskPayload::Branch {
            project_name: "site1".to_owned(),
            branch_name: "main".to_owned(),
            sha: None,
        };
        let json = serde_json::to_value(&payload).expect("serialise failed");
        assert_eq!(json["type"], "branch");
        assert_eq!(json["projectName"], "site1");
        assert_eq!(json["branchName"], "main");
        assert!(json.get("sha").is_none());
    }
}
