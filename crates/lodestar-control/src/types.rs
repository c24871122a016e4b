//! Core types for lodestar-control.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};

/// Unique identifier for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(String);

impl DeploymentId {
    /// Create a new deployment ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new unique deployment ID using ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DeploymentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for an environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentId(String);

impl EnvironmentId {
    /// Create a new environment ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Create a new project ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a customer (tenant).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(String);

impl CustomerId {
    /// Create a new customer ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical deployment lifecycle status.
///
/// Externally supplied tokens that match one of the seven recognised
/// statuses (case-insensitively) normalise to the lowercase form; anything
/// else passes through unchanged in [`DeploymentStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeploymentStatus {
    /// Deployment created, nothing dispatched yet.
    New,
    /// Waiting for the execution backend to pick the task up.
    Pending,
    /// Build/deploy in progress.
    Running,
    /// Cancelled before completion.
    Cancelled,
    /// The execution backend reported an error.
    Error,
    /// The deploy ran and failed.
    Failed,
    /// The deploy finished successfully.
    Complete,
    /// Unrecognised pass-through token.
    Other(String),
}

impl DeploymentStatus {
    /// Normalise an externally supplied status token.
    ///
    /// Total and idempotent: recognised tokens map to their lowercase
    /// canonical form, unknown tokens are preserved verbatim.
    #[must_use]
    pub fn normalize(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "new" => Self::New,
            "pending" => Self::Pending,
            "running" => Self::Running,
            "cancelled" => Self::Cancelled,
            "error" => Self::Error,
            "failed" => Self::Failed,
            "complete" => Self::Complete,
            _ => Self::Other(token.to_owned()),
        }
    }

    /// Get the status as its wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
            Self::Failed => "failed",
            Self::Complete => "complete",
            Self::Other(token) => token,
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for DeploymentStatus {
    fn from(token: String) -> Self {
        Self::normalize(&token)
    }
}

impl From<DeploymentStatus> for String {
    fn from(status: DeploymentStatus) -> Self {
        status.as_str().to_owned()
    }
}

/// A single attempt to materialise an environment's code into a running
/// workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment identifier.
    pub id: DeploymentId,
    /// Display name.
    pub name: String,
    /// Current lifecycle status.
    pub status: DeploymentStatus,
    /// Environment this deployment belongs to.
    pub environment_id: EnvironmentId,
    /// Identifier assigned by the execution backend once it accepts the task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// When the record was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// When the build started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    /// When the build finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
    /// Latest build log line, computed per read and never persisted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_log: Option<String>,
}

impl Deployment {
    /// Check the lifecycle-timestamp ordering invariant:
    /// `completed` never precedes `started`, which never precedes `created`.
    pub fn validate_timestamps(&self) -> ControlResult<()> {
        if let (Some(created), Some(started)) = (self.created, self.started) {
            if started < created {
                return Err(ControlError::validation(
                    "started timestamp precedes created",
                ));
            }
        }
        if let (Some(started), Some(completed)) = (self.started, self.completed) {
            if completed < started {
                return Err(ControlError::validation(
                    "completed timestamp precedes started",
                ));
            }
        }
        if let (Some(created), Some(completed)) = (self.created, self.completed) {
            if completed < created {
                return Err(ControlError::validation(
                    "completed timestamp precedes created",
                ));
            }
        }
        Ok(())
    }
}

/// Which task payload shape and execution operation apply to an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeployType {
    /// Deploy a branch.
    Branch,
    /// Deploy a pull request.
    PullRequest,
    /// Promote another environment.
    Promote,
    /// Unrecognised value; rejected at dispatch time.
    Other(String),
}

impl DeployType {
    /// Get the deploy type as its wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Branch => "branch",
            Self::PullRequest => "pullrequest",
            Self::Promote => "promote",
            Self::Other(value) => value,
        }
    }
}

impl fmt::Display for DeployType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for DeployType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "branch" => Self::Branch,
            "pullrequest" => Self::PullRequest,
            "promote" => Self::Promote,
            _ => Self::Other(value),
        }
    }
}

impl From<DeployType> for String {
    fn from(value: DeployType) -> Self {
        value.as_str().to_owned()
    }
}

/// A named deployable instance of a project (a branch, a PR, a slot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    /// Unique environment identifier.
    pub id: EnvironmentId,
    /// Project owning this environment.
    pub project_id: ProjectId,
    /// Environment name (e.g. "main", "pr-175", "production").
    pub name: String,
    /// Declared deploy type.
    pub deploy_type: DeployType,
    /// Base reference (branch to build, or promote source).
    pub deploy_base_ref: String,
    /// Head reference (pull-request environments only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_head_ref: Option<String>,
    /// Pull-request title (pull-request environments only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_title: Option<String>,
    /// Set when the environment was deleted; `None` means active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DateTime<Utc>>,
}

impl Environment {
    /// Whether this environment is still deployable.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.deleted.is_none()
    }
}

/// A project: owns environments, carries the display name used in task
/// payloads and log lines, and the owning customer used for scoping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique project identifier.
    pub id: ProjectId,
    /// Customer owning this project.
    pub customer_id: CustomerId,
    /// Project display name.
    pub name: String,
}

/// Caller-supplied identifying information that must resolve to exactly one
/// active environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentSelector {
    /// Select by environment identifier.
    Id(EnvironmentId),
    /// Select by owning project and environment name.
    ProjectAndName {
        /// Project selector.
        project: ProjectSelector,
        /// Environment name.
        name: String,
    },
}

/// Caller-supplied identifying information for a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectSelector {
    /// Select by project identifier.
    Id(ProjectId),
    /// Select by project name.
    Name(String),
}

impl fmt::Display for ProjectSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

impl fmt::Display for EnvironmentSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::ProjectAndName { project, name } => write!(f, "{project}/{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_recognised_tokens() {
        let cases = [
            ("NEW", "new"),
            ("Pending", "pending"),
            ("running", "running"),
            ("CANCELLED", "cancelled"),
            ("Error", "error"),
            ("FAILED", "failed"),
            ("cOmPlEtE", "complete"),
        ];
        for (token, expected) in cases {
            assert_eq!(DeploymentStatus::normalize(token).as_str(), expected);
        }
    }

    #[test]
    fn normalize_passes_unknown_tokens_through() {
        let status = DeploymentStatus::normalize("Provisioning");
        assert_eq!(status, DeploymentStatus::Other("Provisioning".to_owned()));
        assert_eq!(status.as_str(), "Provisioning");
    }

    #[test]
    fn normalize_is_idempotent() {
        for token in ["RUNNING", "complete", "weird-status", ""] {
            let once = DeploymentStatus::normalize(token);
            let twice = DeploymentStatus::normalize(once.as_str());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn status_round_trips_through_serde() {
        let status = DeploymentStatus::normalize("COMPLETE");
        let json = serde_json::to_string(&status).expect("serialise failed");
        assert_eq!(json, "\"complete\"");

        let parsed: DeploymentStatus =
            serde_json::from_str("\"FAILED\"").expect("deserialise failed");
        assert_eq!(parsed, DeploymentStatus::Failed);
    }

    #[test]
    fn deploy_type_parsing() {
        assert_eq!(DeployType::from("branch".to_owned()), DeployType::Branch);
        assert_eq!(
            DeployType::from("pullrequest".to_owned()),
            DeployType::PullRequest
        );
        assert_eq!(DeployType::from("promote".to_owned()), DeployType::Promote);
        assert_eq!(
            DeployType::from("tarball".to_owned()),
            DeployType::Other("tarball".to_owned())
        );
    }

    #[test]
    fn timestamp_ordering_enforced() {
        let now = Utc::now();
        let mut deployment = Deployment {
            id: DeploymentId::generate(),
            name: "build-1".to_owned(),
            status: DeploymentStatus::New,
            environment_id: EnvironmentId::new("env-1"),
            remote_id: None,
            created: Some(now),
            started: Some(now + chrono::Duration::seconds(5)),
            completed: Some(now + chrono::Duration::seconds(30)),
            build_log: None,
        };
        deployment.validate_timestamps().expect("ordering is valid");

        deployment.started = Some(now - chrono::Duration::seconds(1));
        assert!(deployment.validate_timestamps().is_err());
    }

    #[test]
    fn environment_activity() {
        let environment = Environment {
            id: EnvironmentId::new("env-1"),
            project_id: ProjectId::new("proj-1"),
            name: "main".to_owned(),
            deploy_type: DeployType::Branch,
            deploy_base_ref: "main".to_owned(),
            deploy_head_ref: None,
            deploy_title: None,
            deleted: None,
        };
        assert!(environment.is_active());

        let deleted = Environment {
            deleted: Some(Utc::now()),
            ..environment
        };
        assert!(!deleted.is_active());
    }
}
