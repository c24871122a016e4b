//! Storage backends for the deployment record and its owning catalog.
//!
//! The relational store is consumed only through the [`ControlStore`] trait.
//! The primary implementation uses PostgreSQL; an in-memory implementation
//! is provided for testing.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::AuthContext;
use crate::error::ControlResult;
use crate::types::{
    Deployment, DeploymentId, DeploymentStatus, Environment, EnvironmentId, EnvironmentSelector,
    Project, ProjectId, ProjectSelector,
};

/// A whole-patch update for a deployment record.
///
/// Every field is optional; a patch that sets nothing is rejected by the
/// orchestrator before any store call is issued.
#[derive(Debug, Clone, Default)]
pub struct DeploymentPatch {
    /// New display name.
    pub name: Option<String>,
    /// New status (normalised before storage).
    pub status: Option<DeploymentStatus>,
    /// Move the deployment to another environment.
    pub environment_id: Option<EnvironmentId>,
    /// New remote build identifier.
    pub remote_id: Option<String>,
    /// New creation timestamp.
    pub created: Option<DateTime<Utc>>,
    /// New start timestamp.
    pub started: Option<DateTime<Utc>>,
    /// New completion timestamp.
    pub completed: Option<DateTime<Utc>>,
}

impl DeploymentPatch {
    /// Create an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the status.
    #[must_use]
    pub fn with_status(mut self, status: DeploymentStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Move the deployment to another environment.
    #[must_use]
    pub fn with_environment(mut self, environment_id: EnvironmentId) -> Self {
        self.environment_id = Some(environment_id);
        self
    }

    /// Set the remote build identifier.
    #[must_use]
    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    /// Set the start timestamp.
    #[must_use]
    pub const fn with_started(mut self, started: DateTime<Utc>) -> Self {
        self.started = Some(started);
        self
    }

    /// Set the completion timestamp.
    #[must_use]
    pub const fn with_completed(mut self, completed: DateTime<Utc>) -> Self {
        self.completed = Some(completed);
        self
    }

    /// Whether the patch sets no fields at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.status.is_none()
            && self.environment_id.is_none()
            && self.remote_id.is_none()
            && self.created.is_none()
            && self.started.is_none()
            && self.completed.is_none()
    }

    /// Apply the patched fields to a deployment in place.
    pub fn apply(&self, deployment: &mut Deployment) {
        if let Some(name) = &self.name {
            deployment.name = name.clone();
        }
        if let Some(status) = &self.status {
            deployment.status = status.clone();
        }
        if let Some(environment_id) = &self.environment_id {
            deployment.environment_id = environment_id.clone();
        }
        if let Some(remote_id) = &self.remote_id {
            deployment.remote_id = Some(remote_id.clone());
        }
        if let Some(created) = self.created {
            deployment.created = Some(created);
        }
        if let Some(started) = self.started {
            deployment.started = Some(started);
        }
        if let Some(completed) = self.completed {
            deployment.completed = Some(completed);
        }
    }
}

/// Backend for the deployment record and the catalog it hangs off.
///
/// Implementations must make each operation atomic on its own; no
/// cross-statement transaction spans an orchestrator call.
#[async_trait]
pub trait ControlStore: Send + Sync {
    /// Get a project by ID.
    async fn project(&self, id: &ProjectId) -> ControlResult<Option<Project>>;

    /// Find a project by selector.
    async fn find_project(&self, selector: &ProjectSelector) -> ControlResult<Option<Project>>;

    /// Get an environment by ID.
    async fn environment(&self, id: &EnvironmentId) -> ControlResult<Option<Environment>>;

    /// All environments matching a selector, deleted ones included.
    ///
    /// The orchestrator applies the exactly-one-active rule on top.
    async fn environments_matching(
        &self,
        selector: &EnvironmentSelector,
    ) -> ControlResult<Vec<Environment>>;

    /// Insert a new deployment record.
    ///
    /// Returns an error if a deployment with the same ID already exists.
    async fn insert_deployment(&self, deployment: &Deployment) -> ControlResult<()>;

    /// Get a deployment by ID.
    async fn deployment(&self, id: &DeploymentId) -> ControlResult<Option<Deployment>>;

    /// Get a deployment by its remote build identifier.
    async fn deployment_by_remote_id(&self, remote_id: &str)
        -> ControlResult<Option<Deployment>>;

    /// Apply a per-field patch to a deployment and return the updated row.
    ///
    /// Fails with not-found when no row matches `id`. Concurrent patches to
    /// disjoint fields both survive; the store serialises the writes.
    async fn update_deployment(
        &self,
        id: &DeploymentId,
        patch: &DeploymentPatch,
    ) -> ControlResult<Deployment>;

    /// Delete a deployment record.
    async fn delete_deployment(&self, id: &DeploymentId) -> ControlResult<()>;

    /// List deployments for an environment, newest-created first.
    ///
    /// Filtered to `name` when supplied. For non-admin callers only rows
    /// whose owning project/customer is inside `scope` are returned; the
    /// filtering happens in the query, not after the fact.
    async fn list_deployments(
        &self,
        environment_id: &EnvironmentId,
        name: Option<&str>,
        scope: &AuthContext,
    ) -> ControlResult<Vec<Deployment>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_patch_detection() {
        assert!(DeploymentPatch::new().is_empty());
        assert!(!DeploymentPatch::new().with_name("build-2").is_empty());
        assert!(!DeploymentPatch::new()
            .with_status(DeploymentStatus::Running)
            .is_empty());
    }

    #[test]
    fn patch_applies_only_set_fields() {
        let mut deployment = Deployment {
            id: DeploymentId::generate(),
            name: "build-1".to_owned(),
            status: DeploymentStatus::New,
            environment_id: EnvironmentId::new("env-1"),
            remote_id: None,
            created: Some(Utc::now()),
            started: None,
            completed: None,
            build_log: None,
        };

        DeploymentPatch::new()
            .with_status(DeploymentStatus::Running)
            .with_remote_id("r-100")
            .apply(&mut deployment);

        assert_eq!(deployment.name, "build-1");
        assert_eq!(deployment.status, DeploymentStatus::Running);
        assert_eq!(deployment.remote_id.as_deref(), Some("r-100"));
        assert!(deployment.started.is_none());
    }
}
