//! Core deployment orchestration logic.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::auth::AuthContext;
use crate::error::{ControlError, ControlResult};
use crate::events::{EventBus, EventKind, EventStream};
use crate::executor::{build_task, ExecutionOp, TaskExecutor, TaskPayload};
use crate::logs::{enrich, BuildLogIndex};
use crate::store::{ControlStore, DeploymentPatch};
use crate::types::{
    Deployment, DeploymentId, DeploymentStatus, Environment, EnvironmentId, EnvironmentSelector,
    Project, ProjectSelector,
};

/// Request to register a new deployment record.
#[derive(Debug, Clone)]
pub struct NewDeployment {
    /// Identifier; generated when the caller leaves it unset.
    pub id: Option<DeploymentId>,
    /// Display name.
    pub name: String,
    /// Initial status (normalised by construction).
    pub status: DeploymentStatus,
    /// Environment this deployment belongs to.
    pub environment_id: EnvironmentId,
    /// Remote build identifier, when the execution backend already accepted
    /// the task out-of-band.
    pub remote_id: Option<String>,
    /// Creation timestamp; defaults to now.
    pub created: Option<DateTime<Utc>>,
    /// Start timestamp.
    pub started: Option<DateTime<Utc>>,
    /// Completion timestamp.
    pub completed: Option<DateTime<Utc>>,
}

/// Orchestrates the deployment record lifecycle and trigger flows.
pub struct DeploymentService {
    store: Arc<dyn ControlStore>,
    logs: Arc<dyn BuildLogIndex>,
    executor: Arc<dyn TaskExecutor>,
    events: EventBus,
}

impl DeploymentService {
    /// Create a new deployment service.
    pub fn new(
        store: Arc<dyn ControlStore>,
        logs: Arc<dyn BuildLogIndex>,
        executor: Arc<dyn TaskExecutor>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            logs,
            executor,
            events,
        }
    }

    /// List deployments for an environment, newest first.
    ///
    /// Scope filtering happens in the store query; out-of-scope rows are
    /// silently absent rather than rejected. Build logs are attached only
    /// when the caller asks for them, to avoid an index query per row.
    pub async fn list_deployments(
        &self,
        ctx: &AuthContext,
        environment_id: &EnvironmentId,
        name: Option<&str>,
        include_log: bool,
    ) -> ControlResult<Vec<Deployment>> {
        let mut deployments = self
            .store
            .list_deployments(environment_id, name, ctx)
            .await?;

        if include_log {
            for deployment in &mut deployments {
                enrich(self.logs.as_ref(), deployment).await?;
            }
        }

        Ok(deployments)
    }

    /// Get a deployment by its remote build identifier.
    ///
    /// Returns `None` when no such row exists; rejects with an
    /// authorization failure (never an empty result) when the row exists
    /// but the caller lacks scope over its owner.
    pub async fn deployment_by_remote_id(
        &self,
        ctx: &AuthContext,
        remote_id: &str,
    ) -> ControlResult<Option<Deployment>> {
        let Some(mut deployment) = self.store.deployment_by_remote_id(remote_id).await? else {
            return Ok(None);
        };

        let (_, project) = self.owner_of(&deployment.environment_id).await?;
        self.authorize(ctx, &project)?;

        enrich(self.logs.as_ref(), &mut deployment).await?;
        Ok(Some(deployment))
    }

    /// Register a deployment record.
    pub async fn create_deployment(
        &self,
        ctx: &AuthContext,
        new: NewDeployment,
    ) -> ControlResult<Deployment> {
        let (_, project) = self.owner_of(&new.environment_id).await?;
        self.authorize(ctx, &project)?;

        let deployment = Deployment {
            id: new.id.unwrap_or_else(DeploymentId::generate),
            name: new.name,
            status: new.status,
            environment_id: new.environment_id,
            remote_id: new.remote_id,
            created: new.created.or_else(|| Some(Utc::now())),
            started: new.started,
            completed: new.completed,
            build_log: None,
        };
        deployment.validate_timestamps()?;

        self.store.insert_deployment(&deployment).await?;

        info!(
            deployment_id = %deployment.id,
            environment_id = %deployment.environment_id,
            project = %project.name,
            "deployment registered"
        );

        let mut deployment = deployment;
        enrich(self.logs.as_ref(), &mut deployment).await?;
        self.events.publish(EventKind::Added, deployment.clone());

        Ok(deployment)
    }

    /// Apply a whole-patch update to a deployment record.
    ///
    /// The patch must set at least one field. Moving a deployment to
    /// another environment requires scope over both the old and the new
    /// owner.
    pub async fn update_deployment(
        &self,
        ctx: &AuthContext,
        id: &DeploymentId,
        patch: DeploymentPatch,
    ) -> ControlResult<Deployment> {
        if patch.is_empty() {
            return Err(ControlError::validation(
                "update patch must set at least one field",
            ));
        }

        let existing = self
            .store
            .deployment(id)
            .await?
            .ok_or_else(|| ControlError::not_found(format!("deployment {id}")))?;

        let (_, project) = self.owner_of(&existing.environment_id).await?;
        self.authorize(ctx, &project)?;

        if let Some(new_environment) = &patch.environment_id {
            if new_environment != &existing.environment_id {
                let (_, new_project) = self.owner_of(new_environment).await?;
                self.authorize(ctx, &new_project)?;
            }
        }

        let mut effective = existing;
        patch.apply(&mut effective);
        effective.validate_timestamps()?;

        let mut updated = self.store.update_deployment(id, &patch).await?;

        info!(deployment_id = %id, "deployment updated");

        enrich(self.logs.as_ref(), &mut updated).await?;
        self.events.publish(EventKind::Updated, updated.clone());

        Ok(updated)
    }

    /// Delete a deployment record.
    pub async fn delete_deployment(&self, ctx: &AuthContext, id: &DeploymentId) -> ControlResult<()> {
        let existing = self
            .store
            .deployment(id)
            .await?
            .ok_or_else(|| ControlError::not_found(format!("deployment {id}")))?;

        let (_, project) = self.owner_of(&existing.environment_id).await?;
        self.authorize(ctx, &project)?;

        self.store.delete_deployment(id).await?;
        info!(deployment_id = %id, "deployment deleted");

        Ok(())
    }

    /// Deploy the latest state of the environment a selector resolves to.
    pub async fn trigger_latest(
        &self,
        ctx: &AuthContext,
        selector: &EnvironmentSelector,
    ) -> ControlResult<String> {
        let environment = self.resolve_active_environment(selector).await?;
        let project = self
            .store
            .project(&environment.project_id)
            .await?
            .ok_or_else(|| {
                ControlError::not_found(format!("project {}", environment.project_id))
            })?;
        self.authorize(ctx, &project)?;

        let payload = build_task(&environment, &project)?;
        Ok(self.dispatch(&payload).await)
    }

    /// Deploy a specific branch of a project.
    pub async fn trigger_branch(
        &self,
        ctx: &AuthContext,
        project: &ProjectSelector,
        branch_name: &str,
        branch_ref: Option<&str>,
    ) -> ControlResult<String> {
        let project = self.resolve_project(project).await?;
        self.authorize(ctx, &project)?;

        if branch_name.is_empty() {
            return Err(ControlError::validation("branch name must not be empty"));
        }

        let payload = TaskPayload::Branch {
            project_name: project.name,
            branch_name: branch_name.to_owned(),
            sha: branch_ref.map(ToOwned::to_owned),
        };
        Ok(self.dispatch(&payload).await)
    }

    /// Deploy a specific pull request of a project.
    #[allow(clippy::too_many_arguments)]
    pub async fn trigger_pull_request(
        &self,
        ctx: &AuthContext,
        project: &ProjectSelector,
        number: u64,
        title: &str,
        base_branch_name: &str,
        base_branch_ref: &str,
        head_branch_name: &str,
        head_branch_ref: &str,
    ) -> ControlResult<String> {
        let project = self.resolve_project(project).await?;
        self.authorize(ctx, &project)?;

        if title.is_empty() && base_branch_name.is_empty() && head_branch_name.is_empty() {
            return Err(ControlError::validation(
                "pull request needs a title, base branch or head branch",
            ));
        }

        let payload = TaskPayload::PullRequest {
            project_name: project.name,
            pullrequest_title: title.to_owned(),
            pullrequest_number: number.to_string(),
            head_branch_name: head_branch_name.to_owned(),
            head_sha: head_branch_ref.to_owned(),
            base_branch_name: base_branch_name.to_owned(),
            base_sha: base_branch_ref.to_owned(),
            branch_name: format!("pr-{number}"),
        };
        Ok(self.dispatch(&payload).await)
    }

    /// Promote a source environment's workload onto a branch of a project.
    pub async fn trigger_promote(
        &self,
        ctx: &AuthContext,
        source: &EnvironmentSelector,
        project: &ProjectSelector,
        branch_name: &str,
    ) -> ControlResult<String> {
        let source_environment = self.resolve_active_environment(source).await?;
        let project = self.resolve_project(project).await?;
        self.authorize(ctx, &project)?;

        if branch_name.is_empty() {
            return Err(ControlError::validation("branch name must not be empty"));
        }

        let payload = TaskPayload::Promote {
            project_name: project.name,
            branch_name: branch_name.to_owned(),
            promote_source_environment: source_environment.name,
        };
        Ok(self.dispatch(&payload).await)
    }

    /// Subscribe to live deployment events for one environment.
    #[must_use]
    pub fn subscribe(&self, environment_id: EnvironmentId) -> EventStream {
        self.events.subscribe(environment_id)
    }

    /// Hand a payload to the execution backend and classify the outcome.
    ///
    /// Trigger entry points never reject on backend failures; every backend
    /// outcome resolves to a result string so a single failed deploy cannot
    /// break a batch of fire-and-forget callers.
    async fn dispatch(&self, payload: &TaskPayload) -> String {
        let result = match payload.operation() {
            ExecutionOp::Deploy => self.executor.deploy(payload).await,
            ExecutionOp::Promote => self.executor.promote(payload).await,
        };

        match result {
            Ok(()) => {
                info!(project = %payload.project_name(), "deploy task accepted");
                "success".to_owned()
            }
            Err(e) if e.is_skip() => {
                info!(
                    project = %payload.project_name(),
                    reason = %e.message(),
                    "deploy skipped"
                );
                format!("Skipped: {}", e.message())
            }
            Err(e) => {
                error!(project = %payload.project_name(), error = %e, "deploy task failed");
                format!("Error: {}", e.message())
            }
        }
    }

    /// Resolve a selector to its single active environment.
    ///
    /// Zero or multiple active matches are treated as an authorization
    /// failure, not a not-found: ambiguous or absent targets reveal nothing
    /// about what exists.
    async fn resolve_active_environment(
        &self,
        selector: &EnvironmentSelector,
    ) -> ControlResult<Environment> {
        let matches = self.store.environments_matching(selector).await?;
        let mut active: Vec<_> = matches.into_iter().filter(Environment::is_active).collect();

        match active.len() {
            1 => Ok(active.remove(0)),
            0 => Err(ControlError::unauthorized(format!(
                "no active environment matches selector {selector}"
            ))),
            n => Err(ControlError::unauthorized(format!(
                "selector {selector} is ambiguous: {n} active environments match"
            ))),
        }
    }

    /// Resolve a project selector; absent projects are an authorization
    /// failure for the same reason as absent environments.
    async fn resolve_project(&self, selector: &ProjectSelector) -> ControlResult<Project> {
        self.store.find_project(selector).await?.ok_or_else(|| {
            ControlError::unauthorized(format!("no project matches selector {selector}"))
        })
    }

    /// Resolve the owning chain of an environment.
    async fn owner_of(
        &self,
        environment_id: &EnvironmentId,
    ) -> ControlResult<(Environment, Project)> {
        let environment = self
            .store
            .environment(environment_id)
            .await?
            .ok_or_else(|| ControlError::not_found(format!("environment {environment_id}")))?;

        let project = self
            .store
            .project(&environment.project_id)
            .await?
            .ok_or_else(|| {
                ControlError::not_found(format!("project {}", environment.project_id))
            })?;

        Ok((environment, project))
    }

    fn authorize(&self, ctx: &AuthContext, project: &Project) -> ControlResult<()> {
        if ctx.can_access(&project.id, &project.customer_id) {
            Ok(())
        } else {
            Err(ControlError::unauthorized(format!(
                "caller lacks scope over project {}",
                project.name
            )))
        }
    }
}

impl std::fmt::Debug for DeploymentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentService").finish_non_exhaustive()
    }
}
