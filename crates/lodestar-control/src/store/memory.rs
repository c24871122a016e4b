//! In-memory control store for testing.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::auth::AuthContext;
use crate::error::{ControlError, ControlResult};
use crate::types::{
    Deployment, DeploymentId, Environment, EnvironmentId, EnvironmentSelector, Project, ProjectId,
    ProjectSelector,
};

use super::{ControlStore, DeploymentPatch};

/// In-memory control store for testing.
///
/// Not suitable for production use; data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: RwLock<HashMap<String, Project>>,
    environments: RwLock<HashMap<String, Environment>>,
    deployments: RwLock<HashMap<String, Deployment>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a project. Identity data is otherwise owned by the surrounding
    /// platform, so only the memory store exposes writes for it.
    pub fn insert_project(&self, project: Project) {
        if let Ok(mut projects) = self.projects.write() {
            projects.insert(project.id.as_str().to_owned(), project);
        }
    }

    /// Seed an environment.
    pub fn insert_environment(&self, environment: Environment) {
        if let Ok(mut environments) = self.environments.write() {
            environments.insert(environment.id.as_str().to_owned(), environment);
        }
    }

    fn owner_of(&self, environment_id: &EnvironmentId) -> Option<(ProjectId, Project)> {
        let environments = self.environments.read().ok()?;
        let environment = environments.get(environment_id.as_str())?;
        let projects = self.projects.read().ok()?;
        let project = projects.get(environment.project_id.as_str())?.clone();
        Some((environment.project_id.clone(), project))
    }
}

#[async_trait]
impl ControlStore for MemoryStore {
    async fn project(&self, id: &ProjectId) -> ControlResult<Option<Project>> {
        let projects = self
            .projects
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(projects.get(id.as_str()).cloned())
    }

    async fn find_project(&self, selector: &ProjectSelector) -> ControlResult<Option<Project>> {
        let projects = self
            .projects
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(match selector {
            ProjectSelector::Id(id) => projects.get(id.as_str()).cloned(),
            ProjectSelector::Name(name) => {
                projects.values().find(|p| &p.name == name).cloned()
            }
        })
    }

    async fn environment(&self, id: &EnvironmentId) -> ControlResult<Option<Environment>> {
        let environments = self
            .environments
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(environments.get(id.as_str()).cloned())
    }

    async fn environments_matching(
        &self,
        selector: &EnvironmentSelector,
    ) -> ControlResult<Vec<Environment>> {
        let environments = self
            .environments
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(match selector {
            EnvironmentSelector::Id(id) => environments
                .get(id.as_str())
                .cloned()
                .into_iter()
                .collect(),
            EnvironmentSelector::ProjectAndName { project, name } => {
                let project_id = {
                    let projects = self
                        .projects
                        .read()
                        .map_err(|_| ControlError::internal("lock poisoned"))?;
                    match project {
                        ProjectSelector::Id(id) => Some(id.clone()),
                        ProjectSelector::Name(project_name) => projects
                            .values()
                            .find(|p| &p.name == project_name)
                            .map(|p| p.id.clone()),
                    }
                };
                let Some(project_id) = project_id else {
                    return Ok(Vec::new());
                };
                environments
                    .values()
                    .filter(|e| e.project_id == project_id && &e.name == name)
                    .cloned()
                    .collect()
            }
        })
    }

    async fn insert_deployment(&self, deployment: &Deployment) -> ControlResult<()> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let key = deployment.id.as_str().to_owned();
        if deployments.contains_key(&key) {
            return Err(ControlError::internal(format!(
                "deployment {key} already exists"
            )));
        }

        deployments.insert(key, deployment.clone());
        Ok(())
    }

    async fn deployment(&self, id: &DeploymentId) -> ControlResult<Option<Deployment>> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(deployments.get(id.as_str()).cloned())
    }

    async fn deployment_by_remote_id(
        &self,
        remote_id: &str,
    ) -> ControlResult<Option<Deployment>> {
        let deployments = self
            .deployments
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        Ok(deployments
            .values()
            .find(|d| d.remote_id.as_deref() == Some(remote_id))
            .cloned())
    }

    async fn update_deployment(
        &self,
        id: &DeploymentId,
        patch: &DeploymentPatch,
    ) -> ControlResult<Deployment> {
        if patch.is_empty() {
            return Err(ControlError::validation(
                "update patch must set at least one field",
            ));
        }

        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let deployment = deployments
            .get_mut(id.as_str())
            .ok_or_else(|| ControlError::not_found(format!("deployment {id}")))?;

        patch.apply(deployment);
        Ok(deployment.clone())
    }

    async fn delete_deployment(&self, id: &DeploymentId) -> ControlResult<()> {
        let mut deployments = self
            .deployments
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        if deployments.remove(id.as_str()).is_none() {
            return Err(ControlError::not_found(format!("deployment {id}")));
        }
        Ok(())
    }

    async fn list_deployments(
        &self,
        environment_id: &EnvironmentId,
        name: Option<&str>,
        scope: &AuthContext,
    ) -> ControlResult<Vec<Deployment>> {
        let in_scope = scope.is_admin()
            || self
                .owner_of(environment_id)
                .is_some_and(|(project_id, project)| {
                    scope.can_access(&project_id, &project.customer_id)
                });
        if !in_scope {
            return Ok(Vec::new());
        }

        let deployments = self
            .deployments
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let mut results: Vec<_> = deployments
            .values()
            .filter(|d| &d.environment_id == environment_id)
            .filter(|d| name.map_or(true, |n| d.name == n))
            .cloned()
            .collect();

        // Newest created first; rows without a creation timestamp sort last.
        results.sort_by(|a, b| b.created.cmp(&a.created));

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CustomerId, DeployType, DeploymentStatus};
    use chrono::{Duration, Utc};

    fn seed_catalog(store: &MemoryStore) {
        store.insert_project(Project {
            id: ProjectId::new("proj-1"),
            customer_id: CustomerId::new("cust-1"),
            name: "site1".to_owned(),
        });
        store.insert_environment(Environment {
            id: EnvironmentId::new("env-1"),
            project_id: ProjectId::new("proj-1"),
            name: "main".to_owned(),
            deploy_type: DeployType::Branch,
            deploy_base_ref: "main".to_owned(),
            deploy_head_ref: None,
            deploy_title: None,
            deleted: None,
        });
    }

    fn test_deployment(name: &str, created_offset_secs: i64) -> Deployment {
        Deployment {
            id: DeploymentId::generate(),
            name: name.to_owned(),
            status: DeploymentStatus::New,
            environment_id: EnvironmentId::new("env-1"),
            remote_id: None,
            created: Some(Utc::now() + Duration::seconds(created_offset_secs)),
            started: None,
            completed: None,
            build_log: None,
        }
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = MemoryStore::new();
        let deployment = test_deployment("build-1", 0);
        let id = deployment.id.clone();

        store
            .insert_deployment(&deployment)
            .await
            .expect("insert failed");

        let retrieved = store
            .deployment(&id)
            .await
            .expect("get failed")
            .expect("deployment not found");
        assert_eq!(retrieved.name, "build-1");
        assert_eq!(retrieved.status, DeploymentStatus::New);
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let store = MemoryStore::new();
        let deployment = test_deployment("build-1", 0);

        store
            .insert_deployment(&deployment)
            .await
            .expect("first insert failed");
        assert!(store.insert_deployment(&deployment).await.is_err());
    }

    #[tokio::test]
    async fn lookup_by_remote_id() {
        let store = MemoryStore::new();
        let mut deployment = test_deployment("build-1", 0);
        deployment.remote_id = Some("r-17".to_owned());
        store
            .insert_deployment(&deployment)
            .await
            .expect("insert failed");

        let found = store
            .deployment_by_remote_id("r-17")
            .await
            .expect("lookup failed")
            .expect("not found");
        assert_eq!(found.id, deployment.id);

        assert!(store
            .deployment_by_remote_id("r-999")
            .await
            .expect("lookup failed")
            .is_none());
    }

    #[tokio::test]
    async fn update_applies_patch_fields() {
        let store = MemoryStore::new();
        let deployment = test_deployment("build-1", 0);
        let id = deployment.id.clone();
        store
            .insert_deployment(&deployment)
            .await
            .expect("insert failed");

        let updated = store
            .update_deployment(
                &id,
                &DeploymentPatch::new()
                    .with_status(DeploymentStatus::Running)
                    .with_remote_id("r-42"),
            )
            .await
            .expect("update failed");

        assert_eq!(updated.status, DeploymentStatus::Running);
        assert_eq!(updated.remote_id.as_deref(), Some("r-42"));
        assert_eq!(updated.name, "build-1");
    }

    #[tokio::test]
    async fn update_nonexistent_fails() {
        let store = MemoryStore::new();
        let result = store
            .update_deployment(
                &DeploymentId::new("nonexistent"),
                &DeploymentPatch::new().with_name("x"),
            )
            .await;
        assert!(matches!(result, Err(ControlError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_orders_newest_first() {
        let store = MemoryStore::new();
        seed_catalog(&store);

        for (name, offset) in [("old", -60), ("new", 0), ("middle", -30)] {
            store
                .insert_deployment(&test_deployment(name, offset))
                .await
                .expect("insert failed");
        }

        let listed = store
            .list_deployments(&EnvironmentId::new("env-1"), None, &AuthContext::admin())
            .await
            .expect("list failed");
        let names: Vec<_> = listed.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["new", "middle", "old"]);
    }

    #[tokio::test]
    async fn list_filters_by_name() {
        let store = MemoryStore::new();
        seed_catalog(&store);

        store
            .insert_deployment(&test_deployment("build-1", -10))
            .await
            .expect("insert failed");
        store
            .insert_deployment(&test_deployment("build-2", 0))
            .await
            .expect("insert failed");

        let listed = store
            .list_deployments(
                &EnvironmentId::new("env-1"),
                Some("build-2"),
                &AuthContext::admin(),
            )
            .await
            .expect("list failed");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "build-2");
    }

    #[tokio::test]
    async fn list_is_scope_filtered() {
        let store = MemoryStore::new();
        seed_catalog(&store);
        store
            .insert_deployment(&test_deployment("build-1", 0))
            .await
            .expect("insert failed");

        let environment_id = EnvironmentId::new("env-1");

        // Out-of-scope callers see nothing, never an error.
        let outsider = AuthContext::scoped(
            [CustomerId::new("cust-other")],
            [ProjectId::new("proj-other")],
        );
        let listed = store
            .list_deployments(&environment_id, None, &outsider)
            .await
            .expect("list failed");
        assert!(listed.is_empty());

        // Project scope is enough.
        let by_project = AuthContext::scoped([], [ProjectId::new("proj-1")]);
        assert_eq!(
            store
                .list_deployments(&environment_id, None, &by_project)
                .await
                .expect("list failed")
                .len(),
            1
        );

        // Customer scope is enough.
        let by_customer = AuthContext::scoped([CustomerId::new("cust-1")], []);
        assert_eq!(
            store
                .list_deployments(&environment_id, None, &by_customer)
                .await
                .expect("list failed")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn selector_resolution() {
        let store = MemoryStore::new();
        seed_catalog(&store);

        let by_id = store
            .environments_matching(&EnvironmentSelector::Id(EnvironmentId::new("env-1")))
            .await
            .expect("selector failed");
        assert_eq!(by_id.len(), 1);

        let by_name = store
            .environments_matching(&EnvironmentSelector::ProjectAndName {
                project: ProjectSelector::Name("site1".to_owned()),
                name: "main".to_owned(),
            })
            .await
            .expect("selector failed");
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].id.as_str(), "env-1");

        let missing = store
            .environments_matching(&EnvironmentSelector::ProjectAndName {
                project: ProjectSelector::Name("nope".to_owned()),
                name: "main".to_owned(),
            })
            .await
            .expect("selector failed");
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let store = MemoryStore::new();
        let deployment = test_deployment("build-1", 0);
        let id = deployment.id.clone();
        store
            .insert_deployment(&deployment)
            .await
            .expect("insert failed");

        store.delete_deployment(&id).await.expect("delete failed");
        assert!(store
            .deployment(&id)
            .await
            .expect("get failed")
            .is_none());
        assert!(store.delete_deployment(&id).await.is_err());
    }
}
