//! PostgreSQL control store implementation.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};

use crate::auth::AuthContext;
use crate::config::DatabaseConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::{
    CustomerId, Deployment, DeploymentId, DeploymentStatus, DeployType, Environment,
    EnvironmentId, EnvironmentSelector, Project, ProjectId, ProjectSelector,
};

use super::{ControlStore, DeploymentPatch};

const DEPLOYMENT_COLUMNS: &str =
    "d.id, d.name, d.status, d.environment_id, d.remote_id, d.created, d.started, d.completed";

/// PostgreSQL-backed control store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required tables are created if they don't exist.
    pub async fn new(config: &DatabaseConfig) -> ControlResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;

        Ok(store)
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> ControlResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Ensure the required tables exist.
    async fn ensure_schema(&self) -> ControlResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                customer_id TEXT NOT NULL,
                name TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS environments (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id),
                name TEXT NOT NULL,
                deploy_type TEXT NOT NULL,
                deploy_base_ref TEXT NOT NULL DEFAULT '',
                deploy_head_ref TEXT,
                deploy_title TEXT,
                deleted TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deployments (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                environment_id TEXT NOT NULL REFERENCES environments(id),
                remote_id TEXT,
                created TIMESTAMPTZ,
                started TIMESTAMPTZ,
                completed TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_deployments_environment
            ON deployments (environment_id, created DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_deployments_remote_id
            ON deployments (remote_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_deployment(row: &PgRow) -> ControlResult<Deployment> {
        let id: String = row.get("id");
        let name: String = row.get("name");
        let status: String = row.get("status");
        let environment_id: String = row.get("environment_id");
        let remote_id: Option<String> = row.get("remote_id");
        let created: Option<chrono::DateTime<chrono::Utc>> = row.get("created");
        let started: Option<chrono::DateTime<chrono::Utc>> = row.get("started");
        let completed: Option<chrono::DateTime<chrono::Utc>> = row.get("completed");

        Ok(Deployment {
            id: DeploymentId::new(id),
            name,
            status: DeploymentStatus::normalize(&status),
            environment_id: EnvironmentId::new(environment_id),
            remote_id,
            created,
            started,
            completed,
            build_log: None,
        })
    }

    fn row_to_environment(row: &PgRow) -> Environment {
        let id: String = row.get("id");
        let project_id: String = row.get("project_id");
        let name: String = row.get("name");
        let deploy_type: String = row.get("deploy_type");
        let deploy_base_ref: String = row.get("deploy_base_ref");
        let deploy_head_ref: Option<String> = row.get("deploy_head_ref");
        let deploy_title: Option<String> = row.get("deploy_title");
        let deleted: Option<chrono::DateTime<chrono::Utc>> = row.get("deleted");

        Environment {
            id: EnvironmentId::new(id),
            project_id: ProjectId::new(project_id),
            name,
            deploy_type: DeployType::from(deploy_type),
            deploy_base_ref,
            deploy_head_ref,
            deploy_title,
            deleted,
        }
    }

    fn row_to_project(row: &PgRow) -> Project {
        let id: String = row.get("id");
        let customer_id: String = row.get("customer_id");
        let name: String = row.get("name");

        Project {
            id: ProjectId::new(id),
            customer_id: CustomerId::new(customer_id),
            name,
        }
    }
}

#[async_trait]
impl ControlStore for PostgresStore {
    async fn project(&self, id: &ProjectId) -> ControlResult<Option<Project>> {
        let row = sqlx::query("SELECT id, customer_id, name FROM projects WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(Self::row_to_project))
    }

    async fn find_project(&self, selector: &ProjectSelector) -> ControlResult<Option<Project>> {
        let row = match selector {
            ProjectSelector::Id(id) => {
                sqlx::query("SELECT id, customer_id, name FROM projects WHERE id = $1")
                    .bind(id.as_str())
                    .fetch_optional(&self.pool)
                    .await?
            }
            ProjectSelector::Name(name) => {
                sqlx::query("SELECT id, customer_id, name FROM projects WHERE name = $1")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        Ok(row.as_ref().map(Self::row_to_project))
    }

    async fn environment(&self, id: &EnvironmentId) -> ControlResult<Option<Environment>> {
        let row = sqlx::query(
            r#"
            SELECT id, project_id, name, deploy_type, deploy_base_ref,
                   deploy_head_ref, deploy_title, deleted
            FROM environments
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_environment))
    }

    async fn environments_matching(
        &self,
        selector: &EnvironmentSelector,
    ) -> ControlResult<Vec<Environment>> {
        let rows = match selector {
            EnvironmentSelector::Id(id) => {
                sqlx::query(
                    r#"
                    SELECT id, project_id, name, deploy_type, deploy_base_ref,
                           deploy_head_ref, deploy_title, deleted
                    FROM environments
                    WHERE id = $1
                    "#,
                )
                .bind(id.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            EnvironmentSelector::ProjectAndName { project, name } => {
                let (project_clause, project_value) = match project {
                    ProjectSelector::Id(id) => ("e.project_id = $1", id.as_str().to_owned()),
                    ProjectSelector::Name(project_name) => {
                        ("p.name = $1", project_name.clone())
                    }
                };
                let query = format!(
                    r#"
                    SELECT e.id, e.project_id, e.name, e.deploy_type, e.deploy_base_ref,
                           e.deploy_head_ref, e.deploy_title, e.deleted
                    FROM environments e
                    INNER JOIN projects p ON p.id = e.project_id
                    WHERE {project_clause} AND e.name = $2
                    "#
                );
                sqlx::query(&query)
                    .bind(&project_value)
                    .bind(name)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.iter().map(Self::row_to_environment).collect())
    }

    async fn insert_deployment(&self, deployment: &Deployment) -> ControlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deployments (
                id, name, status, environment_id, remote_id, created, started, completed
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(deployment.id.as_str())
        .bind(&deployment.name)
        .bind(deployment.status.as_str())
        .bind(deployment.environment_id.as_str())
        .bind(&deployment.remote_id)
        .bind(deployment.created)
        .bind(deployment.started)
        .bind(deployment.completed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn deployment(&self, id: &DeploymentId) -> ControlResult<Option<Deployment>> {
        let query = format!("SELECT {DEPLOYMENT_COLUMNS} FROM deployments d WHERE d.id = $1");
        let row = sqlx::query(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_deployment(&r)?)),
            None => Ok(None),
        }
    }

    async fn deployment_by_remote_id(
        &self,
        remote_id: &str,
    ) -> ControlResult<Option<Deployment>> {
        let query =
            format!("SELECT {DEPLOYMENT_COLUMNS} FROM deployments d WHERE d.remote_id = $1");
        let row = sqlx::query(&query)
            .bind(remote_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(Self::row_to_deployment(&r)?)),
            None => Ok(None),
        }
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

        // Per-field SET so that concurrent patches to disjoint fields both
        // survive; the row lock serialises the writes.
        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("UPDATE deployments d SET ");
        let mut set = builder.separated(", ");

        if let Some(name) = &patch.name {
            set.push("name = ");
            set.push_bind_unseparated(name);
        }
        if let Some(status) = &patch.status {
            set.push("status = ");
            set.push_bind_unseparated(status.as_str().to_owned());
        }
        if let Some(environment_id) = &patch.environment_id {
            set.push("environment_id = ");
            set.push_bind_unseparated(environment_id.as_str());
        }
        if let Some(remote_id) = &patch.remote_id {
            set.push("remote_id = ");
            set.push_bind_unseparated(remote_id);
        }
        if let Some(created) = patch.created {
            set.push("created = ");
            set.push_bind_unseparated(created);
        }
        if let Some(started) = patch.started {
            set.push("started = ");
            set.push_bind_unseparated(started);
        }
        if let Some(completed) = patch.completed {
            set.push("completed = ");
            set.push_bind_unseparated(completed);
        }

        builder.push(" WHERE d.id = ");
        builder.push_bind(id.as_str());
        builder.push(format!(" RETURNING {DEPLOYMENT_COLUMNS}"));

        let row = builder.build().fetch_optional(&self.pool).await?;

        match row {
            Some(r) => Self::row_to_deployment(&r),
            None => Err(ControlError::not_found(format!("deployment {id}"))),
        }
    }

    async fn delete_deployment(&self, id: &DeploymentId) -> ControlResult<()> {
        let result = sqlx::query("DELETE FROM deployments WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
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
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
            r#"
            SELECT {DEPLOYMENT_COLUMNS}
            FROM deployments d
            INNER JOIN environments e ON e.id = d.environment_id
            INNER JOIN projects p ON p.id = e.project_id
            WHERE d.environment_id = "#
        ));
        builder.push_bind(environment_id.as_str());

        if let Some(name) = name {
            builder.push(" AND d.name = ");
            builder.push_bind(name);
        }

        // Scope filtering happens in the query itself, not after the fact.
        if !scope.is_admin() {
            let project_ids: Vec<String> = scope
                .project_ids()
                .iter()
                .map(|p| p.as_str().to_owned())
                .collect();
            let customer_ids: Vec<String> = scope
                .customer_ids()
                .iter()
                .map(|c| c.as_str().to_owned())
                .collect();

            builder.push(" AND (p.id = ANY(");
            builder.push_bind(project_ids);
            builder.push(") OR p.customer_id = ANY(");
            builder.push_bind(customer_ids);
            builder.push("))");
        }

        builder.push(" ORDER BY d.created DESC NULLS LAST");

        let rows = builder.build().fetch_all(&self.pool).await?;

        rows.iter().map(Self::row_to_deployment).collect()
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeploymentStatus;

    fn test_config() -> Option<DatabaseConfig> {
        let url = std::env::var("DATABASE_URL").ok()?;
        Some(DatabaseConfig {
            url,
            ..DatabaseConfig::default()
        })
    }

    async fn seed_catalog(store: &PostgresStore) -> ControlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, customer_id, name)
            VALUES ('proj-1', 'cust-1', 'site1')
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .execute(&store.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO environments (id, project_id, name, deploy_type, deploy_base_ref)
            VALUES ('env-1', 'proj-1', 'main', 'branch', 'main')
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .execute(&store.pool)
        .await?;

        Ok(())
    }

    fn test_deployment() -> Deployment {
        Deployment {
            id: DeploymentId::generate(),
            name: "build-1".to_owned(),
            status: DeploymentStatus::New,
            environment_id: EnvironmentId::new("env-1"),
            remote_id: None,
            created: Some(chrono::Utc::now()),
            started: None,
            completed: None,
            build_log: None,
        }
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn insert_and_get() {
        let config = test_config().expect("DATABASE_URL not set");
        let store = PostgresStore::new(&config).await.expect("failed to connect");
        seed_catalog(&store).await.expect("seed failed");

        let deployment = test_deployment();
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
        assert!(retrieved.build_log.is_none());

        store.delete_deployment(&id).await.expect("delete failed");
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn update_patches_fields() {
        let config = test_config().expect("DATABASE_URL not set");
        let store = PostgresStore::new(&config).await.expect("failed to connect");
        seed_catalog(&store).await.expect("seed failed");

        let deployment = test_deployment();
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

        store.delete_deployment(&id).await.expect("delete failed");
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn list_scoped_and_ordered() {
        let config = test_config().expect("DATABASE_URL not set");
        let store = PostgresStore::new(&config).await.expect("failed to connect");
        seed_catalog(&store).await.expect("seed failed");

        let deployment = test_deployment();
        let id = deployment.id.clone();
        store
            .insert_deployment(&deployment)
            .await
            .expect("insert failed");

        let environment_id = EnvironmentId::new("env-1");

        let in_scope = AuthContext::scoped([], [ProjectId::new("proj-1")]);
        let listed = store
            .list_deployments(&environment_id, None, &in_scope)
            .await
            .expect("list failed");
        assert!(listed.iter().any(|d| d.id == id));

        let outsider = AuthContext::scoped([], [ProjectId::new("proj-other")]);
        let listed = store
            .list_deployments(&environment_id, None, &outsider)
            .await
            .expect("list failed");
        assert!(!listed.iter().any(|d| d.id == id));

        store.delete_deployment(&id).await.expect("delete failed");
    }
}
