//! Deploy-type dispatch: map an environment's declared deploy type onto a
//! task payload and the backend operation that runs it.

use crate::error::{ControlError, ControlResult};
use crate::types::{DeployType, Environment, Project};

use super::TaskPayload;

/// Build the task payload for an environment.
///
/// Required-field checks fail with a validation error before any backend
/// call is made; an unrecognised deploy type is a validation error too.
pub fn build_task(environment: &Environment, project: &Project) -> ControlResult<TaskPayload> {
    match &environment.deploy_type {
        DeployType::Branch => {
            if environment.deploy_base_ref.is_empty() {
                return Err(ControlError::validation(format!(
                    "branch environment {} has no deploy base ref",
                    environment.name
                )));
            }
            Ok(TaskPayload::Branch {
                project_name: project.name.clone(),
                branch_name: environment.deploy_base_ref.clone(),
                sha: None,
            })
        }
        DeployType::PullRequest => {
            let head_ref = environment.deploy_head_ref.clone().unwrap_or_default();
            let title = environment.deploy_title.clone().unwrap_or_default();
            if environment.deploy_base_ref.is_empty() && head_ref.is_empty() && title.is_empty() {
                return Err(ControlError::validation(format!(
                    "pullrequest environment {} has no deploy base ref, head ref or title",
                    environment.name
                )));
            }
            Ok(TaskPayload::PullRequest {
                project_name: project.name.clone(),
                pullrequest_title: title,
                pullrequest_number: pull_request_number(&environment.name),
                head_sha: format!("origin/{head_ref}"),
                head_branch_name: head_ref,
                base_sha: format!("origin/{}", environment.deploy_base_ref),
                base_branch_name: environment.deploy_base_ref.clone(),
                branch_name: environment.name.clone(),
            })
        }
        DeployType::Promote => {
            if environment.deploy_base_ref.is_empty() {
                return Err(ControlError::validation(format!(
                    "promote environment {} has no deploy base ref (promote source)",
                    environment.name
                )));
            }
            Ok(TaskPayload::Promote {
                project_name: project.name.clone(),
                branch_name: environment.name.clone(),
                promote_source_environment: environment.deploy_base_ref.clone(),
            })
        }
        DeployType::Other(value) => Err(ControlError::validation(format!(
            "unknown deploy type '{value}' on environment {}",
            environment.name
        ))),
    }
}

/// The pull-request number encoded in an environment name ("pr-175" → "175").
fn pull_request_number(environment_name: &str) -> String {
    environment_name
        .strip_prefix("pr-")
        .unwrap_or(environment_name)
        .to_owned()
}
