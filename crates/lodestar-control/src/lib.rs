//! Lodestar authorization and dispatch core.
//!
//! This crate is the decision-making heart of the Lodestar deployment API:
//! it authorizes callers against a multi-tenant permission model, derives
//! deployment task payloads from an environment's declared deploy type,
//! hands them to the task-execution backend, classifies the outcome, and
//! keeps a durable record of every attempt.
//!
//! # Architecture
//!
//! The core owns the decision logic; everything around it is an external
//! collaborator behind a narrow trait:
//!
//! - **[`ControlStore`]**: the relational store persisting deployments and
//!   the project/environment catalog they hang off
//! - **[`BuildLogIndex`]**: the full-text log index, queried for the single
//!   newest line matching a remote build id and phase
//! - **[`TaskExecutor`]**: the execution backend, consumed through exactly
//!   two operations — deploy and promote
//! - **[`EventBus`]**: the live fan-out of deployment record changes
//!
//! # Trigger flow
//!
//! ```text
//! authorizing ──▶ resolving-environment ──▶ validating-deploy-type
//!                        │                          │
//!                        ▼                          ▼
//!                   unauthorized               dispatching ──▶ classifying
//! ```
//!
//! A trigger resolves its selector to exactly one active environment (zero
//! or many is an authorization failure), builds the payload for the
//! environment's deploy type, and dispatches. Backend outcomes never
//! propagate as errors: success becomes `"success"`, an intentional skip
//! becomes `"Skipped: …"`, anything else becomes `"Error: …"`.

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod deployment;
pub mod error;
pub mod events;
pub mod executor;
pub mod logs;
pub mod store;
pub mod types;

// Re-export commonly used types at the crate root
pub use auth::{AuthContext, Role};
pub use config::ControlConfig;
pub use deployment::{DeploymentService, NewDeployment};
pub use error::{ControlError, ControlResult};
pub use events::{DeploymentEvent, EventBus, EventKind, EventStream};
pub use executor::{
    build_task, ExecutionOp, ExecutorError, HttpExecutor, MockExecutor, TaskExecutor, TaskPayload,
};
pub use logs::{enrich, BuildLogIndex, HttpLogIndex, MemoryLogIndex};
pub use store::{ControlStore, DeploymentPatch, MemoryStore, PostgresStore};
pub use types::{
    CustomerId, Deployment, DeploymentId, DeploymentStatus, DeployType, Environment,
    EnvironmentId, EnvironmentSelector, Project, ProjectId, ProjectSelector,
};
