//! Deployment orchestration.
//!
//! This module contains the top-level entry points that sequence
//! authorization, dispatch, record keeping and event publication.

mod service;

pub use service::{DeploymentService, NewDeployment};
