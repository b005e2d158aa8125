//! Request routing: deployments, selection, and dispatch orchestration

pub mod deployment;
pub mod orchestrator;
pub mod pool;
pub mod strategy;

pub use deployment::{Deployment, DeploymentId};
pub use orchestrator::{DispatchOutcome, DispatchPolicy, DispatchRequest, Orchestrator};
pub use pool::{CooldownState, DeploymentPool, ModelGroup};
pub use strategy::{DeploymentSelector, RoutingStrategy, TokenEstimate};
