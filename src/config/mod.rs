//! Configuration: schema, loading, validation, and runtime assembly

pub mod builder;
pub mod loader;
pub mod models;

pub use builder::build_orchestrator;
pub use loader::{ConfigError, from_yaml_file, from_yaml_str};
pub use models::{
    BudgetScopeConfig, DeploymentConfig, DispatchConfig, ModelGroupConfig, PolicyConfig,
    RoutingConfig,
};
