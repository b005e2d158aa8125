//! Configuration loading and validation

use crate::config::models::DispatchConfig;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Parse and validate a YAML configuration string.
pub fn from_yaml_str(yaml: &str) -> Result<DispatchConfig, ConfigError> {
    let config: DispatchConfig = serde_yaml::from_str(yaml)?;
    validate(&config)?;
    debug!(
        groups = config.model_groups.len(),
        budgets = config.budgets.len(),
        "loaded dispatch config"
    );
    Ok(config)
}

/// Load and validate a YAML configuration file.
pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<DispatchConfig, ConfigError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    from_yaml_str(&content)
}

/// Structural checks beyond what serde enforces: unique names, non-empty
/// groups, and fallbacks that reference known groups.
pub fn validate(config: &DispatchConfig) -> Result<(), ConfigError> {
    let mut group_names = HashSet::new();
    let mut deployment_ids = HashSet::new();

    for group in &config.model_groups {
        if !group_names.insert(group.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate model group name: {}",
                group.name
            )));
        }
        if group.deployments.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "model group {} has no deployments",
                group.name
            )));
        }
        for deployment in &group.deployments {
            if !deployment_ids.insert(deployment.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate deployment id: {}",
                    deployment.id
                )));
            }
        }
    }

    for group in &config.model_groups {
        for fallback in &group.fallbacks {
            if !group_names.contains(fallback.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "model group {} falls back to unknown group {}",
                    group.name, fallback
                )));
            }
        }
    }

    Ok(())
}
