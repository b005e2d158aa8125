//! Configuration schema
//!
//! Mirrors the YAML shape operators write. Conversion into runtime types
//! (pool, policy, budget tracker) happens in the builder, keeping serde
//! derives and runtime state separate.

use crate::core::budget::ScopeKey;
use crate::core::pricing::PricingEntry;
use crate::core::router::orchestrator::DispatchPolicy;
use crate::core::router::strategy::RoutingStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level dispatch configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub model_groups: Vec<ModelGroupConfig>,
    #[serde(default)]
    pub budgets: Vec<BudgetScopeConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    #[serde(default)]
    pub strategy: RoutingStrategy,
    /// Fixed RNG seed for reproducible weighted-random selection. Leave unset
    /// in production.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Retry/cooldown/timeout knobs, in whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_retry_delay_cap_secs")]
    pub retry_delay_cap_secs: u64,
    #[serde(default = "default_cooldown_base_secs")]
    pub cooldown_base_secs: i64,
    #[serde(default = "default_cooldown_cap_secs")]
    pub cooldown_cap_secs: i64,
    #[serde(default = "default_adapter_timeout_secs")]
    pub adapter_timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    2
}
fn default_retry_delay_secs() -> u64 {
    1
}
fn default_retry_delay_cap_secs() -> u64 {
    30
}
fn default_cooldown_base_secs() -> i64 {
    5
}
fn default_cooldown_cap_secs() -> i64 {
    300
}
fn default_adapter_timeout_secs() -> u64 {
    60
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            retry_delay_cap_secs: default_retry_delay_cap_secs(),
            cooldown_base_secs: default_cooldown_base_secs(),
            cooldown_cap_secs: default_cooldown_cap_secs(),
            adapter_timeout_secs: default_adapter_timeout_secs(),
        }
    }
}

impl From<&PolicyConfig> for DispatchPolicy {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            retry_delay_cap: Duration::from_secs(config.retry_delay_cap_secs),
            cooldown_base: chrono::Duration::seconds(config.cooldown_base_secs),
            cooldown_cap: chrono::Duration::seconds(config.cooldown_cap_secs),
            adapter_timeout: Duration::from_secs(config.adapter_timeout_secs),
        }
    }
}

/// One client-facing model group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelGroupConfig {
    pub name: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    pub deployments: Vec<DeploymentConfig>,
}

/// One concrete endpoint within a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentConfig {
    pub id: String,
    pub provider: String,
    pub model: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub priority: u32,
    /// Opaque adapter parameters (endpoint, API key reference, ...).
    #[serde(default)]
    pub params: serde_json::Value,
    /// Per-deployment pricing override; wins over the cost table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingEntry>,
}

fn default_weight() -> u32 {
    1
}

/// Budget limit for one accounting scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetScopeConfig {
    /// serde_yaml renders externally tagged enums as `!provider` tags;
    /// singleton_map keeps the plain `provider: openai` map shape instead.
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub scope: ScopeKey,
    pub max_budget: f64,
    /// Budget period in seconds (86400 for daily, 2592000 for 30 days).
    pub period_secs: i64,
}
