//! Assemble runtime components from a validated configuration

use crate::config::loader::{self, ConfigError};
use crate::config::models::DispatchConfig;
use crate::core::budget::BudgetTracker;
use crate::core::cost::CostCalculator;
use crate::core::interfaces::ProviderAdapter;
use crate::core::pricing::ModelCostTable;
use crate::core::router::deployment::Deployment;
use crate::core::router::orchestrator::Orchestrator;
use crate::core::router::pool::{DeploymentPool, ModelGroup};
use crate::core::router::strategy::DeploymentSelector;
use chrono::Utc;
use std::sync::Arc;

/// Build a fully wired orchestrator from config, a cost table, and the
/// adapter that talks to providers.
///
/// Budget periods start at build time.
pub fn build_orchestrator(
    config: &DispatchConfig,
    table: Arc<ModelCostTable>,
    adapter: Arc<dyn ProviderAdapter>,
) -> Result<Orchestrator, ConfigError> {
    loader::validate(config)?;

    let pool = Arc::new(DeploymentPool::new());
    for group_config in &config.model_groups {
        let mut group = ModelGroup::new(&group_config.name)
            .with_fallbacks(group_config.fallbacks.clone());
        if let Some(window) = group_config.context_window {
            group = group.with_context_window(window);
        }
        if let Some(retries) = group_config.max_retries {
            group = group.with_max_retries(retries);
        }
        for dc in &group_config.deployments {
            let mut deployment = Deployment::new(&dc.id, &dc.provider, &dc.model)
                .with_weight(dc.weight)
                .with_priority(dc.priority)
                .with_params(dc.params.clone());
            if let Some(pricing) = &dc.pricing {
                deployment = deployment.with_pricing_override(pricing.clone());
            }
            group = group.with_deployment(Arc::new(deployment));
        }
        pool.register_group(group);
    }

    let budgets = Arc::new(BudgetTracker::new());
    let now = Utc::now();
    for budget in &config.budgets {
        budgets.configure(
            budget.scope.clone(),
            budget.max_budget,
            chrono::Duration::seconds(budget.period_secs),
            now,
        );
    }

    let calculator = Arc::new(CostCalculator::new(table));
    let mut selector = DeploymentSelector::new(
        pool.clone(),
        budgets.clone(),
        calculator.clone(),
        config.routing.strategy,
    );
    if let Some(seed) = config.routing.seed {
        selector = selector.with_rng_seed(seed);
    }

    Ok(Orchestrator::new(
        pool,
        Arc::new(selector),
        budgets,
        calculator,
        adapter,
    )
    .with_policy((&config.policy).into()))
}
