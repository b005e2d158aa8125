//! Deployment selection strategies
//!
//! Selection runs over one model group at a time: filter out cooled-down
//! deployments, then deployments whose provider budget is exhausted, then
//! pick among the survivors per the configured strategy. Ties resolve by
//! higher weight, then configured order.

use crate::core::budget::{BudgetTracker, ScopeKey};
use crate::core::cost::CostCalculator;
use crate::core::errors::RouterError;
use crate::core::router::deployment::Deployment;
use crate::core::router::pool::DeploymentPool;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::debug;

/// How to pick among the healthy, in-budget deployments of a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Random pick proportional to deployment weight.
    #[default]
    WeightedRandom,
    /// Fewest requests currently in flight.
    LeastBusy,
    /// Lowest smoothed latency.
    LatencyBased,
    /// Cheapest estimated cost for the request's token estimate.
    CostBased,
}

/// Token counts a cost-based pick is estimated against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenEstimate {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Stateless-per-call deployment picker over the pool.
pub struct DeploymentSelector {
    pool: Arc<DeploymentPool>,
    budgets: Arc<BudgetTracker>,
    calculator: Arc<CostCalculator>,
    strategy: RoutingStrategy,
    rng: Mutex<StdRng>,
}

impl DeploymentSelector {
    pub fn new(
        pool: Arc<DeploymentPool>,
        budgets: Arc<BudgetTracker>,
        calculator: Arc<CostCalculator>,
        strategy: RoutingStrategy,
    ) -> Self {
        Self {
            pool,
            budgets,
            calculator,
            strategy,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic weighted-random picks, for reproducible tests.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    /// Pick one deployment from `model_group`.
    ///
    /// Errors distinguish the empty-after-filtering causes: all deployments
    /// cooled down vs. all surviving providers over budget.
    pub fn select(
        &self,
        model_group: &str,
        now: DateTime<Utc>,
        estimate: &TokenEstimate,
    ) -> Result<Arc<Deployment>, RouterError> {
        let all = self.pool.deployments_for(model_group)?;

        let available: Vec<Arc<Deployment>> = all
            .into_iter()
            .filter(|d| self.pool.is_available(&d.id, now))
            .collect();
        if available.is_empty() {
            return Err(RouterError::NoDeploymentsAvailable(model_group.to_string()));
        }

        let in_budget: Vec<Arc<Deployment>> = available
            .into_iter()
            .filter(|d| {
                !self
                    .budgets
                    .is_over_budget(&ScopeKey::Provider(d.provider.clone()), now)
            })
            .collect();
        if in_budget.is_empty() {
            // Budget exhaustion is its own error class, distinct from
            // NoDeploymentsAvailable, so callers can tell why the group was
            // empty; the orchestrator walks the fallback chain for both.
            return Err(RouterError::BudgetExceeded(model_group.to_string()));
        }

        let picked = match self.strategy {
            RoutingStrategy::WeightedRandom => self.pick_weighted_random(&in_budget),
            RoutingStrategy::LeastBusy => pick_least_busy(&in_budget),
            RoutingStrategy::LatencyBased => pick_lowest_latency(&in_budget),
            RoutingStrategy::CostBased => self.pick_cheapest(&in_budget, estimate),
        };

        debug!(
            group = model_group,
            deployment = %picked.id,
            strategy = ?self.strategy,
            "selected deployment"
        );
        Ok(picked)
    }

    fn pick_weighted_random(&self, candidates: &[Arc<Deployment>]) -> Arc<Deployment> {
        let total: u64 = candidates.iter().map(|d| u64::from(d.weight)).sum();
        let mut rng = self.rng.lock();

        if total == 0 {
            // All weights zero: fall back to a uniform pick.
            let idx = rng.gen_range(0..candidates.len());
            return candidates[idx].clone();
        }

        let mut point = rng.gen_range(0..total);
        for deployment in candidates {
            let weight = u64::from(deployment.weight);
            if point < weight {
                return deployment.clone();
            }
            point -= weight;
        }
        // Unreachable with a correct total; keep the last as a safe default.
        candidates[candidates.len() - 1].clone()
    }

    fn pick_cheapest(
        &self,
        candidates: &[Arc<Deployment>],
        estimate: &TokenEstimate,
    ) -> Arc<Deployment> {
        let cost_of = |d: &Arc<Deployment>| -> f64 {
            self.calculator
                .estimate(
                    &d.model,
                    d.pricing_override.as_ref(),
                    estimate.input_tokens,
                    estimate.output_tokens,
                )
                // Unknown pricing sorts last so priced deployments win.
                .unwrap_or(f64::INFINITY)
        };

        let mut best = &candidates[0];
        let mut best_cost = cost_of(best);
        for candidate in &candidates[1..] {
            let cost = cost_of(candidate);
            // Strict less keeps the earlier candidate on ties.
            if cost < best_cost || (cost == best_cost && candidate.weight > best.weight) {
                best = candidate;
                best_cost = cost;
            }
        }
        best.clone()
    }
}

fn pick_least_busy(candidates: &[Arc<Deployment>]) -> Arc<Deployment> {
    pick_min_by_key(candidates, |d| (d.in_flight(), Reverse(d.weight)))
}

fn pick_lowest_latency(candidates: &[Arc<Deployment>]) -> Arc<Deployment> {
    // A deployment with no completed request reads 0 and sorts first, which
    // gives new deployments traffic to establish a latency profile.
    pick_min_by_key(candidates, |d| (d.avg_latency_us(), Reverse(d.weight)))
}

/// Minimum by key with first-wins ties, preserving configured order.
fn pick_min_by_key<K: Ord>(
    candidates: &[Arc<Deployment>],
    key: impl Fn(&Arc<Deployment>) -> K,
) -> Arc<Deployment> {
    let mut best = &candidates[0];
    let mut best_key = key(best);
    for candidate in &candidates[1..] {
        let candidate_key = key(candidate);
        if candidate_key < best_key {
            best = candidate;
            best_key = candidate_key;
        }
    }
    best.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pricing::{ModelCostTable, PricingEntry};
    use crate::core::router::pool::ModelGroup;
    use chrono::Duration;
    use std::collections::HashMap;

    fn selector_for(
        pool: Arc<DeploymentPool>,
        strategy: RoutingStrategy,
    ) -> DeploymentSelector {
        selector_with_budgets(pool, Arc::new(BudgetTracker::new()), strategy)
    }

    fn selector_with_budgets(
        pool: Arc<DeploymentPool>,
        budgets: Arc<BudgetTracker>,
        strategy: RoutingStrategy,
    ) -> DeploymentSelector {
        let mut entries = HashMap::new();
        entries.insert(
            "gpt-4o".to_string(),
            PricingEntry {
                input_cost_per_token: 0.0000025,
                output_cost_per_token: 0.00001,
                ..Default::default()
            },
        );
        entries.insert(
            "gpt-4o-mini".to_string(),
            PricingEntry {
                input_cost_per_token: 0.00000015,
                output_cost_per_token: 0.0000006,
                ..Default::default()
            },
        );
        let calculator = Arc::new(CostCalculator::new(Arc::new(
            ModelCostTable::from_entries(entries),
        )));
        DeploymentSelector::new(pool, budgets, calculator, strategy).with_rng_seed(7)
    }

    fn two_deployment_pool() -> (Arc<DeploymentPool>, Arc<Deployment>, Arc<Deployment>) {
        let d1 = Arc::new(Deployment::new("d1", "openai", "gpt-4o"));
        let d2 = Arc::new(Deployment::new("d2", "azure", "gpt-4o"));
        let pool = Arc::new(DeploymentPool::new());
        pool.register_group(
            ModelGroup::new("gpt-4o")
                .with_deployment(d1.clone())
                .with_deployment(d2.clone()),
        );
        (pool, d1, d2)
    }

    #[test]
    fn test_single_deployment_selected_under_every_strategy() {
        for strategy in [
            RoutingStrategy::WeightedRandom,
            RoutingStrategy::LeastBusy,
            RoutingStrategy::LatencyBased,
            RoutingStrategy::CostBased,
        ] {
            let pool = Arc::new(DeploymentPool::new());
            pool.register_group(
                ModelGroup::new("gpt-4o")
                    .with_deployment(Arc::new(Deployment::new("only", "openai", "gpt-4o"))),
            );
            let selector = selector_for(pool, strategy);
            let picked = selector
                .select("gpt-4o", Utc::now(), &TokenEstimate::default())
                .unwrap();
            assert_eq!(picked.id, "only", "strategy {strategy:?}");
        }
    }

    #[test]
    fn test_unknown_group() {
        let (pool, _, _) = two_deployment_pool();
        let selector = selector_for(pool, RoutingStrategy::WeightedRandom);
        let err = selector
            .select("missing", Utc::now(), &TokenEstimate::default())
            .unwrap_err();
        assert_eq!(err, RouterError::UnknownModelGroup("missing".to_string()));
    }

    #[test]
    fn test_cooldown_filters_candidates() {
        let (pool, _, _) = two_deployment_pool();
        let now = Utc::now();
        pool.mark_cooldown(
            "d1",
            Duration::seconds(60),
            crate::core::errors::CooldownReason::RateLimited,
            now,
        );

        let selector = selector_for(pool.clone(), RoutingStrategy::WeightedRandom);
        for _ in 0..20 {
            let picked = selector
                .select("gpt-4o", now, &TokenEstimate::default())
                .unwrap();
            assert_eq!(picked.id, "d2");
        }

        pool.mark_cooldown(
            "d2",
            Duration::seconds(60),
            crate::core::errors::CooldownReason::RateLimited,
            now,
        );
        let err = selector
            .select("gpt-4o", now, &TokenEstimate::default())
            .unwrap_err();
        assert_eq!(
            err,
            RouterError::NoDeploymentsAvailable("gpt-4o".to_string())
        );
    }

    #[test]
    fn test_budget_exhaustion_distinct_from_cooldown() {
        let (pool, _, _) = two_deployment_pool();
        let now = Utc::now();

        let budgets = Arc::new(BudgetTracker::new());
        for provider in ["openai", "azure"] {
            let key = ScopeKey::Provider(provider.to_string());
            budgets.configure(key.clone(), 10.0, Duration::days(1), now);
            budgets.record(&key, 10.0, now);
        }

        let selector = selector_with_budgets(pool, budgets, RoutingStrategy::WeightedRandom);
        let err = selector
            .select("gpt-4o", now, &TokenEstimate::default())
            .unwrap_err();
        assert_eq!(err, RouterError::BudgetExceeded("gpt-4o".to_string()));
    }

    #[test]
    fn test_weighted_random_respects_zero_weight() {
        let d1 = Arc::new(Deployment::new("d1", "openai", "gpt-4o").with_weight(0));
        let d2 = Arc::new(Deployment::new("d2", "azure", "gpt-4o").with_weight(5));
        let pool = Arc::new(DeploymentPool::new());
        pool.register_group(
            ModelGroup::new("gpt-4o")
                .with_deployment(d1)
                .with_deployment(d2),
        );

        let selector = selector_for(pool, RoutingStrategy::WeightedRandom);
        for _ in 0..50 {
            let picked = selector
                .select("gpt-4o", Utc::now(), &TokenEstimate::default())
                .unwrap();
            assert_eq!(picked.id, "d2");
        }
    }

    #[test]
    fn test_least_busy_picks_fewest_in_flight() {
        let (pool, d1, _) = two_deployment_pool();
        d1.begin_request();
        d1.begin_request();

        let selector = selector_for(pool, RoutingStrategy::LeastBusy);
        let picked = selector
            .select("gpt-4o", Utc::now(), &TokenEstimate::default())
            .unwrap();
        assert_eq!(picked.id, "d2");
    }

    #[test]
    fn test_latency_based_picks_lowest_ewma() {
        let (pool, d1, d2) = two_deployment_pool();
        d1.record_success(50_000);
        d2.record_success(10_000);

        let selector = selector_for(pool, RoutingStrategy::LatencyBased);
        let picked = selector
            .select("gpt-4o", Utc::now(), &TokenEstimate::default())
            .unwrap();
        assert_eq!(picked.id, "d2");
    }

    #[test]
    fn test_cost_based_prefers_cheaper_model() {
        let d1 = Arc::new(Deployment::new("d1", "openai", "gpt-4o"));
        let d2 = Arc::new(Deployment::new("d2", "openai", "gpt-4o-mini"));
        let pool = Arc::new(DeploymentPool::new());
        pool.register_group(
            ModelGroup::new("smart")
                .with_deployment(d1)
                .with_deployment(d2),
        );

        let selector = selector_for(pool, RoutingStrategy::CostBased);
        let estimate = TokenEstimate {
            input_tokens: 1_000,
            output_tokens: 500,
        };
        let picked = selector.select("smart", Utc::now(), &estimate).unwrap();
        assert_eq!(picked.id, "d2");
    }

    #[test]
    fn test_cost_based_override_beats_table() {
        let cheap_override = PricingEntry {
            input_cost_per_token: 0.00000001,
            output_cost_per_token: 0.00000001,
            ..Default::default()
        };
        let d1 = Arc::new(
            Deployment::new("d1", "openai", "gpt-4o").with_pricing_override(cheap_override),
        );
        let d2 = Arc::new(Deployment::new("d2", "openai", "gpt-4o-mini"));
        let pool = Arc::new(DeploymentPool::new());
        pool.register_group(
            ModelGroup::new("smart")
                .with_deployment(d1)
                .with_deployment(d2),
        );

        let selector = selector_for(pool, RoutingStrategy::CostBased);
        let estimate = TokenEstimate {
            input_tokens: 1_000,
            output_tokens: 500,
        };
        let picked = selector.select("smart", Utc::now(), &estimate).unwrap();
        assert_eq!(picked.id, "d1");
    }

    #[test]
    fn test_ties_resolve_by_configured_order() {
        let (pool, _, _) = two_deployment_pool();
        let selector = selector_for(pool, RoutingStrategy::LeastBusy);
        // Both idle with equal weight; the first configured deployment wins.
        let picked = selector
            .select("gpt-4o", Utc::now(), &TokenEstimate::default())
            .unwrap();
        assert_eq!(picked.id, "d1");
    }
}
