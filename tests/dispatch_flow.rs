//! End-to-end dispatch flows through the public API: config assembly,
//! failover across deployments and groups, budget enforcement across
//! requests, and streamed usage accounting.

use async_trait::async_trait;
use chrono::Utc;
use modelgate::config;
use modelgate::core::errors::{DispatchError, ProviderFailure, RouterError};
use modelgate::core::interfaces::{ProviderReply, UsageReport};
use modelgate::core::router::DispatchRequest;
use modelgate::{Deployment, ModelCostTable, ProviderAdapter, ScopeKey, UsageRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Adapter whose behavior is keyed by deployment id: a queue of outcomes per
/// deployment, with a default success once a queue is drained.
#[derive(Default)]
struct FakeProvider {
    outcomes: Mutex<HashMap<String, VecDeque<Result<(), ProviderFailure>>>>,
    usage: Mutex<UsageRecord>,
    calls: Mutex<Vec<String>>,
}

impl FakeProvider {
    fn new() -> Self {
        let provider = Self::default();
        *provider.usage.lock() = UsageRecord::tokens(1_000, 500);
        provider
    }

    fn fail_next(&self, deployment_id: &str, failure: ProviderFailure) {
        self.outcomes
            .lock()
            .entry(deployment_id.to_string())
            .or_default()
            .push_back(Err(failure));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ProviderAdapter for FakeProvider {
    async fn execute(
        &self,
        deployment: &Deployment,
        _request: &DispatchRequest,
    ) -> Result<ProviderReply, ProviderFailure> {
        self.calls.lock().push(deployment.id.clone());

        let scripted = self
            .outcomes
            .lock()
            .get_mut(&deployment.id)
            .and_then(|queue| queue.pop_front());
        match scripted {
            Some(Err(failure)) => Err(failure),
            _ => Ok(ProviderReply {
                body: serde_json::json!({"served_by": deployment.id}),
                usage: UsageReport::Complete(self.usage.lock().clone()),
            }),
        }
    }
}

fn cost_table() -> Arc<ModelCostTable> {
    Arc::new(
        ModelCostTable::from_json_str(
            r#"{
                "gpt-4o": {"input_cost_per_token": 0.0000025, "output_cost_per_token": 0.00001},
                "claude-3-5-sonnet": {"input_cost_per_token": 0.000003, "output_cost_per_token": 0.000015}
            }"#,
        )
        .unwrap(),
    )
}

const GATEWAY_YAML: &str = r#"
routing:
  seed: 42
policy:
  max_retries: 1
  retry_delay_secs: 0
  cooldown_base_secs: 5
model_groups:
  - name: gpt-4o
    fallbacks: [claude]
    deployments:
      - id: oai-primary
        provider: openai
        model: gpt-4o
  - name: claude
    deployments:
      - id: anthropic-1
        provider: anthropic
        model: claude-3-5-sonnet
budgets:
  - scope:
      provider: openai
    max_budget: 0.02
    period_secs: 86400
"#;

#[tokio::test]
async fn test_happy_path_from_yaml_config() {
    let cfg = config::from_yaml_str(GATEWAY_YAML).unwrap();
    let provider = Arc::new(FakeProvider::new());
    let orchestrator =
        config::build_orchestrator(&cfg, cost_table(), provider.clone()).unwrap();

    let outcome = orchestrator
        .dispatch(DispatchRequest::new("gpt-4o", serde_json::json!({"prompt": "hi"})))
        .await
        .unwrap();

    assert_eq!(outcome.deployment_id, "oai-primary");
    assert!(!outcome.used_fallback);
    assert_eq!(outcome.cost.total, 1_000.0 * 0.0000025 + 500.0 * 0.00001);
    assert_eq!(provider.calls(), ["oai-primary"]);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_primary_fails_over_to_fallback_group() {
    let cfg = config::from_yaml_str(GATEWAY_YAML).unwrap();
    let provider = Arc::new(FakeProvider::new());
    let orchestrator =
        config::build_orchestrator(&cfg, cost_table(), provider.clone()).unwrap();

    provider.fail_next(
        "oai-primary",
        ProviderFailure::Unavailable {
            provider: "openai".to_string(),
            message: "503".to_string(),
        },
    );

    let outcome = orchestrator
        .dispatch(DispatchRequest::new("gpt-4o", serde_json::json!({})))
        .await
        .unwrap();

    // The failing deployment cools down, its group has no one else, and the
    // fallback group serves the request.
    assert_eq!(outcome.deployment_id, "anthropic-1");
    assert_eq!(outcome.model_group, "claude");
    assert!(outcome.used_fallback);
    assert_eq!(provider.calls(), ["oai-primary", "anthropic-1"]);
}

#[tokio::test]
async fn test_cooldown_excludes_then_readmits_across_requests() {
    // Short cooldown so the test can wait out expiry in wall-clock time.
    let yaml = GATEWAY_YAML.replace("cooldown_base_secs: 5", "cooldown_base_secs: 1");
    let cfg = config::from_yaml_str(&yaml).unwrap();
    let provider = Arc::new(FakeProvider::new());
    let orchestrator =
        config::build_orchestrator(&cfg, cost_table(), provider.clone()).unwrap();

    provider.fail_next(
        "oai-primary",
        ProviderFailure::RateLimited {
            provider: "openai".to_string(),
            retry_after_secs: None,
        },
    );

    // First request trips the cooldown and lands on the fallback.
    let first = orchestrator
        .dispatch(DispatchRequest::new("gpt-4o", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(first.deployment_id, "anthropic-1");

    // While cooling down, the primary is skipped without being called.
    let second = orchestrator
        .dispatch(DispatchRequest::new("gpt-4o", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(second.deployment_id, "anthropic-1");
    assert_eq!(
        provider
            .calls()
            .iter()
            .filter(|id| *id == "oai-primary")
            .count(),
        1
    );

    // After the cooldown expires, the primary serves again.
    tokio::time::sleep(std::time::Duration::from_millis(1_200)).await;
    let third = orchestrator
        .dispatch(DispatchRequest::new("gpt-4o", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(third.deployment_id, "oai-primary");
}

#[tokio::test]
async fn test_budget_exhaustion_shifts_traffic() {
    let cfg = config::from_yaml_str(GATEWAY_YAML).unwrap();
    let provider = Arc::new(FakeProvider::new());
    let orchestrator =
        config::build_orchestrator(&cfg, cost_table(), provider.clone()).unwrap();

    // Each request costs 0.0075 against an openai budget of 0.02: the third
    // request pushes spend past the cap, the fourth must route elsewhere.
    for _ in 0..3 {
        let outcome = orchestrator
            .dispatch(DispatchRequest::new("gpt-4o", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(outcome.deployment_id, "oai-primary");
    }

    let outcome = orchestrator
        .dispatch(DispatchRequest::new("gpt-4o", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(outcome.deployment_id, "anthropic-1");
    assert!(outcome.used_fallback);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_chain_reports_ordered_attempts() {
    let cfg = config::from_yaml_str(GATEWAY_YAML).unwrap();
    let provider = Arc::new(FakeProvider::new());
    let orchestrator =
        config::build_orchestrator(&cfg, cost_table(), provider.clone()).unwrap();

    let timeout = |p: &str| ProviderFailure::Timeout {
        provider: p.to_string(),
        elapsed_ms: 60_000,
    };
    provider.fail_next(
        "oai-primary",
        ProviderFailure::Unavailable {
            provider: "openai".to_string(),
            message: "503".to_string(),
        },
    );
    // Timeouts only cool a deployment down once they repeat, so the fallback
    // group gets a genuine same-deployment retry before giving up.
    provider.fail_next("anthropic-1", timeout("anthropic"));
    provider.fail_next("anthropic-1", timeout("anthropic"));

    let failure = orchestrator
        .dispatch(DispatchRequest::new("gpt-4o", serde_json::json!({})))
        .await
        .unwrap_err();

    assert_eq!(failure.model_group, "gpt-4o");
    assert_eq!(provider.calls(), ["oai-primary", "anthropic-1", "anthropic-1"]);

    // First failure cools the primary down; its retry finds nothing. Both
    // anthropic attempts then fail. Four attempt records, in order.
    assert_eq!(failure.attempts.len(), 4);
    assert_eq!(failure.attempts[0].deployment_id.as_deref(), Some("oai-primary"));
    assert!(matches!(
        failure.attempts[1].error,
        DispatchError::Routing(RouterError::NoDeploymentsAvailable(_))
    ));
    assert_eq!(failure.attempts[2].model_group, "claude");
    assert_eq!(failure.attempts[3].model_group, "claude");
}

#[tokio::test]
async fn test_streamed_usage_billed_once_after_session_ends() {
    let cfg = config::from_yaml_str(GATEWAY_YAML).unwrap();

    struct StreamingProvider;

    #[async_trait]
    impl ProviderAdapter for StreamingProvider {
        async fn execute(
            &self,
            _deployment: &Deployment,
            _request: &DispatchRequest,
        ) -> Result<ProviderReply, ProviderFailure> {
            let deltas = vec![
                UsageRecord::tokens(400, 0),
                UsageRecord::tokens(600, 200),
                UsageRecord::tokens(0, 300),
            ];
            Ok(ProviderReply {
                body: serde_json::json!({"streamed": true}),
                usage: UsageReport::Stream(Box::pin(futures::stream::iter(deltas))),
            })
        }
    }

    let orchestrator =
        config::build_orchestrator(&cfg, cost_table(), Arc::new(StreamingProvider)).unwrap();

    let outcome = orchestrator
        .dispatch(DispatchRequest::new("gpt-4o", serde_json::json!({})))
        .await
        .unwrap();

    assert_eq!(outcome.usage, UsageRecord::tokens(1_000, 500));
    assert_eq!(outcome.cost.total, 1_000.0 * 0.0000025 + 500.0 * 0.00001);
    assert_eq!(outcome.attempts, 1);
}

#[tokio::test]
async fn test_per_request_scopes_accumulate_independently() {
    use modelgate::core::budget::BudgetTracker;
    use modelgate::core::cost::CostCalculator;
    use modelgate::core::router::{
        DeploymentPool, DeploymentSelector, ModelGroup, Orchestrator, RoutingStrategy,
    };

    let pool = Arc::new(DeploymentPool::new());
    pool.register_group(
        ModelGroup::new("gpt-4o")
            .with_deployment(Arc::new(Deployment::new("d1", "openai", "gpt-4o"))),
    );
    let budgets = Arc::new(BudgetTracker::new());
    let now = Utc::now();
    budgets.configure(
        ScopeKey::Team("research".to_string()),
        1.0,
        chrono::Duration::days(1),
        now,
    );
    budgets.configure(
        ScopeKey::Key("vk-1".to_string()),
        1.0,
        chrono::Duration::days(1),
        now,
    );

    let calculator = Arc::new(CostCalculator::new(cost_table()));
    let selector = Arc::new(DeploymentSelector::new(
        pool.clone(),
        budgets.clone(),
        calculator.clone(),
        RoutingStrategy::WeightedRandom,
    ));
    let orchestrator = Orchestrator::new(
        pool,
        selector,
        budgets.clone(),
        calculator,
        Arc::new(FakeProvider::new()),
    );

    let request = DispatchRequest::new("gpt-4o", serde_json::json!({}))
        .with_team("research")
        .with_virtual_key("vk-1");
    let outcome = orchestrator.dispatch(request).await.unwrap();

    let now = Utc::now();
    assert_eq!(
        budgets.spend(&ScopeKey::Team("research".to_string()), now),
        outcome.cost.total
    );
    assert_eq!(
        budgets.spend(&ScopeKey::Key("vk-1".to_string()), now),
        outcome.cost.total
    );
    // Provider scope is unconfigured here, so nothing accumulates there.
    assert_eq!(
        budgets.spend(&ScopeKey::Provider("openai".to_string()), now),
        0.0
    );
}
