//! Dispatch orchestration: retries, cooldowns, fallbacks, accounting
//!
//! One `dispatch` call walks a chain of model groups (the requested group
//! followed by its configured fallbacks), retrying within each group before
//! moving to the next. Accounting runs exactly once, strictly after a fully
//! successful provider reply; every failed attempt is recorded in order in
//! the terminal error.

use crate::core::budget::{BudgetTracker, ScopeKey};
use crate::core::cost::{CostCalculator, CostResult};
use crate::core::errors::{AttemptError, DispatchError, DispatchFailure, ProviderFailure};
use crate::core::interfaces::{PersistenceSink, ProviderAdapter, SpendRecord, UsageReport};
use crate::core::router::deployment::Deployment;
use crate::core::router::pool::DeploymentPool;
use crate::core::router::strategy::{DeploymentSelector, TokenEstimate};
use crate::core::usage::{UsageAggregator, UsageRecord};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One request as seen by the dispatch core. The payload is opaque; only the
/// adapter interprets it.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub request_id: Uuid,
    pub model_group: String,
    pub payload: serde_json::Value,
    /// Team the request bills to, when team budgets are in play.
    pub team: Option<String>,
    /// Virtual key the request bills to, when key budgets are in play.
    pub virtual_key: Option<String>,
    /// Prompt size in tokens, for context-window-aware fallback.
    pub required_context_tokens: Option<u64>,
    /// Token estimate for cost-based selection.
    pub estimate: TokenEstimate,
}

impl DispatchRequest {
    pub fn new(model_group: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            model_group: model_group.into(),
            payload,
            team: None,
            virtual_key: None,
            required_context_tokens: None,
            estimate: TokenEstimate::default(),
        }
    }

    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    pub fn with_virtual_key(mut self, key: impl Into<String>) -> Self {
        self.virtual_key = Some(key.into());
        self
    }

    pub fn with_required_context_tokens(mut self, tokens: u64) -> Self {
        self.required_context_tokens = Some(tokens);
        self
    }

    pub fn with_estimate(mut self, estimate: TokenEstimate) -> Self {
        self.estimate = estimate;
        self
    }
}

/// Retry, cooldown, and timeout knobs for the dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Retries per model group beyond the first attempt, unless the group
    /// overrides it.
    pub max_retries: u32,
    /// Base delay between attempts; doubles per attempt.
    pub retry_delay: Duration,
    pub retry_delay_cap: Duration,
    /// Base cooldown; doubles with the attempt number that triggered it.
    pub cooldown_base: chrono::Duration,
    pub cooldown_cap: chrono::Duration,
    /// Wall-clock limit for a single adapter call.
    pub adapter_timeout: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
            retry_delay_cap: Duration::from_secs(30),
            cooldown_base: chrono::Duration::seconds(5),
            cooldown_cap: chrono::Duration::seconds(300),
            adapter_timeout: Duration::from_secs(60),
        }
    }
}

/// Successful dispatch result, with the accounting already applied.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub response: serde_json::Value,
    pub deployment_id: String,
    /// Group that actually served the request.
    pub model_group: String,
    /// True when the serving group was not the requested one.
    pub used_fallback: bool,
    pub usage: UsageRecord,
    pub cost: CostResult,
    /// Total attempts made, failed ones included.
    pub attempts: u32,
}

/// Drives requests through selection, execution, retries, fallbacks, and
/// post-success accounting.
pub struct Orchestrator {
    pool: Arc<DeploymentPool>,
    selector: Arc<DeploymentSelector>,
    budgets: Arc<BudgetTracker>,
    calculator: Arc<CostCalculator>,
    adapter: Arc<dyn ProviderAdapter>,
    sink: Option<Arc<dyn PersistenceSink>>,
    policy: DispatchPolicy,
}

impl Orchestrator {
    pub fn new(
        pool: Arc<DeploymentPool>,
        selector: Arc<DeploymentSelector>,
        budgets: Arc<BudgetTracker>,
        calculator: Arc<CostCalculator>,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Self {
        Self {
            pool,
            selector,
            budgets,
            calculator,
            adapter,
            sink: None,
            policy: DispatchPolicy::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Execute a request against the requested model group, falling back to
    /// its configured fallback groups on exhaustion.
    ///
    /// Dropping the returned future cancels the in-flight attempt; no
    /// accounting happens for a cancelled request.
    pub async fn dispatch(
        &self,
        request: DispatchRequest,
    ) -> Result<DispatchOutcome, DispatchFailure> {
        let mut chain = self.fallback_chain(&request.model_group);
        let mut attempts: Vec<AttemptError> = Vec::new();
        let mut total_attempts: u32 = 0;

        let mut group_idx = 0;
        while group_idx < chain.len() {
            let group_name = chain[group_idx].clone();

            let Some(group) = self.pool.group(&group_name) else {
                attempts.push(AttemptError {
                    model_group: group_name.clone(),
                    deployment_id: None,
                    error: DispatchError::Routing(
                        crate::core::errors::RouterError::UnknownModelGroup(group_name),
                    ),
                });
                group_idx += 1;
                continue;
            };

            let retries = group.max_retries.unwrap_or(self.policy.max_retries);
            let max_attempts = retries + 1;
            let mut attempt: u32 = 0;

            'attempts: while attempt < max_attempts {
                attempt += 1;
                total_attempts += 1;
                let now = Utc::now();

                let deployment =
                    match self.selector.select(&group_name, now, &request.estimate) {
                        Ok(deployment) => deployment,
                        Err(err) => {
                            debug!(group = %group_name, %err, "selection failed");
                            attempts.push(AttemptError {
                                model_group: group_name.clone(),
                                deployment_id: None,
                                error: DispatchError::Routing(err),
                            });
                            break 'attempts;
                        }
                    };

                match self.execute_attempt(&deployment, &request).await {
                    Ok((reply_body, usage, elapsed)) => {
                        deployment.record_success(elapsed.as_micros() as u64);
                        let cost = self.account(&deployment, &request, &usage);
                        info!(
                            request_id = %request.request_id,
                            group = %group_name,
                            deployment = %deployment.id,
                            cost = cost.total,
                            attempts = total_attempts,
                            "dispatch succeeded"
                        );
                        return Ok(DispatchOutcome {
                            response: reply_body,
                            deployment_id: deployment.id.clone(),
                            model_group: group_name.clone(),
                            used_fallback: group_idx > 0,
                            usage,
                            cost,
                            attempts: total_attempts,
                        });
                    }
                    Err(failure) => {
                        deployment.record_failure();
                        warn!(
                            group = %group_name,
                            deployment = %deployment.id,
                            attempt,
                            %failure,
                            "attempt failed"
                        );

                        let consecutive_timeouts = match &failure {
                            ProviderFailure::Timeout { .. } => deployment.record_timeout(),
                            _ => 0,
                        };
                        if failure.triggers_cooldown(consecutive_timeouts) {
                            if let Some(reason) = failure.cooldown_reason() {
                                self.pool.mark_cooldown(
                                    &deployment.id,
                                    self.scaled_cooldown(attempt),
                                    reason,
                                    Utc::now(),
                                );
                            }
                        }

                        let fatal = failure.is_fatal();
                        let context_window = failure.is_context_window();
                        let retryable = failure.is_retryable();

                        attempts.push(AttemptError {
                            model_group: group_name.clone(),
                            deployment_id: Some(deployment.id.clone()),
                            error: DispatchError::Provider(failure),
                        });

                        if fatal {
                            return Err(DispatchFailure {
                                model_group: request.model_group.clone(),
                                attempts,
                            });
                        }
                        if context_window {
                            self.prefer_fitting_groups(
                                &mut chain,
                                group_idx + 1,
                                request.required_context_tokens,
                            );
                            break 'attempts;
                        }
                        if !retryable || attempt >= max_attempts {
                            break 'attempts;
                        }

                        tokio::time::sleep(self.retry_backoff(attempt)).await;
                    }
                }
            }

            group_idx += 1;
        }

        Err(DispatchFailure {
            model_group: request.model_group,
            attempts,
        })
    }

    /// Requested group followed by its configured fallbacks, duplicates
    /// dropped so a cyclic fallback configuration cannot loop.
    fn fallback_chain(&self, primary: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut chain = Vec::new();

        seen.insert(primary.to_string());
        chain.push(primary.to_string());

        if let Some(group) = self.pool.group(primary) {
            for fallback in &group.fallbacks {
                if seen.insert(fallback.clone()) {
                    chain.push(fallback.clone());
                }
            }
        }
        chain
    }

    async fn execute_attempt(
        &self,
        deployment: &Arc<Deployment>,
        request: &DispatchRequest,
    ) -> Result<(serde_json::Value, UsageRecord, Duration), ProviderFailure> {
        deployment.begin_request();
        let started = Instant::now();
        let result = tokio::time::timeout(
            self.policy.adapter_timeout,
            self.adapter.execute(deployment, request),
        )
        .await;

        let reply = match result {
            Ok(Ok(reply)) => reply,
            Ok(Err(failure)) => {
                deployment.end_request();
                return Err(failure);
            }
            Err(_) => {
                deployment.end_request();
                return Err(ProviderFailure::Timeout {
                    provider: deployment.provider.clone(),
                    elapsed_ms: self.policy.adapter_timeout.as_millis() as u64,
                });
            }
        };

        // Streamed usage is drained before any accounting runs, so a session
        // is billed once, after it completes. The request stays counted as
        // in flight until the stream ends; a realtime session occupies the
        // deployment for its whole duration, not just the initial call.
        let usage = match reply.usage {
            UsageReport::Complete(usage) => usage,
            UsageReport::Stream(stream) => UsageAggregator::combine(stream).await,
        };
        deployment.end_request();
        Ok((reply.body, usage, started.elapsed()))
    }

    /// Price the usage and attribute spend to every applicable scope. Runs
    /// exactly once per successful dispatch.
    fn account(
        &self,
        deployment: &Arc<Deployment>,
        request: &DispatchRequest,
        usage: &UsageRecord,
    ) -> CostResult {
        let cost = self.calculator.price_or_zero(
            &deployment.model,
            &deployment.provider,
            usage,
            deployment.pricing_override.as_ref(),
        );

        let now = Utc::now();
        let mut scopes = vec![ScopeKey::Provider(deployment.provider.clone())];
        if let Some(team) = &request.team {
            scopes.push(ScopeKey::Team(team.clone()));
        }
        if let Some(key) = &request.virtual_key {
            scopes.push(ScopeKey::Key(key.clone()));
        }
        for scope in &scopes {
            self.budgets.record(scope, cost.total, now);
        }

        if let Some(sink) = &self.sink {
            let sink = sink.clone();
            let record = SpendRecord {
                request_id: request.request_id,
                scopes,
                cost: cost.total,
                usage: usage.clone(),
                timestamp: now,
            };
            // Sink writes never block or fail the user-visible reply.
            tokio::spawn(async move {
                if let Err(err) = sink.append_spend_record(record).await {
                    warn!(%err, "failed to persist spend record");
                }
            });
        }

        cost
    }

    /// Reorder the not-yet-tried tail of the chain so groups whose advertised
    /// context window fits the request come first. The sort is stable; order
    /// within each half is preserved.
    fn prefer_fitting_groups(
        &self,
        chain: &mut [String],
        from: usize,
        required_tokens: Option<u64>,
    ) {
        let Some(required) = required_tokens else {
            return;
        };
        let fits = |name: &String| -> bool {
            self.pool
                .group(name)
                .and_then(|g| g.context_window)
                .map_or(false, |window| window >= required)
        };
        chain[from..].sort_by_key(|name| !fits(name));
    }

    fn retry_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(10));
        (self.policy.retry_delay * factor).min(self.policy.retry_delay_cap)
    }

    fn scaled_cooldown(&self, attempt: u32) -> chrono::Duration {
        let factor = 2i32.saturating_pow(attempt.saturating_sub(1).min(10));
        std::cmp::min(self.policy.cooldown_base * factor, self.policy.cooldown_cap)
    }
}
