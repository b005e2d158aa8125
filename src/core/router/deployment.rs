//! Deployment records and per-deployment runtime state
//!
//! A deployment is one concrete model endpoint (provider + model + connection
//! parameters). Runtime counters live in atomics so selection strategies can
//! read them without locking.

use crate::core::pricing::PricingEntry;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

pub type DeploymentId = String;

/// Mutable runtime state for one deployment. All counters use relaxed
/// ordering; they feed heuristics, not invariants.
#[derive(Debug, Default)]
pub struct DeploymentState {
    active_requests: AtomicU32,
    /// Exponentially-weighted moving average of request latency, microseconds.
    /// Zero means no completed request yet.
    avg_latency_us: AtomicU64,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    /// Timeouts in a row with no intervening success on this deployment.
    consecutive_timeouts: AtomicU32,
}

/// One concrete model endpoint within a model group.
#[derive(Debug, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    /// Provider name, e.g. "openai" or "azure". Also the provider budget
    /// scope this deployment's spend attributes to.
    pub provider: String,
    /// Provider-side model identifier used for pricing resolution.
    pub model: String,
    /// Opaque connection parameters handed to the adapter (endpoint, API key
    /// reference, api-version, ...).
    #[serde(default)]
    pub params: serde_json::Value,
    /// Relative share for weighted selection.
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub priority: u32,
    /// When set, wins outright over the cost-table entry for this deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing_override: Option<PricingEntry>,
    #[serde(skip)]
    state: DeploymentState,
}

fn default_weight() -> u32 {
    1
}

impl Deployment {
    pub fn new(
        id: impl Into<DeploymentId>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            model: model.into(),
            params: serde_json::Value::Null,
            weight: 1,
            priority: 0,
            pricing_override: None,
            state: DeploymentState::default(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_pricing_override(mut self, entry: PricingEntry) -> Self {
        self.pricing_override = Some(entry);
        self
    }

    /// Count a request as in flight. Paired with `end_request`.
    pub fn begin_request(&self) {
        self.state.active_requests.fetch_add(1, Ordering::Relaxed);
        self.state.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn end_request(&self) {
        self.state.active_requests.fetch_sub(1, Ordering::Relaxed);
    }

    /// Fold a completed request's latency into the moving average
    /// (weight 1/5 for the new sample). Resets the consecutive-timeout run.
    pub fn record_success(&self, latency_us: u64) {
        self.state
            .successful_requests
            .fetch_add(1, Ordering::Relaxed);
        self.state.consecutive_timeouts.store(0, Ordering::Relaxed);

        let prev = self.state.avg_latency_us.load(Ordering::Relaxed);
        let next = if prev == 0 {
            latency_us
        } else {
            (latency_us + 4 * prev) / 5
        };
        self.state.avg_latency_us.store(next, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.state.failed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a timeout against this deployment and return the length of the
    /// current consecutive-timeout run.
    pub fn record_timeout(&self) -> u32 {
        self.state.consecutive_timeouts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.state.consecutive_timeouts.load(Ordering::Relaxed)
    }

    /// Requests currently in flight against this deployment.
    pub fn in_flight(&self) -> u32 {
        self.state.active_requests.load(Ordering::Relaxed)
    }

    /// Smoothed latency in microseconds; 0 until the first success.
    pub fn avg_latency_us(&self) -> u64 {
        self.state.avg_latency_us.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.state.total_requests.load(Ordering::Relaxed)
    }

    pub fn successful_requests(&self) -> u64 {
        self.state.successful_requests.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.state.failed_requests.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_tracking() {
        let deployment = Deployment::new("d1", "openai", "gpt-4o");
        assert_eq!(deployment.in_flight(), 0);

        deployment.begin_request();
        deployment.begin_request();
        assert_eq!(deployment.in_flight(), 2);
        assert_eq!(deployment.total_requests(), 2);

        deployment.end_request();
        assert_eq!(deployment.in_flight(), 1);
    }

    #[test]
    fn test_latency_ewma() {
        let deployment = Deployment::new("d1", "openai", "gpt-4o");

        deployment.record_success(1_000);
        assert_eq!(deployment.avg_latency_us(), 1_000);

        deployment.record_success(6_000);
        // (6000 + 4 * 1000) / 5
        assert_eq!(deployment.avg_latency_us(), 2_000);
    }

    #[test]
    fn test_success_failure_counters() {
        let deployment = Deployment::new("d1", "openai", "gpt-4o");

        deployment.record_success(500);
        deployment.record_success(500);
        deployment.record_failure();

        assert_eq!(deployment.successful_requests(), 2);
        assert_eq!(deployment.failed_requests(), 1);
    }

    #[test]
    fn test_consecutive_timeouts_reset_on_success() {
        let deployment = Deployment::new("d1", "openai", "gpt-4o");

        assert_eq!(deployment.record_timeout(), 1);
        assert_eq!(deployment.record_timeout(), 2);
        assert_eq!(deployment.consecutive_timeouts(), 2);

        deployment.record_success(500);
        assert_eq!(deployment.consecutive_timeouts(), 0);
        assert_eq!(deployment.record_timeout(), 1);
    }

    #[test]
    fn test_builder_defaults() {
        let deployment = Deployment::new("d1", "azure", "gpt-4o")
            .with_weight(3)
            .with_priority(1);

        assert_eq!(deployment.weight, 3);
        assert_eq!(deployment.priority, 1);
        assert!(deployment.pricing_override.is_none());
    }
}
