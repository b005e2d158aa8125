//! Narrow interfaces to external collaborators
//!
//! The core consumes these seams and never implements them: wire-format
//! translation lives behind `ProviderAdapter`, spend history behind
//! `PersistenceSink`, cross-process shared state behind `SharedStateStore`,
//! and memoization behind `Cache`.

use crate::core::budget::ScopeKey;
use crate::core::errors::{CooldownReason, ProviderFailure};
use crate::core::router::deployment::Deployment;
use crate::core::router::orchestrator::DispatchRequest;
use crate::core::usage::UsageRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Usage reported by an adapter call: a single normalized report for unary
/// calls, or an incremental stream of deltas for realtime sessions.
pub enum UsageReport {
    Complete(UsageRecord),
    Stream(BoxStream<'static, UsageRecord>),
}

impl std::fmt::Debug for UsageReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(usage) => f.debug_tuple("Complete").field(usage).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// Normalized success from a provider adapter.
#[derive(Debug)]
pub struct ProviderReply {
    /// Provider response body, already translated to the gateway's unified
    /// shape. Opaque to the dispatch core.
    pub body: serde_json::Value,
    pub usage: UsageReport,
}

/// Executes a request against one concrete deployment, translating the
/// provider's wire format in both directions.
///
/// The core depends only on this shape; per-provider request/response
/// conversion is entirely the adapter's concern.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn execute(
        &self,
        deployment: &Deployment,
        request: &DispatchRequest,
    ) -> Result<ProviderReply, ProviderFailure>;
}

/// One accounting record appended after a successful dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendRecord {
    pub request_id: Uuid,
    pub scopes: Vec<ScopeKey>,
    pub cost: f64,
    pub usage: UsageRecord,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
#[error("persistence sink error: {0}")]
pub struct SinkError(pub String);

/// Append-only spend history store.
///
/// Fire-and-forget from the core's perspective: a sink failure is logged and
/// never fails the user-visible request.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn append_spend_record(&self, record: SpendRecord) -> Result<(), SinkError>;
}

/// Cooldown snapshot exchanged with a shared state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownEntry {
    pub until: DateTime<Utc>,
    pub reason: CooldownReason,
}

/// Optional backing store for cooldown and budget state, so multiple process
/// instances converge on the same view.
///
/// Methods are synchronous: implementations are expected to be an in-process
/// facade (local cache plus background sync) over whatever shared backend
/// exists. The pool and budget tracker honor their contracts whether or not
/// a store is attached.
pub trait SharedStateStore: Send + Sync {
    fn get_cooldown(&self, deployment_id: &str) -> Option<CooldownEntry>;
    fn put_cooldown(&self, deployment_id: &str, entry: CooldownEntry);

    fn get_spend(&self, scope: &ScopeKey) -> Option<f64>;
    /// Add to the shared spend counter and return the converged total.
    fn add_spend(&self, scope: &ScopeKey, amount: f64) -> f64;
}

/// Get/set cache with per-entry TTL, invoked only at call sites that opt in
/// to memoization. Kept off the core's critical path.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String, ttl: Duration);
}
