//! Failure taxonomy for the dispatch core
//!
//! Three families of errors flow through the system:
//! - `ProviderFailure`: classified outcomes of a provider adapter call
//! - `RouterError`: deployment selection failures
//! - `PricingError`: cost table resolution failures (never fatal to a request)
//!
//! `DispatchFailure` is the terminal error surfaced to callers; it carries the
//! ordered list of every underlying attempt error so no failure is silently
//! dropped.

use thiserror::Error;

/// Classified failure from a provider adapter call.
///
/// Wire-format details stay inside the adapter; the core only depends on this
/// classification to drive retry, cooldown, and fallback decisions.
#[derive(Debug, Clone, Error)]
pub enum ProviderFailure {
    /// 429 from the provider. Retryable, enters cooldown immediately.
    #[error("rate limited by {provider}")]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// Provider is down or returned a transient 5xx. Retryable, enters
    /// cooldown immediately.
    #[error("provider {provider} unavailable: {message}")]
    Unavailable { provider: String, message: String },

    /// The adapter call did not complete in time. Retryable; enters cooldown
    /// only after repeated timeouts on the same deployment.
    #[error("request to {provider} timed out after {elapsed_ms}ms")]
    Timeout { provider: String, elapsed_ms: u64 },

    /// The prompt does not fit the deployment's context window. Never retried
    /// on the same deployment; goes straight to fallback.
    #[error("context window exceeded on {provider}: {message}")]
    ContextWindowExceeded { provider: String, message: String },

    /// Credentials rejected. Fatal: no retry, no fallback.
    #[error("authentication failed for {provider}: {message}")]
    Authentication { provider: String, message: String },

    /// Malformed request. Fatal: no retry, no fallback.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl ProviderFailure {
    /// Whether the request may be retried (same or different deployment).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Unavailable { .. } | Self::Timeout { .. }
        )
    }

    /// Whether this failure should place the deployment in cooldown.
    ///
    /// Rate limits and provider outages cool down on the first occurrence;
    /// timeouts only once the same deployment has timed out consecutively
    /// (`consecutive_timeouts >= 2`).
    pub fn triggers_cooldown(&self, consecutive_timeouts: u32) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Unavailable { .. } => true,
            Self::Timeout { .. } => consecutive_timeouts >= 2,
            _ => false,
        }
    }

    /// Whether this failure ends the request outright.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::InvalidRequest { .. }
        )
    }

    /// Whether this failure should skip same-group retries and fall back.
    pub fn is_context_window(&self) -> bool {
        matches!(self, Self::ContextWindowExceeded { .. })
    }

    /// Cooldown reason corresponding to this failure, if any.
    pub fn cooldown_reason(&self) -> Option<CooldownReason> {
        match self {
            Self::RateLimited { .. } => Some(CooldownReason::RateLimited),
            Self::Unavailable { .. } => Some(CooldownReason::ProviderUnavailable),
            Self::Timeout { .. } => Some(CooldownReason::Timeout),
            _ => None,
        }
    }
}

/// Reason a deployment entered cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownReason {
    RateLimited,
    ProviderUnavailable,
    Timeout,
    Manual,
}

/// Deployment selection errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// The model group alias has no registered deployments.
    #[error("unknown model group: {0}")]
    UnknownModelGroup(String),

    /// Every candidate was filtered out (cooldown or empty group).
    #[error("no deployments available for model group: {0}")]
    NoDeploymentsAvailable(String),

    /// Candidates existed but all were excluded by provider budgets.
    #[error("all deployments for model group {0} are over budget")]
    BudgetExceeded(String),
}

/// Cost table resolution failure.
///
/// Callers must treat this as a zero-cost result with a warning; cost
/// tracking never blocks a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("no pricing entry for model: {model}")]
    UnknownPricing { model: String },
}

/// Union of per-attempt errors recorded by the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Provider(#[from] ProviderFailure),

    #[error(transparent)]
    Routing(#[from] RouterError),
}

/// One failed attempt within a dispatch.
///
/// `deployment_id` is `None` when the failure happened during selection
/// (group absent, everything cooled down or budget-excluded) rather than
/// during execution against a concrete deployment.
#[derive(Debug, Clone)]
pub struct AttemptError {
    pub model_group: String,
    pub deployment_id: Option<String>,
    pub error: DispatchError,
}

/// Terminal failure of a dispatch: the retry bound and the fallback chain are
/// both exhausted (or a fatal error ended the request early).
///
/// Carries every underlying attempt error in attempt order.
#[derive(Debug, Error)]
#[error("dispatch failed for model group {model_group} after {} attempt(s)", attempts.len())]
pub struct DispatchFailure {
    pub model_group: String,
    pub attempts: Vec<AttemptError>,
}
