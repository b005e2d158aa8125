//! Periodic budget tracking per accounting scope
//!
//! A scope is a provider, a team, or a virtual key. Each configured scope
//! carries a maximum budget per period; spend accumulates against it and
//! resets lazily when the period boundary has passed. There is no background
//! reset task, so an idle tracker costs nothing.

use crate::core::interfaces::SharedStateStore;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Accounting scope a spend amount attributes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKey {
    /// All spend through one provider, across teams and keys.
    Provider(String),
    /// All spend by one team.
    Team(String),
    /// All spend through one virtual key.
    Key(String),
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider(name) => write!(f, "provider:{name}"),
            Self::Team(name) => write!(f, "team:{name}"),
            Self::Key(name) => write!(f, "key:{name}"),
        }
    }
}

/// Budget window state for one scope.
#[derive(Debug, Clone)]
struct BudgetScope {
    max_budget: f64,
    period: Duration,
    spend: f64,
    reset_at: DateTime<Utc>,
}

impl BudgetScope {
    /// Roll the window forward past `now`, zeroing spend once per crossed
    /// boundary. Periods align to the configured start, not to the first
    /// request after an idle stretch.
    fn lazy_reset(&mut self, now: DateTime<Utc>) {
        while now >= self.reset_at {
            self.reset_at += self.period;
            self.spend = 0.0;
        }
    }
}

/// Tracks spend against configured budget scopes.
///
/// Unconfigured scopes are unlimited: spend against them is not recorded and
/// they are never over budget. With a shared state store attached, recorded
/// amounts write through and reads take the larger of the local and shared
/// views.
#[derive(Default)]
pub struct BudgetTracker {
    scopes: DashMap<ScopeKey, Mutex<BudgetScope>>,
    store: Option<Arc<dyn SharedStateStore>>,
}

impl BudgetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shared_state(mut self, store: Arc<dyn SharedStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Configure (or reconfigure) a budget for `key`. The first period starts
    /// at `now`; reconfiguring resets accumulated spend.
    pub fn configure(&self, key: ScopeKey, max_budget: f64, period: Duration, now: DateTime<Utc>) {
        debug!(scope = %key, max_budget, "configuring budget scope");
        self.scopes.insert(
            key,
            Mutex::new(BudgetScope {
                max_budget,
                period,
                spend: 0.0,
                reset_at: now + period,
            }),
        );
    }

    /// Current-period spend for `key`; 0.0 for unconfigured scopes.
    pub fn spend(&self, key: &ScopeKey, now: DateTime<Utc>) -> f64 {
        let Some(scope) = self.scopes.get(key) else {
            return 0.0;
        };
        let mut scope = scope.lock();
        scope.lazy_reset(now);

        match &self.store {
            Some(store) => {
                let shared = store.get_spend(key).unwrap_or(0.0);
                scope.spend.max(shared)
            }
            None => scope.spend,
        }
    }

    /// Attribute `amount` of spend to `key`. No-op for unconfigured scopes.
    pub fn record(&self, key: &ScopeKey, amount: f64, now: DateTime<Utc>) {
        let Some(scope) = self.scopes.get(key) else {
            return;
        };
        let mut scope = scope.lock();
        scope.lazy_reset(now);

        match &self.store {
            Some(store) => {
                scope.spend = store.add_spend(key, amount);
            }
            None => {
                scope.spend += amount;
            }
        }
        debug!(scope = %key, amount, total = scope.spend, "recorded spend");
    }

    /// Whether `key` has met or exceeded its budget for the current period.
    /// Always false for unconfigured scopes.
    pub fn is_over_budget(&self, key: &ScopeKey, now: DateTime<Utc>) -> bool {
        let Some(scope) = self.scopes.get(key) else {
            return false;
        };
        let mut scope = scope.lock();
        scope.lazy_reset(now);

        let spend = match &self.store {
            Some(store) => scope.spend.max(store.get_spend(key).unwrap_or(0.0)),
            None => scope.spend,
        };
        spend >= scope.max_budget
    }
}

impl fmt::Debug for BudgetTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetTracker")
            .field("scopes", &self.scopes.len())
            .field("shared_state", &self.store.is_some())
            .finish()
    }
}
