//! Model groups, the deployment pool, and cooldown tracking
//!
//! The pool owns every registered deployment, grouped under client-facing
//! model group names, and tracks which deployments are temporarily excluded
//! by a cooldown. Cooldown expiry is a pure read against the clock; nothing
//! mutates on the lookup path.

use crate::core::errors::{CooldownReason, RouterError};
use crate::core::interfaces::{CooldownEntry, SharedStateStore};
use crate::core::router::deployment::{Deployment, DeploymentId};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Active cooldown for one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownState {
    pub until: DateTime<Utc>,
    pub reason: CooldownReason,
}

/// A client-facing model name backed by one or more deployments.
///
/// Deployment order is the configured order; selection strategies and the
/// tie-break rules depend on it being stable.
#[derive(Debug, Clone)]
pub struct ModelGroup {
    pub name: String,
    /// Model group names to try, in order, after this group is exhausted.
    pub fallbacks: Vec<String>,
    /// Advertised context window in tokens, when known.
    pub context_window: Option<u64>,
    /// Per-group retry override; the dispatch policy default applies when
    /// absent.
    pub max_retries: Option<u32>,
    deployments: Vec<Arc<Deployment>>,
}

impl ModelGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fallbacks: Vec::new(),
            context_window: None,
            max_retries: None,
            deployments: Vec::new(),
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<String>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    pub fn with_context_window(mut self, tokens: u64) -> Self {
        self.context_window = Some(tokens);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn with_deployment(mut self, deployment: Arc<Deployment>) -> Self {
        self.deployments.push(deployment);
        self
    }

    /// Deployments in configured order.
    pub fn deployments(&self) -> &[Arc<Deployment>] {
        &self.deployments
    }
}

/// Registry of model groups plus cooldown state.
#[derive(Default)]
pub struct DeploymentPool {
    groups: DashMap<String, ModelGroup>,
    by_id: DashMap<DeploymentId, Arc<Deployment>>,
    cooldowns: DashMap<DeploymentId, CooldownState>,
    store: Option<Arc<dyn SharedStateStore>>,
}

impl DeploymentPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shared_state(mut self, store: Arc<dyn SharedStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register (or replace) a model group and index its deployments.
    pub fn register_group(&self, group: ModelGroup) {
        for deployment in group.deployments() {
            self.by_id.insert(deployment.id.clone(), deployment.clone());
        }
        debug!(
            group = %group.name,
            deployments = group.deployments().len(),
            "registered model group"
        );
        self.groups.insert(group.name.clone(), group);
    }

    pub fn group(&self, name: &str) -> Option<ModelGroup> {
        self.groups.get(name).map(|g| g.clone())
    }

    pub fn deployment(&self, id: &str) -> Option<Arc<Deployment>> {
        self.by_id.get(id).map(|d| d.clone())
    }

    /// All deployments of a group in configured order, cooled-down ones
    /// included. Errors when the group is unknown.
    pub fn deployments_for(&self, group: &str) -> Result<Vec<Arc<Deployment>>, RouterError> {
        self.groups
            .get(group)
            .map(|g| g.deployments().to_vec())
            .ok_or_else(|| RouterError::UnknownModelGroup(group.to_string()))
    }

    /// Exclude a deployment from selection until `now + duration`.
    pub fn mark_cooldown(
        &self,
        id: &str,
        duration: Duration,
        reason: CooldownReason,
        now: DateTime<Utc>,
    ) {
        let state = CooldownState {
            until: now + duration,
            reason,
        };
        debug!(deployment = id, until = %state.until, ?state.reason, "cooling down deployment");

        if let Some(store) = &self.store {
            store.put_cooldown(
                id,
                CooldownEntry {
                    until: state.until,
                    reason: state.reason.clone(),
                },
            );
        }
        self.cooldowns.insert(id.to_string(), state);
    }

    /// Whether a deployment is selectable at `now`. An expired cooldown makes
    /// the deployment available again with no explicit clear step.
    ///
    /// An expired local entry does not settle the question: another process
    /// may have extended the cooldown through the shared store, so the store
    /// is consulted whenever the local view says available.
    pub fn is_available(&self, id: &str, now: DateTime<Utc>) -> bool {
        if let Some(state) = self.cooldowns.get(id) {
            if now < state.until {
                return false;
            }
        }
        if let Some(store) = &self.store {
            if let Some(entry) = store.get_cooldown(id) {
                return now >= entry.until;
            }
        }
        true
    }

    /// Current cooldown state, expired or not. `None` when the deployment was
    /// never cooled down.
    pub fn cooldown_state(&self, id: &str) -> Option<CooldownState> {
        self.cooldowns.get(id).map(|s| s.clone())
    }
}

impl fmt::Debug for DeploymentPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentPool")
            .field("groups", &self.groups.len())
            .field("deployments", &self.by_id.len())
            .field("cooldowns", &self.cooldowns.len())
            .finish()
    }
}
