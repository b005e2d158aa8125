//! Model cost table: canonical model identifier → pricing schedule
//!
//! The table is an explicit injected dependency of the cost calculator, never
//! a process-wide global, so tests can override pricing without cross-test
//! leakage. Reload is an external operation: callers construct a fresh table
//! and swap it at whatever seam they own.

mod resolve;

pub use resolve::{is_valid_cloud_region, strip_region, strip_version_suffix};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Per-unit rates for one model, keyed by the same categories as
/// `UsageRecord`.
///
/// All rates are USD per single unit (token, pixel, second), matching the
/// litellm cost-map format. `litellm_provider` tags the pricing family; it
/// participates in fallback resolution only, never in cost math.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingEntry {
    pub input_cost_per_token: f64,
    pub output_cost_per_token: f64,
    /// Reduced rate for cached input tokens. Falls back to
    /// `input_cost_per_token` when absent.
    pub cache_read_input_token_cost: Option<f64>,
    pub input_cost_per_audio_token: Option<f64>,
    pub output_cost_per_audio_token: Option<f64>,
    /// Per-pixel rate for image generation models.
    pub input_cost_per_pixel: Option<f64>,
    /// Per-second rate for duration-priced audio models.
    pub input_cost_per_second: Option<f64>,
    /// Pricing family tag (e.g. "vertex_ai"); not used in cost math.
    pub litellm_provider: Option<String>,
    /// Context window metadata, when the cost map carries it.
    pub max_input_tokens: Option<u64>,
}

/// Errors loading a cost table from disk.
#[derive(Debug, Error)]
pub enum CostTableError {
    #[error("failed to read cost table: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse cost table JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Static/loadable mapping from canonical model identifier to pricing
/// schedule.
#[derive(Debug, Clone, Default)]
pub struct ModelCostTable {
    entries: HashMap<String, PricingEntry>,
}

impl ModelCostTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: HashMap<String, PricingEntry>) -> Self {
        Self { entries }
    }

    /// Parse a litellm-format JSON map (`{"model-name": {rates...}, ...}`).
    pub fn from_json_str(json: &str) -> Result<Self, CostTableError> {
        let entries: HashMap<String, PricingEntry> = serde_json::from_str(json)?;
        debug!(models = entries.len(), "parsed cost table");
        Ok(Self { entries })
    }

    /// Load a litellm-format JSON map from a local file.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CostTableError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&content)
    }

    pub fn insert(&mut self, model: impl Into<String>, entry: PricingEntry) {
        self.entries.insert(model.into(), entry);
    }

    /// Exact-match lookup.
    pub fn get(&self, model: &str) -> Option<&PricingEntry> {
        self.entries.get(model)
    }

    /// Resolve a model identifier to its pricing entry, applying the
    /// region/version stripping chain when the exact key is absent.
    ///
    /// Returns the canonical table key alongside the entry so callers can
    /// memoize the string rewrite.
    pub fn resolve(&self, model: &str) -> Option<(&str, &PricingEntry)> {
        resolve::resolve(self, model)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
