//! Cost calculation
//!
//! Turns a normalized `UsageRecord` into a monetary figure via the model
//! cost table. Resolution order: per-deployment override, exact table match,
//! region-stripped match. An unresolvable model prices to zero with a
//! warning; cost tracking never blocks a response.

use crate::core::errors::PricingError;
use crate::core::interfaces::Cache;
use crate::core::pricing::{ModelCostTable, PricingEntry};
use crate::core::usage::UsageRecord;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// TTL for memoized model-id → table-key rewrites.
const RESOLUTION_CACHE_TTL: Duration = Duration::from_secs(300);

/// Computed cost with a per-category breakdown for auditability.
///
/// Amounts are unrounded `f64` USD; partial-cent rounding is the caller's
/// concern.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostResult {
    pub total: f64,
    pub input_text_cost: f64,
    pub input_audio_cost: f64,
    pub cached_input_cost: f64,
    pub output_text_cost: f64,
    pub output_audio_cost: f64,
    pub image_cost: f64,
    pub audio_duration_cost: f64,
    /// False when pricing could not be resolved and the amount was recorded
    /// as zero.
    pub pricing_resolved: bool,
}

/// Prices usage records against an injected cost table.
pub struct CostCalculator {
    table: Arc<ModelCostTable>,
    resolution_cache: Option<Arc<dyn Cache>>,
}

impl CostCalculator {
    pub fn new(table: Arc<ModelCostTable>) -> Self {
        Self {
            table,
            resolution_cache: None,
        }
    }

    /// Memoize model-id → canonical-key rewrites in the given cache. Only the
    /// string rewrite is cached, never monetary amounts.
    pub fn with_resolution_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.resolution_cache = Some(cache);
        self
    }

    /// Resolve the effective pricing entry and compute cost.
    ///
    /// `provider` tags the pricing family for diagnostics only; it never
    /// affects the math.
    pub fn price(
        &self,
        model: &str,
        provider: &str,
        usage: &UsageRecord,
        pricing_override: Option<&PricingEntry>,
    ) -> Result<CostResult, PricingError> {
        if let Some(entry) = pricing_override {
            debug!(model, provider, "using per-deployment pricing override");
            return Ok(compute(entry, usage));
        }

        let entry = self
            .resolve_entry(model)
            .ok_or_else(|| PricingError::UnknownPricing {
                model: model.to_string(),
            })?;

        Ok(compute(&entry, usage))
    }

    /// Like `price`, but an unresolvable model yields a zero-cost result with
    /// a surfaced warning instead of an error.
    pub fn price_or_zero(
        &self,
        model: &str,
        provider: &str,
        usage: &UsageRecord,
        pricing_override: Option<&PricingEntry>,
    ) -> CostResult {
        match self.price(model, provider, usage, pricing_override) {
            Ok(result) => result,
            Err(err) => {
                warn!(model, provider, %err, "cost recorded as zero");
                CostResult {
                    pricing_resolved: false,
                    ..Default::default()
                }
            }
        }
    }

    /// Estimated cost for a token count, used by cost-based routing. Returns
    /// `None` when pricing cannot be resolved.
    pub fn estimate(
        &self,
        model: &str,
        pricing_override: Option<&PricingEntry>,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Option<f64> {
        let entry = match pricing_override {
            Some(entry) => entry.clone(),
            None => self.resolve_entry(model)?,
        };

        Some(
            input_tokens as f64 * entry.input_cost_per_token
                + output_tokens as f64 * entry.output_cost_per_token,
        )
    }

    fn resolve_entry(&self, model: &str) -> Option<PricingEntry> {
        if let Some(cache) = &self.resolution_cache {
            let cache_key = format!("pricing:resolve:{model}");
            if let Some(canonical) = cache.get(&cache_key) {
                return self.table.get(&canonical).cloned();
            }

            let (canonical, entry) = self.table.resolve(model)?;
            cache.set(&cache_key, canonical.to_string(), RESOLUTION_CACHE_TTL);
            return Some(entry.clone());
        }

        self.table.resolve(model).map(|(_, entry)| entry.clone())
    }
}

/// Weighted sum over categories: `Σ count × rate`.
///
/// Cached input bills at the cache-read rate, audio tokens at their own
/// rates; either falls back to the corresponding text rate when the entry
/// does not price the category separately.
fn compute(entry: &PricingEntry, usage: &UsageRecord) -> CostResult {
    let input_text_cost = usage.input_text_tokens as f64 * entry.input_cost_per_token;
    let input_audio_cost = usage.input_audio_tokens as f64
        * entry
            .input_cost_per_audio_token
            .unwrap_or(entry.input_cost_per_token);
    let cached_input_cost = usage.cached_input_tokens as f64
        * entry
            .cache_read_input_token_cost
            .unwrap_or(entry.input_cost_per_token);
    let output_text_cost = usage.output_text_tokens as f64 * entry.output_cost_per_token;
    let output_audio_cost = usage.output_audio_tokens as f64
        * entry
            .output_cost_per_audio_token
            .unwrap_or(entry.output_cost_per_token);

    let image_cost = match (usage.image_pixels, entry.input_cost_per_pixel) {
        (Some(pixels), Some(rate)) => pixels as f64 * rate,
        _ => 0.0,
    };
    let audio_duration_cost = match (usage.audio_seconds, entry.input_cost_per_second) {
        (Some(seconds), Some(rate)) => seconds * rate,
        _ => 0.0,
    };

    let total = input_text_cost
        + input_audio_cost
        + cached_input_cost
        + output_text_cost
        + output_audio_cost
        + image_cost
        + audio_duration_cost;

    CostResult {
        total,
        input_text_cost,
        input_audio_cost,
        cached_input_cost,
        output_text_cost,
        output_audio_cost,
        image_cost,
        audio_duration_cost,
        pricing_resolved: true,
    }
}
