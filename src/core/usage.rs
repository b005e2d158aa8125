//! Normalized usage records and streaming usage aggregation
//!
//! Every provider adapter reports billable units through `UsageRecord`.
//! Categories are disjoint: `input_text_tokens` never includes cached or
//! audio tokens, so cost math can weight each category independently.

use futures::{Stream, StreamExt, pin_mut};
use serde::{Deserialize, Serialize};

/// Normalized count of billable units for one request (or one combined
/// streaming session).
///
/// Token categories are disjoint. Non-token modalities (image pixels, audio
/// seconds) are optional and only set by adapters for the relevant call types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Non-cached text input tokens.
    #[serde(default)]
    pub input_text_tokens: u64,
    /// Audio input tokens (billed at their own rate).
    #[serde(default)]
    pub input_audio_tokens: u64,
    /// Cached input tokens (billed at the reduced cache-read rate).
    #[serde(default)]
    pub cached_input_tokens: u64,
    /// Text output tokens.
    #[serde(default)]
    pub output_text_tokens: u64,
    /// Audio output tokens.
    #[serde(default)]
    pub output_audio_tokens: u64,
    /// Generated image size in pixels (width × height), for per-pixel pricing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pixels: Option<u64>,
    /// Audio duration in seconds, for per-second pricing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_seconds: Option<f64>,
}

impl UsageRecord {
    /// Plain text-in/text-out usage.
    pub fn tokens(input: u64, output: u64) -> Self {
        Self {
            input_text_tokens: input,
            output_text_tokens: output,
            ..Default::default()
        }
    }

    /// True when no billable unit of any category was consumed.
    pub fn is_empty(&self) -> bool {
        self.input_text_tokens == 0
            && self.input_audio_tokens == 0
            && self.cached_input_tokens == 0
            && self.output_text_tokens == 0
            && self.output_audio_tokens == 0
            && self.image_pixels.unwrap_or(0) == 0
            && self.audio_seconds.unwrap_or(0.0) == 0.0
    }

    /// Total input tokens across text, audio, and cache categories.
    pub fn total_input_tokens(&self) -> u64 {
        self.input_text_tokens + self.input_audio_tokens + self.cached_input_tokens
    }

    /// Total output tokens across text and audio categories.
    pub fn total_output_tokens(&self) -> u64 {
        self.output_text_tokens + self.output_audio_tokens
    }

    /// Accumulate a partial usage delta into this record, category by
    /// category.
    pub fn merge(&mut self, delta: &UsageRecord) {
        self.input_text_tokens += delta.input_text_tokens;
        self.input_audio_tokens += delta.input_audio_tokens;
        self.cached_input_tokens += delta.cached_input_tokens;
        self.output_text_tokens += delta.output_text_tokens;
        self.output_audio_tokens += delta.output_audio_tokens;

        if let Some(pixels) = delta.image_pixels {
            self.image_pixels = Some(self.image_pixels.unwrap_or(0) + pixels);
        }
        if let Some(seconds) = delta.audio_seconds {
            self.audio_seconds = Some(self.audio_seconds.unwrap_or(0.0) + seconds);
        }
    }
}

/// Combines partial usage events from a streaming or realtime session into
/// one `UsageRecord`.
///
/// For a unary call with a single usage report this is the identity. A
/// session that produces zero usage-bearing events yields an all-zero record,
/// which prices to zero rather than failing.
#[derive(Debug, Default)]
pub struct UsageAggregator {
    combined: UsageRecord,
    events: usize,
}

impl UsageAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one partial usage event. May be called repeatedly over the
    /// lifetime of a session without blocking other in-flight requests.
    pub fn push(&mut self, delta: &UsageRecord) {
        self.combined.merge(delta);
        self.events += 1;
    }

    /// Number of usage-bearing events accumulated so far.
    pub fn events_seen(&self) -> usize {
        self.events
    }

    /// Close the session and return the combined record.
    pub fn finish(self) -> UsageRecord {
        self.combined
    }

    /// Drain a stream of partial usage events into one combined record.
    ///
    /// Returns when the stream ends, whether it completed gracefully or was
    /// cut short by cancellation upstream.
    pub async fn combine(stream: impl Stream<Item = UsageRecord>) -> UsageRecord {
        pin_mut!(stream);
        let mut aggregator = Self::new();
        while let Some(delta) = stream.next().await {
            aggregator.push(&delta);
        }
        aggregator.finish()
    }
}
