// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.

//! Running token usage counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::TokenStatsConfig;
use crate::core::StateEvent;

/// Cache reads cost a tenth of regular input
const CACHE_READ_SAVING: f64 = 0.9;

/// Token counts of one or more API calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub cache_write: u64,
    pub cache_read: u64,
}

impl TokenUsage {
    /// Read an API `usage` object (`input_tokens`, `output_tokens`,
    /// `cache_creation_input_tokens`, `cache_read_input_tokens`).
    pub fn from_api_usage(usage: &Value) -> Self {
        Self {
            input: count(usage.get("input_tokens")),
            output: count(usage.get("output_tokens")),
            cache_write: count(usage.get("cache_creation_input_tokens")),
            cache_read: count(usage.get("cache_read_input_tokens")),
        }
    }

    /// Read a `tokens` detail object (`input`, `output`, `cache_write`, `cache_read`).
    pub fn from_details(tokens: &Value) -> Option<Self> {
        if !tokens.is_object() {
            return None;
        }
        Some(Self {
            input: count(tokens.get("input")),
            output: count(tokens.get("output")),
            cache_write: count(tokens.get("cache_write")),
            cache_read: count(tokens.get("cache_read")),
        })
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input = self.input.saturating_add(other.input);
        self.output = self.output.saturating_add(other.output);
        self.cache_write = self.cache_write.saturating_add(other.cache_write);
        self.cache_read = self.cache_read.saturating_add(other.cache_read);
    }

    /// Input plus output, saturating
    pub fn sum(&self) -> u64 {
        self.input.saturating_add(self.output)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn to_value(&self) -> Value {
        json!({
            "input": self.input,
            "output": self.output,
            "cache_write": self.cache_write,
            "cache_read": self.cache_read,
        })
    }
}

/// Non-negative integer, or a non-negative float truncated; anything else is 0.
fn count(value: Option<&Value>) -> u64 {
    match value {
        Some(v) => v
            .as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        None => 0,
    }
}

/// Totals as reported on the query surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenTotals {
    pub input: u64,
    pub output: u64,
    pub cache_write: u64,
    pub cache_read: u64,
    pub sum: u64,
}

/// Serializable view of [`TokenStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    pub total: TokenTotals,
    pub cache_hit_rate: f64,
    pub cost_savings: f64,
    pub tokens_per_minute: f64,
    pub session_duration: f64,
}

/// Token statistics
#[derive(Debug, Clone)]
pub struct TokenStats {
    enabled: bool,
    totals: TokenUsage,
    session_start: Option<DateTime<Utc>>,
    session_duration: f64,
}

impl TokenStats {
    pub fn new(config: &TokenStatsConfig) -> Self {
        Self {
            enabled: config.enabled,
            totals: TokenUsage::default(),
            session_start: None,
            session_duration: 0.0,
        }
    }

    /// Accumulate the `tokens` detail object of `event`, if any.
    pub fn update(&mut self, event: &StateEvent) {
        if !self.enabled {
            return;
        }
        let Some(usage) = event.details().get("tokens").and_then(TokenUsage::from_details) else {
            return;
        };

        self.totals.add(&usage);

        match self.session_start {
            None => self.session_start = Some(event.timestamp()),
            Some(start) => {
                let elapsed = event.timestamp() - start;
                self.session_duration = elapsed.num_milliseconds().max(0) as f64 / 1000.0;
            }
        }
    }

    pub fn totals(&self) -> TokenUsage {
        self.totals
    }

    /// Seconds between the first and the latest token-bearing event
    pub fn session_duration(&self) -> f64 {
        self.session_duration
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let denominator = self.totals.input as f64 + self.totals.cache_read as f64;
        if denominator == 0.0 {
            return 0.0;
        }
        self.totals.cache_read as f64 / denominator
    }

    /// Input-equivalent tokens saved by cache reads
    pub fn cost_savings(&self) -> f64 {
        self.totals.cache_read as f64 * CACHE_READ_SAVING
    }

    pub fn tokens_per_minute(&self) -> f64 {
        if self.session_duration == 0.0 {
            return 0.0;
        }
        (self.totals.input as f64 + self.totals.output as f64) / (self.session_duration / 60.0)
    }

    pub fn snapshot(&self) -> TokenSnapshot {
        TokenSnapshot {
            total: TokenTotals {
                input: self.totals.input,
                output: self.totals.output,
                cache_write: self.totals.cache_write,
                cache_read: self.totals.cache_read,
                sum: self.totals.sum(),
            },
            cache_hit_rate: round2(self.cache_hit_rate()),
            cost_savings: round2(self.cost_savings()),
            tokens_per_minute: round2(self.tokens_per_minute()),
            session_duration: round2(self.session_duration),
        }
    }

    pub fn reset(&mut self) {
        self.totals = TokenUsage::default();
        self.session_start = None;
        self.session_duration = 0.0;
    }
}

impl Default for TokenStats {
    fn default() -> Self {
        Self::new(&TokenStatsConfig::default())
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Status;
    use chrono::Duration;

    fn tokens_event(tokens: Value, at: DateTime<Utc>) -> StateEvent {
        StateEvent::new(Status::Working, 0.9, "claude_log")
            .with_detail("tokens", tokens)
            .with_timestamp(at)
    }

    #[test]
    fn test_zero_denominators() {
        let stats = TokenStats::default();
        assert_eq!(stats.cache_hit_rate(), 0.0);
        assert_eq!(stats.tokens_per_minute(), 0.0);
        assert_eq!(stats.cost_savings(), 0.0);
    }

    #[test]
    fn test_huge_counts_saturate() {
        let start = Utc::now();
        let mut stats = TokenStats::default();

        stats.update(&tokens_event(json!({ "input": u64::MAX, "cache_read": 1 }), start));
        stats.update(&tokens_event(
            json!({ "input": u64::MAX, "output": u64::MAX }),
            start + Duration::seconds(60),
        ));

        let totals = stats.totals();
        assert_eq!(totals.input, u64::MAX);
        assert_eq!(totals.output, u64::MAX);
        assert_eq!(totals.sum(), u64::MAX);

        let rate = stats.cache_hit_rate();
        assert!(rate >= 0.0 && rate < 1e-9);
        assert!(stats.tokens_per_minute() > 0.0);
        assert_eq!(stats.snapshot().total.sum, u64::MAX);
    }

    #[test]
    fn test_accumulates_and_derives() {
        let start = Utc::now();
        let mut stats = TokenStats::default();

        stats.update(&tokens_event(json!({ "input": 100, "output": 50, "cache_read": 300 }), start));
        // a single event has no duration yet
        assert_eq!(stats.tokens_per_minute(), 0.0);

        stats.update(&tokens_event(
            json!({ "input": 20, "output": 10, "cache_write": 5 }),
            start + Duration::seconds(30),
        ));

        let totals = stats.totals();
        assert_eq!(totals.input, 120);
        assert_eq!(totals.output, 60);
        assert_eq!(totals.cache_write, 5);
        assert_eq!(totals.cache_read, 300);

        assert!((stats.cache_hit_rate() - 300.0 / 420.0).abs() < 1e-12);
        assert!((stats.cost_savings() - 270.0).abs() < 1e-9);
        assert!((stats.tokens_per_minute() - 360.0).abs() < 1e-9);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total.sum, 180);
        assert_eq!(snapshot.cache_hit_rate, 0.71);
        assert_eq!(snapshot.session_duration, 30.0);
    }

    #[test]
    fn test_ignores_events_without_numeric_tokens() {
        let mut stats = TokenStats::default();
        stats.update(&StateEvent::new(Status::Idle, 0.5, "x"));
        stats.update(&tokens_event(json!("lots"), Utc::now()));
        stats.update(&tokens_event(json!({ "input": -4, "output": "many" }), Utc::now()));

        assert!(stats.totals().is_empty());
    }

    #[test]
    fn test_disabled_and_reset() {
        let mut disabled = TokenStats::new(&TokenStatsConfig { enabled: false });
        disabled.update(&tokens_event(json!({ "input": 5 }), Utc::now()));
        assert!(disabled.totals().is_empty());

        let mut stats = TokenStats::default();
        stats.update(&tokens_event(json!({ "input": 5 }), Utc::now()));
        stats.reset();
        assert!(stats.totals().is_empty());
        assert_eq!(stats.session_duration(), 0.0);
    }

    #[test]
    fn test_api_usage_names() {
        let usage = TokenUsage::from_api_usage(&json!({
            "input_tokens": 7,
            "output_tokens": 3,
            "cache_creation_input_tokens": 11,
            "cache_read_input_tokens": 13,
        }));
        assert_eq!(usage.to_value(), json!({ "input": 7, "output": 3, "cache_write": 11, "cache_read": 13 }));
    }
}
