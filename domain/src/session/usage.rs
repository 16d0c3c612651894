//! Token usage accounting for one send operation.
//!
//! A send can span many assistant turns, each reporting its own
//! `assistant.usage` event. [`TokenUsageAccumulator`] sums those per-turn
//! reports and keeps the latest `session.usage_info` snapshot; it yields
//! `None` when no usage event was observed so callers can tell
//! "nothing reported" apart from "zero tokens".

use super::event::{UsageData, UsageInfoData};
use serde::{Deserialize, Serialize};

/// Usage aggregated across all turns of one send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    /// `input_tokens + output_tokens`
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    /// Cumulative backend-reported duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Number of `assistant.usage` events observed.
    pub turn_count: u32,
    /// Last-seen session token limit (not summed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_limit: Option<u64>,
    /// Last-seen session token count (not summed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Accumulates per-turn usage reports into one [`TokenUsage`].
#[derive(Debug, Clone, Default)]
pub struct TokenUsageAccumulator {
    usage: TokenUsage,
}

impl TokenUsageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one turn's `assistant.usage` report.
    pub fn record_usage(&mut self, data: &UsageData) {
        let usage = &mut self.usage;
        usage.input_tokens = usage.input_tokens.saturating_add(data.input_tokens);
        usage.output_tokens = usage.output_tokens.saturating_add(data.output_tokens);
        usage.cache_read_tokens = usage.cache_read_tokens.saturating_add(data.cache_read_tokens);
        usage.cache_write_tokens = usage
            .cache_write_tokens
            .saturating_add(data.cache_write_tokens);
        if let Some(cost) = data.cost {
            *usage.cost.get_or_insert(0.0) += cost;
        }
        if let Some(duration) = data.duration {
            *usage.duration.get_or_insert(0.0) += duration;
        }
        usage.turn_count = usage.turn_count.saturating_add(1);
    }

    /// Overwrite the session quota snapshot with a `session.usage_info` report.
    pub fn record_quota(&mut self, data: &UsageInfoData) {
        if data.token_limit.is_some() {
            self.usage.token_limit = data.token_limit;
        }
        if data.current_tokens.is_some() {
            self.usage.current_tokens = data.current_tokens;
        }
    }

    /// Number of usage events recorded so far.
    pub fn turn_count(&self) -> u32 {
        self.usage.turn_count
    }

    /// Snapshot of the aggregate, or `None` if no usage event was recorded.
    pub fn summary(&self) -> Option<TokenUsage> {
        if self.usage.turn_count == 0 {
            return None;
        }
        let mut usage = self.usage.clone();
        usage.total_tokens = usage.total();
        Some(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u64, output: u64, cache_read: u64, cache_write: u64) -> UsageData {
        UsageData {
            input_tokens: input,
            output_tokens: output,
            cache_read_tokens: cache_read,
            cache_write_tokens: cache_write,
            ..Default::default()
        }
    }

    #[test]
    fn no_usage_events_yields_none() {
        let acc = TokenUsageAccumulator::new();
        assert!(acc.summary().is_none());
    }

    #[test]
    fn quota_alone_does_not_produce_usage() {
        let mut acc = TokenUsageAccumulator::new();
        acc.record_quota(&UsageInfoData {
            token_limit: Some(128_000),
            current_tokens: Some(9_000),
        });
        assert!(acc.summary().is_none());
    }

    #[test]
    fn sums_turns_and_derives_total() {
        let mut acc = TokenUsageAccumulator::new();
        acc.record_usage(&usage(100, 30, 0, 0));
        acc.record_usage(&usage(200, 80, 50, 10));

        let summary = acc.summary().unwrap();
        assert_eq!(summary.input_tokens, 300);
        assert_eq!(summary.output_tokens, 110);
        assert_eq!(summary.cache_read_tokens, 50);
        assert_eq!(summary.cache_write_tokens, 10);
        assert_eq!(summary.total_tokens, 410);
        assert_eq!(summary.turn_count, 2);
        assert!(summary.cost.is_none());
        assert!(summary.duration.is_none());
    }

    #[test]
    fn cost_and_duration_only_accumulate_when_reported() {
        let mut acc = TokenUsageAccumulator::new();
        acc.record_usage(&UsageData {
            cost: Some(1.5),
            ..usage(1, 1, 0, 0)
        });
        acc.record_usage(&usage(1, 1, 0, 0));
        acc.record_usage(&UsageData {
            cost: Some(0.5),
            duration: Some(1200.0),
            ..usage(1, 1, 0, 0)
        });

        let summary = acc.summary().unwrap();
        assert_eq!(summary.cost, Some(2.0));
        assert_eq!(summary.duration, Some(1200.0));
    }

    #[test]
    fn quota_is_overwritten_not_summed() {
        let mut acc = TokenUsageAccumulator::new();
        acc.record_usage(&usage(10, 10, 0, 0));
        acc.record_quota(&UsageInfoData {
            token_limit: Some(100_000),
            current_tokens: Some(5_000),
        });
        acc.record_quota(&UsageInfoData {
            token_limit: Some(100_000),
            current_tokens: Some(7_500),
        });

        let summary = acc.summary().unwrap();
        assert_eq!(summary.token_limit, Some(100_000));
        assert_eq!(summary.current_tokens, Some(7_500));
    }

    #[test]
    fn oversized_counts_saturate() {
        let mut acc = TokenUsageAccumulator::new();
        acc.record_usage(&usage(u64::MAX, u64::MAX, u64::MAX, 1));
        acc.record_usage(&usage(5, 5, 5, u64::MAX));

        let summary = acc.summary().unwrap();
        assert_eq!(summary.input_tokens, u64::MAX);
        assert_eq!(summary.output_tokens, u64::MAX);
        assert_eq!(summary.cache_read_tokens, u64::MAX);
        assert_eq!(summary.cache_write_tokens, u64::MAX);
        assert_eq!(summary.total_tokens, u64::MAX);
        assert_eq!(summary.turn_count, 2);
    }

    #[test]
    fn serializes_camel_case_and_skips_absent_fields() {
        let mut acc = TokenUsageAccumulator::new();
        acc.record_usage(&usage(3, 4, 0, 0));
        let json = serde_json::to_value(acc.summary().unwrap()).unwrap();
        assert_eq!(json["inputTokens"], 3);
        assert_eq!(json["totalTokens"], 7);
        assert!(json.get("cost").is_none());
        assert!(json.get("tokenLimit").is_none());
    }
}
