//! Benchmark report produced by [`Dispatcher::benchmark`](crate::manager::Dispatcher::benchmark).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::LLMError;
use crate::types::{GenerationResult, TokenUsage};

/// Result of one (provider, prompt) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BenchmarkOutcome {
    Success {
        text: String,
        usage: Option<TokenUsage>,
    },
    Failure {
        /// Stable label such as `auth_error` or `config_error`.
        error_kind: String,
        message: String,
    },
}

/// One benchmarked call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkEntry {
    pub provider_id: String,
    pub model: String,
    pub prompt: String,
    pub outcome: BenchmarkOutcome,
    #[serde(with = "crate::types::duration_millis", rename = "latency_ms")]
    pub latency: Duration,
}

impl BenchmarkEntry {
    /// Entry filed under `provider_id`, the id that was benchmarked.
    pub(crate) fn success(provider_id: &str, prompt: &str, result: GenerationResult) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            model: result.model,
            prompt: prompt.to_string(),
            latency: result.latency,
            outcome: BenchmarkOutcome::Success {
                text: result.text,
                usage: result.usage,
            },
        }
    }

    pub(crate) fn failure(
        provider_id: &str,
        model: &str,
        prompt: &str,
        error: &LLMError,
        latency: Duration,
    ) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            model: model.to_string(),
            prompt: prompt.to_string(),
            latency,
            outcome: BenchmarkOutcome::Failure {
                error_kind: error.kind_label().to_string(),
                message: error.message(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, BenchmarkOutcome::Success { .. })
    }

    /// Text of a successful call.
    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            BenchmarkOutcome::Success { text, .. } => Some(text),
            BenchmarkOutcome::Failure { .. } => None,
        }
    }
}

/// Per-provider aggregate; averages cover successful calls only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub provider_id: String,
    pub model: String,
    pub attempts: usize,
    pub successes: usize,
    pub average_latency_ms: Option<f64>,
    pub average_characters: Option<f64>,
}

/// Entries in provider-major order plus one summary per provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub started_at_unix_ms: u64,
    pub entries: Vec<BenchmarkEntry>,
    pub summaries: Vec<ProviderSummary>,
}

impl BenchmarkReport {
    /// Builds the report, summarizing providers in order of first appearance.
    pub fn new(started_at: SystemTime, entries: Vec<BenchmarkEntry>) -> Self {
        let started_at_unix_ms = started_at
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        let summaries = summarize(&entries);
        Self {
            started_at_unix_ms,
            entries,
            summaries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn summarize(entries: &[BenchmarkEntry]) -> Vec<ProviderSummary> {
    let mut summaries: Vec<ProviderSummary> = Vec::new();
    let mut latency_totals: Vec<f64> = Vec::new();
    let mut character_totals: Vec<usize> = Vec::new();

    for entry in entries {
        let index = match summaries
            .iter()
            .position(|summary| summary.provider_id == entry.provider_id)
        {
            Some(index) => index,
            None => {
                summaries.push(ProviderSummary {
                    provider_id: entry.provider_id.clone(),
                    model: entry.model.clone(),
                    attempts: 0,
                    successes: 0,
                    average_latency_ms: None,
                    average_characters: None,
                });
                latency_totals.push(0.0);
                character_totals.push(0);
                summaries.len() - 1
            }
        };
        summaries[index].attempts += 1;
        if let Some(text) = entry.text() {
            summaries[index].successes += 1;
            latency_totals[index] += entry.latency.as_secs_f64() * 1000.0;
            character_totals[index] += text.chars().count();
        }
    }

    for (index, summary) in summaries.iter_mut().enumerate() {
        if summary.successes > 0 {
            let successes = summary.successes as f64;
            summary.average_latency_ms = Some(latency_totals[index] / successes);
            summary.average_characters = Some(character_totals[index] as f64 / successes);
        }
    }
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;

    fn ok(provider: &str, text: &str, millis: u64) -> BenchmarkEntry {
        BenchmarkEntry::success(
            provider,
            "prompt",
            GenerationResult {
                text: text.to_string(),
                usage: None,
                latency: Duration::from_millis(millis),
                provider_id: provider.to_string(),
                model: format!("{provider}-model"),
            },
        )
    }

    #[test]
    fn summaries_average_over_successes() {
        let failure = BenchmarkEntry::failure(
            "p1",
            "p1-model",
            "prompt",
            &AdapterError::rate_limited("p1", "slow down").into(),
            Duration::from_millis(5000),
        );
        let report = BenchmarkReport::new(
            UNIX_EPOCH + Duration::from_secs(1),
            vec![ok("p1", "abcd", 100), failure, ok("p1", "ab", 300), ok("p2", "xyz", 50)],
        );

        assert_eq!(report.started_at_unix_ms, 1000);
        assert_eq!(report.summaries.len(), 2);
        let p1 = &report.summaries[0];
        assert_eq!(p1.provider_id, "p1");
        assert_eq!((p1.attempts, p1.successes), (3, 2));
        assert_eq!(p1.average_latency_ms, Some(200.0));
        assert_eq!(p1.average_characters, Some(3.0));
        assert_eq!(report.summaries[1].provider_id, "p2");
    }

    #[test]
    fn providers_without_successes_have_no_averages() {
        let failure = BenchmarkEntry::failure(
            "p1",
            "m",
            "prompt",
            &AdapterError::auth("p1", "bad key").into(),
            Duration::ZERO,
        );
        let report = BenchmarkReport::new(SystemTime::now(), vec![failure]);
        assert_eq!(report.summaries[0].successes, 0);
        assert_eq!(report.summaries[0].average_latency_ms, None);
    }

    #[test]
    fn json_report_tags_outcomes() {
        let failure = BenchmarkEntry::failure(
            "p2",
            "m",
            "prompt",
            &AdapterError::auth("p2", "bad key").into(),
            Duration::from_millis(12),
        );
        let report = BenchmarkReport::new(SystemTime::now(), vec![ok("p1", "hi", 7), failure]);
        let value: serde_json::Value =
            serde_json::from_str(&report.to_json_pretty().expect("json")).expect("parse");

        assert_eq!(value["entries"][0]["outcome"]["status"], "success");
        assert_eq!(value["entries"][0]["latency_ms"], 7);
        assert_eq!(value["entries"][1]["outcome"]["status"], "failure");
        assert_eq!(value["entries"][1]["outcome"]["error_kind"], "auth_error");
    }
}
