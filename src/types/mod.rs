//! Shared data structures modeling generation requests and results.
//!
//! These types normalize vendor-specific payloads so the dispatcher and the
//! drivers can stay agnostic of individual API differences.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::config::ProviderConfig;

/// Optional per-request replacements for a provider's default parameters.
///
/// Every field is optional so callers only set the knobs they care about.
///
/// # Examples
///
/// ```
/// # use llm_switchboard::types::ParameterOverrides;
/// let overrides = ParameterOverrides {
///     temperature: Some(0.1),
///     ..Default::default()
/// };
/// assert!(overrides.max_tokens.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterOverrides {
    /// Model identifier override.
    pub model: Option<String>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Maximum number of output tokens.
    pub max_tokens: Option<u32>,
    /// Nucleus sampling parameter.
    pub top_p: Option<f32>,
    /// Vendor-specific knobs; top-level keys replace the configured ones.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl ParameterOverrides {
    pub fn is_empty(&self) -> bool {
        self.model.is_none()
            && self.temperature.is_none()
            && self.max_tokens.is_none()
            && self.top_p.is_none()
            && self.extra.is_empty()
    }
}

/// Effective parameters for one call, after overrides were merged onto defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub extra: HashMap<String, Value>,
}

impl GenerationParameters {
    /// Merges `overrides` onto the provider defaults.
    ///
    /// Each scalar field is taken from the override when present. `extra` is merged
    /// shallowly: a top-level key in the override replaces the configured value as a
    /// whole, nested objects are never merged key by key.
    ///
    /// # Examples
    ///
    /// ```
    /// # use llm_switchboard::config::Settings;
    /// # use llm_switchboard::types::{GenerationParameters, ParameterOverrides};
    /// let settings = Settings::default();
    /// let defaults = &settings.models["openai"];
    /// let merged = GenerationParameters::merge(
    ///     defaults,
    ///     &ParameterOverrides { max_tokens: Some(64), ..Default::default() },
    /// );
    /// assert_eq!(merged.max_tokens, 64);
    /// assert_eq!(merged.model, defaults.model);
    /// ```
    pub fn merge(defaults: &ProviderConfig, overrides: &ParameterOverrides) -> Self {
        let mut extra = defaults.extra.clone();
        for (key, value) in &overrides.extra {
            extra.insert(key.clone(), value.clone());
        }
        Self {
            model: overrides
                .model
                .clone()
                .unwrap_or_else(|| defaults.model.clone()),
            temperature: overrides.temperature.unwrap_or(defaults.temperature),
            max_tokens: overrides.max_tokens.unwrap_or(defaults.max_tokens),
            top_p: overrides.top_p.unwrap_or(defaults.top_p),
            extra,
        }
    }

    /// Returns an `extra` entry by key.
    pub fn extra_value(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

/// Normalized request accepted by every adapter.
///
/// Requests are immutable once built; builder methods consume and return `Self`.
///
/// # Examples
///
/// ```
/// # use llm_switchboard::types::GenerationRequest;
/// let request = GenerationRequest::new("Explain ownership in one sentence.")
///     .with_system_prompt("You are terse.");
/// assert_eq!(request.system_prompt(), Some("You are terse."));
/// ```
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    system_prompt: Option<String>,
    user_prompt: String,
    overrides: ParameterOverrides,
    deadline: Option<Instant>,
}

impl GenerationRequest {
    pub fn new(user_prompt: impl Into<String>) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_overrides(mut self, overrides: ParameterOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Aborts the call with a timeout error once `deadline` passes.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Convenience for [`GenerationRequest::with_deadline`] relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref().filter(|s| !s.is_empty())
    }

    pub fn user_prompt(&self) -> &str {
        &self.user_prompt
    }

    pub fn overrides(&self) -> &ParameterOverrides {
        &self.overrides
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Token usage metrics reported by the vendor.
///
/// # Examples
///
/// ```
/// # use llm_switchboard::types::TokenUsage;
/// let usage = TokenUsage::from_counts(Some(1200), Some(200));
/// assert_eq!(usage.total_tokens, Some(1400));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    /// Builds usage from prompt/completion counts, deriving the total when both exist.
    pub fn from_counts(prompt_tokens: Option<u64>, completion_tokens: Option<u64>) -> Self {
        let total_tokens = match (prompt_tokens, completion_tokens) {
            (Some(prompt), Some(completion)) => Some(prompt + completion),
            _ => None,
        };
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none() && self.completion_tokens.is_none() && self.total_tokens.is_none()
    }
}

/// Normalized result of a single generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Produced content; may be empty when the vendor returned no text.
    pub text: String,
    /// Token accounting, when the vendor reports it.
    pub usage: Option<TokenUsage>,
    /// Wall-clock time spent in the call, including retries.
    #[serde(with = "duration_millis")]
    pub latency: Duration,
    pub provider_id: String,
    /// Model that served the request.
    pub model: String,
}

/// Incremental piece of a streamed completion.
///
/// A stream ends with exactly one chunk whose `is_final` is `true`; its text may be
/// empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub text: String,
    pub is_final: bool,
}

impl StreamChunk {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn last(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use serde_json::json;

    #[test]
    fn merge_replaces_only_overridden_fields() {
        let settings = Settings::default();
        let defaults = &settings.models["anthropic"];
        let overrides = ParameterOverrides {
            temperature: Some(0.0),
            top_p: Some(0.5),
            ..Default::default()
        };

        let merged = GenerationParameters::merge(defaults, &overrides);
        assert_eq!(merged.temperature, 0.0);
        assert_eq!(merged.top_p, 0.5);
        assert_eq!(merged.model, defaults.model);
        assert_eq!(merged.max_tokens, defaults.max_tokens);
        assert_eq!(merged.extra, defaults.extra);
    }

    #[test]
    fn merge_of_extra_is_shallow() {
        let mut settings = Settings::default();
        let defaults = settings.models.get_mut("google").expect("google");
        defaults.extra.insert(
            "safety".to_string(),
            json!({"harassment": "block_none", "hate": "block_low"}),
        );
        defaults.extra.insert("top_k".to_string(), json!(40));

        let overrides = ParameterOverrides {
            extra: HashMap::from([("safety".to_string(), json!({"harassment": "block_all"}))]),
            ..Default::default()
        };
        let merged = GenerationParameters::merge(defaults, &overrides);

        assert_eq!(merged.extra["safety"], json!({"harassment": "block_all"}));
        assert_eq!(merged.extra["top_k"], json!(40));
    }

    #[test]
    fn empty_system_prompt_is_treated_as_absent() {
        let request = GenerationRequest::new("hi").with_system_prompt("");
        assert_eq!(request.system_prompt(), None);
    }

    #[test]
    fn usage_total_requires_both_counts() {
        assert_eq!(TokenUsage::from_counts(Some(3), None).total_tokens, None);
        assert!(TokenUsage::default().is_empty());
    }

    #[test]
    fn result_serializes_latency_in_millis() {
        let result = GenerationResult {
            text: "ok".into(),
            usage: None,
            latency: Duration::from_millis(1250),
            provider_id: "groq".into(),
            model: "llama-3.1-8b-instant".into(),
        };
        let value = serde_json::to_value(&result).expect("serialize");
        assert_eq!(value["latency"], json!(1250));
    }
}
