use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::ConfigError;
use crate::provider::retry::{BackoffStrategy, RetryPolicy};

/// Vendor wire protocol spoken by a configured provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "cohere")]
    Cohere,
    #[serde(rename = "mistral")]
    Mistral,
    #[serde(rename = "groq")]
    Groq,
    #[serde(rename = "together")]
    Together,
    #[serde(rename = "replicate")]
    Replicate,
    #[serde(rename = "huggingface")]
    HuggingFace,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 9] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Google,
        ProviderKind::Cohere,
        ProviderKind::Mistral,
        ProviderKind::Groq,
        ProviderKind::Together,
        ProviderKind::Replicate,
        ProviderKind::HuggingFace,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::Cohere => "cohere",
            ProviderKind::Mistral => "mistral",
            ProviderKind::Groq => "groq",
            ProviderKind::Together => "together",
            ProviderKind::Replicate => "replicate",
            ProviderKind::HuggingFace => "huggingface",
        }
    }

    /// Human-facing vendor name used in CLI output.
    pub fn display_name(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Anthropic => "Anthropic",
            ProviderKind::Google => "Google Gemini",
            ProviderKind::Cohere => "Cohere",
            ProviderKind::Mistral => "Mistral",
            ProviderKind::Groq => "Groq",
            ProviderKind::Together => "Together AI",
            ProviderKind::Replicate => "Replicate",
            ProviderKind::HuggingFace => "Hugging Face",
        }
    }

    /// Environment variable read when a provider declares no explicit credential.
    pub fn default_env_var(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Google => "GOOGLE_API_KEY",
            ProviderKind::Cohere => "COHERE_API_KEY",
            ProviderKind::Mistral => "MISTRAL_API_KEY",
            ProviderKind::Groq => "GROQ_API_KEY",
            ProviderKind::Together => "TOGETHER_API_KEY",
            ProviderKind::Replicate => "REPLICATE_API_TOKEN",
            ProviderKind::HuggingFace => "HUGGINGFACE_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a provider's secret comes from.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialRef {
    /// Named entry looked up through the store's [`CredentialSource`].
    Env { var: String },
    /// Secret embedded in the settings themselves.
    Inline { value: String },
}

impl fmt::Debug for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialRef::Env { var } => f.debug_struct("Env").field("var", var).finish(),
            CredentialRef::Inline { .. } => f.write_str("Inline { .. }"),
        }
    }
}

/// Defaults for one configured provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Key of this entry in [`Settings::models`]; filled in by [`Settings::validate`].
    #[serde(default)]
    pub provider_id: String,
    pub kind: ProviderKind,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Vendor-specific knobs such as `top_k` or `repetition_penalty`.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
    /// Explicit credential; defaults to the vendor's conventional variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialRef>,
    /// Alternative endpoint root, for proxies or compatible gateways.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider_id: kind.as_str().to_string(),
            kind,
            model: model.into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            extra: HashMap::new(),
            credential: None,
            base_url: None,
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Effective credential reference.
    pub fn credential_ref(&self) -> CredentialRef {
        self.credential.clone().unwrap_or_else(|| CredentialRef::Env {
            var: self.kind.default_env_var().to_string(),
        })
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_top_p() -> f32 {
    1.0
}

/// Process-wide configuration surface.
///
/// Loading precedence: [`Settings::default`], then a JSON file, then
/// `LLM_SWITCHBOARD_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Provider used by the dispatcher until switched.
    pub current_provider: String,
    /// Provider table keyed by provider id.
    pub models: BTreeMap<String, ProviderConfig>,
    /// System prompt applied when a call does not supply one.
    pub system_prompt: String,
    /// Prompt used by the single-shot driver when none is given.
    pub default_user_prompt: String,
    /// Per-attempt timeout in seconds.
    pub request_timeout: u64,
    /// Total attempt budget per call, including the first one.
    pub max_retries: u32,
    /// When false, streaming calls degrade to one final chunk.
    pub enable_streaming: bool,
    pub retry_backoff: BackoffStrategy,
    pub retry_base_delay_ms: u64,
    /// Upper bound on in-flight calls during a benchmark.
    pub benchmark_concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let models = [
            ProviderConfig::new(ProviderKind::OpenAi, "gpt-4o-mini"),
            ProviderConfig::new(ProviderKind::Anthropic, "claude-3-5-haiku-latest"),
            ProviderConfig::new(ProviderKind::Google, "gemini-1.5-flash")
                .with_extra("top_k", json!(40))
                .with_extra("candidate_count", json!(1)),
            ProviderConfig::new(ProviderKind::Cohere, "command-r").with_extra("k", json!(0)),
            ProviderConfig::new(ProviderKind::Mistral, "mistral-large-latest"),
            ProviderConfig::new(ProviderKind::Groq, "llama-3.1-8b-instant"),
            ProviderConfig::new(
                ProviderKind::Together,
                "meta-llama/Llama-3.3-70B-Instruct-Turbo",
            ),
            ProviderConfig::new(ProviderKind::Replicate, "meta/meta-llama-3-70b-instruct"),
            ProviderConfig::new(ProviderKind::HuggingFace, "HuggingFaceH4/zephyr-7b-beta")
                .with_extra("top_k", json!(50))
                .with_extra("repetition_penalty", json!(1.0))
                .with_extra("do_sample", json!(true))
                .with_extra("wait_for_model", json!(true)),
        ]
        .into_iter()
        .map(|config| (config.provider_id.clone(), config))
        .collect();

        Self {
            current_provider: ProviderKind::OpenAi.as_str().to_string(),
            models,
            system_prompt: "You are a helpful AI assistant. Provide concise and accurate answers."
                .to_string(),
            default_user_prompt: "Explain the concept of machine learning in 3 sentences."
                .to_string(),
            request_timeout: 30,
            max_retries: 3,
            enable_streaming: true,
            retry_backoff: BackoffStrategy::Exponential,
            retry_base_delay_ms: 500,
            benchmark_concurrency: 4,
        }
    }
}

impl Settings {
    /// Parses settings from JSON; absent fields keep their defaults.
    ///
    /// # Examples
    ///
    /// ```
    /// # use llm_switchboard::config::Settings;
    /// let settings = Settings::from_json_str(r#"{"current_provider": "groq", "max_retries": 5}"#).unwrap();
    /// assert_eq!(settings.current_provider, "groq");
    /// assert_eq!(settings.max_retries, 5);
    /// assert_eq!(settings.request_timeout, 30);
    /// ```
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let mut settings: Settings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads a JSON settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading settings");
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Applies `LLM_SWITCHBOARD_*` overrides from the process environment.
    pub fn apply_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides using `lookup` to read variables.
    pub fn apply_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(provider) = lookup("LLM_SWITCHBOARD_CURRENT_PROVIDER") {
            self.current_provider = provider.trim().to_string();
        }
        if let Some(raw) = lookup("LLM_SWITCHBOARD_REQUEST_TIMEOUT") {
            self.request_timeout = parse_env("request_timeout", &raw)?;
        }
        if let Some(raw) = lookup("LLM_SWITCHBOARD_MAX_RETRIES") {
            self.max_retries = parse_env("max_retries", &raw)?;
        }
        if let Some(raw) = lookup("LLM_SWITCHBOARD_ENABLE_STREAMING") {
            self.enable_streaming = parse_env("enable_streaming", &raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks invariants and fills each entry's `provider_id` from its key.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        for (id, config) in self.models.iter_mut() {
            if !config.provider_id.is_empty() && config.provider_id != *id {
                return Err(ConfigError::invalid(
                    format!("models.{id}.provider_id"),
                    format!("does not match its key ({})", config.provider_id),
                ));
            }
            config.provider_id = id.clone();
            if !(0.0..=1.0).contains(&config.top_p) {
                return Err(ConfigError::invalid(
                    format!("models.{id}.top_p"),
                    "must be within 0.0..=1.0",
                ));
            }
            if config.temperature < 0.0 {
                return Err(ConfigError::invalid(
                    format!("models.{id}.temperature"),
                    "must not be negative",
                ));
            }
        }
        if !self.models.contains_key(&self.current_provider) {
            return Err(ConfigError::invalid(
                "current_provider",
                format!("{} is not present in models", self.current_provider),
            ));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::invalid("max_retries", "must be at least 1"));
        }
        if self.request_timeout == 0 {
            return Err(ConfigError::invalid("request_timeout", "must be positive"));
        }
        if self.benchmark_concurrency == 0 {
            return Err(ConfigError::invalid(
                "benchmark_concurrency",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            backoff: self.retry_backoff,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            ..RetryPolicy::default()
        }
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(field, format!("cannot parse {raw:?}")))
}

/// Resolves credential references into secrets.
pub trait CredentialSource: Send + Sync {
    fn lookup(&self, name: &str) -> Option<String>;
}

/// Reads secrets from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// In-memory secrets, for embedding and tests.
#[derive(Default, Clone)]
pub struct StaticCredentials {
    secrets: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), secret.into());
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn lookup(&self, name: &str) -> Option<String> {
        self.secrets.get(name).cloned()
    }
}

/// A provider's configuration together with its resolved secret.
#[derive(Clone)]
pub struct ResolvedProvider {
    pub config: ProviderConfig,
    pub api_key: String,
}

impl fmt::Debug for ResolvedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedProvider")
            .field("config", &self.config)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Immutable provider table with credential resolution.
pub struct ConfigStore {
    settings: Settings,
    credentials: Arc<dyn CredentialSource>,
}

impl ConfigStore {
    /// Validates `settings` and freezes them.
    pub fn new(
        mut settings: Settings,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            settings,
            credentials,
        })
    }

    /// Store backed by [`EnvCredentials`].
    pub fn from_env(settings: Settings) -> Result<Self, ConfigError> {
        Self::new(settings, Arc::new(EnvCredentials))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.settings.models.contains_key(provider_id)
    }

    /// Provider ids in sorted order.
    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.settings.models.keys().map(String::as_str)
    }

    /// Returns the configuration for `provider_id`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownProvider`] for ids absent from the table and
    /// [`ConfigError::MissingCredential`] when the secret does not resolve to a
    /// non-empty value.
    pub fn get_config(&self, provider_id: &str) -> Result<ProviderConfig, ConfigError> {
        self.resolve(provider_id).map(|resolved| resolved.config)
    }

    /// Returns the configuration and secret for `provider_id`.
    pub fn resolve(&self, provider_id: &str) -> Result<ResolvedProvider, ConfigError> {
        let config = self.lookup(provider_id)?;
        let (reference, secret) = match config.credential_ref() {
            CredentialRef::Env { var } => {
                let secret = self.credentials.lookup(&var);
                (var, secret)
            }
            CredentialRef::Inline { value } => ("inline credential".to_string(), Some(value)),
        };
        match secret.map(|s| s.trim().to_string()) {
            Some(api_key) if !api_key.is_empty() => Ok(ResolvedProvider {
                config: config.clone(),
                api_key,
            }),
            _ => Err(ConfigError::MissingCredential {
                provider: provider_id.to_string(),
                reference,
            }),
        }
    }

    /// Whether `provider_id` exists and its credential resolves.
    pub fn has_credential(&self, provider_id: &str) -> bool {
        self.resolve(provider_id).is_ok()
    }

    /// Configuration lookup that skips credential resolution.
    pub(crate) fn lookup(&self, provider_id: &str) -> Result<&ProviderConfig, ConfigError> {
        self.settings
            .models
            .get(provider_id)
            .ok_or_else(|| ConfigError::UnknownProvider {
                provider: provider_id.to_string(),
            })
    }
}
