use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classifies adapter failures so callers can decide whether to retry, switch
/// provider, or surface the message to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    /// Invalid, missing or revoked credentials (HTTP 401/403).
    Auth,
    /// The vendor throttled the request (HTTP 429).
    RateLimited,
    /// The call did not complete within the request timeout or caller deadline.
    Timeout,
    /// The vendor rejected the payload (unknown model, bad parameter, ...).
    InvalidRequest,
    /// Any other vendor-side or transport failure.
    Vendor,
}

impl AdapterErrorKind {
    /// Stable snake_case label, also used in benchmark reports.
    pub fn as_str(self) -> &'static str {
        match self {
            AdapterErrorKind::Auth => "auth_error",
            AdapterErrorKind::RateLimited => "rate_limited",
            AdapterErrorKind::Timeout => "timeout",
            AdapterErrorKind::InvalidRequest => "invalid_request",
            AdapterErrorKind::Vendor => "vendor_error",
        }
    }

    fn retriable_by_default(self) -> bool {
        matches!(self, AdapterErrorKind::RateLimited | AdapterErrorKind::Timeout)
    }
}

impl fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure raised by a provider adapter.
///
/// The `retriable` flag tells the shared retry helper whether another attempt may
/// succeed. Once the retry budget is spent the helper clears the flag before the
/// error reaches the caller, so a surfaced error is never silently retried again.
///
/// # Examples
///
/// ```
/// use llm_switchboard::error::{AdapterError, AdapterErrorKind};
///
/// let err = AdapterError::rate_limited("groq", "slow down");
/// assert_eq!(err.kind, AdapterErrorKind::RateLimited);
/// assert!(err.retriable);
/// assert!(!err.exhausted().retriable);
/// ```
#[derive(Debug, Clone, Error)]
#[error("{kind} from {provider}: {message}")]
pub struct AdapterError {
    /// Failure category.
    pub kind: AdapterErrorKind,
    /// Human-readable message, usually lifted from the vendor error body.
    pub message: String,
    /// Identifier of the provider that failed, such as `anthropic`.
    pub provider: String,
    /// Whether the failure is transient and eligible for another attempt.
    pub retriable: bool,
    /// Wait duration suggested by the vendor via `Retry-After`.
    pub retry_after: Option<Duration>,
}

impl AdapterError {
    /// Creates an error with the default retriable flag for `kind`.
    pub fn new(
        kind: AdapterErrorKind,
        provider: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: provider.into(),
            retriable: kind.retriable_by_default(),
            retry_after: None,
        }
    }

    pub fn auth(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Auth, provider, message)
    }

    pub fn rate_limited(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::RateLimited, provider, message)
    }

    pub fn timeout(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Timeout, provider, message)
    }

    pub fn invalid_request(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::InvalidRequest, provider, message)
    }

    pub fn vendor(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Vendor, provider, message)
    }

    /// Overrides the retriable flag.
    pub fn with_retriable(mut self, retriable: bool) -> Self {
        self.retriable = retriable;
        self
    }

    /// Attaches the vendor-suggested wait before the next attempt.
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Marks the error as final after the retry budget has been consumed.
    pub fn exhausted(mut self) -> Self {
        self.retriable = false;
        self
    }
}

/// Raised when the configuration store cannot satisfy a lookup or a settings file
/// is malformed. Fatal to the requested operation, never to the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown provider: {provider}")]
    UnknownProvider { provider: String },
    #[error("missing credential for {provider}: set {reference}")]
    MissingCredential {
        provider: String,
        /// Where the secret was expected, for example an environment variable name.
        reference: String,
    },
    #[error("invalid configuration for {field}: {reason}")]
    Invalid { field: String, reason: String },
    #[error("failed to read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Aggregates every failure the dispatcher can surface.
#[derive(Debug, Error)]
pub enum LLMError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl LLMError {
    /// Short label describing the failure category.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_switchboard::error::{AdapterError, ConfigError, LLMError};
    ///
    /// let err: LLMError = AdapterError::auth("openai", "bad key").into();
    /// assert_eq!(err.kind_label(), "auth_error");
    ///
    /// let err: LLMError = ConfigError::UnknownProvider { provider: "x".into() }.into();
    /// assert_eq!(err.kind_label(), "config_error");
    /// ```
    pub fn kind_label(&self) -> &'static str {
        match self {
            LLMError::Config(_) => "config_error",
            LLMError::Adapter(err) => err.kind.as_str(),
        }
    }

    /// Provider the error relates to, when known.
    pub fn provider(&self) -> Option<&str> {
        match self {
            LLMError::Adapter(err) => Some(&err.provider),
            LLMError::Config(ConfigError::UnknownProvider { provider })
            | LLMError::Config(ConfigError::MissingCredential { provider, .. }) => Some(provider),
            LLMError::Config(_) => None,
        }
    }

    /// Message without the category prefix.
    pub fn message(&self) -> String {
        match self {
            LLMError::Adapter(err) => err.message.clone(),
            LLMError::Config(err) => err.to_string(),
        }
    }

    /// Returns the adapter error when this is one.
    pub fn as_adapter(&self) -> Option<&AdapterError> {
        match self {
            LLMError::Adapter(err) => Some(err),
            LLMError::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_default_to_retriable() {
        assert!(AdapterError::rate_limited("p", "m").retriable);
        assert!(AdapterError::timeout("p", "m").retriable);
        assert!(!AdapterError::auth("p", "m").retriable);
        assert!(!AdapterError::invalid_request("p", "m").retriable);
        assert!(!AdapterError::vendor("p", "m").retriable);
        assert!(AdapterError::vendor("p", "m").with_retriable(true).retriable);
    }

    #[test]
    fn display_includes_kind_and_provider() {
        let err = AdapterError::auth("cohere", "invalid api token");
        assert_eq!(err.to_string(), "auth_error from cohere: invalid api token");
    }

    #[test]
    fn llm_error_reports_provider_for_config_failures() {
        let err: LLMError = ConfigError::MissingCredential {
            provider: "mistral".to_string(),
            reference: "MISTRAL_API_KEY".to_string(),
        }
        .into();
        assert_eq!(err.provider(), Some("mistral"));
        assert!(err.message().contains("MISTRAL_API_KEY"));
        assert!(err.as_adapter().is_none());
    }
}
