use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use serde_json::Value;

use crate::config::{ProviderKind, ResolvedProvider, Settings};
use crate::error::AdapterError;
use crate::http::DynHttpTransport;
use crate::types::{
    GenerationParameters, GenerationRequest, GenerationResult, StreamChunk, TokenUsage,
};

pub mod anthropic;
pub mod cohere;
pub mod google;
pub mod http_adapter;
pub mod huggingface;
pub mod openai_compat;
pub mod replicate;
pub mod retry;

pub use http_adapter::HttpAdapter;

/// Stream of text chunks; the last item is always a chunk with `is_final` set,
/// unless the stream ends with an error.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, AdapterError>> + Send>>;

/// Uniform contract every vendor adapter implements.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Sends one prompt and waits for the complete answer.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult, AdapterError>;

    /// Sends one prompt and yields the answer incrementally.
    async fn stream(&self, request: GenerationRequest) -> Result<ChunkStream, AdapterError>;

    fn provider_id(&self) -> &str;

    /// Default model used when a request does not override it.
    fn model(&self) -> &str;

    /// Whether `stream` is backed by a native vendor stream.
    fn supports_streaming(&self) -> bool {
        true
    }
}

/// Shared handle to an adapter.
pub type DynAdapter = Arc<dyn ProviderAdapter>;

/// What a vendor returned for a non-streaming call.
#[derive(Debug, Clone, PartialEq)]
pub enum WireOutcome {
    /// The completion is ready.
    Complete {
        text: String,
        usage: Option<TokenUsage>,
    },
    /// The vendor accepted the work but has not finished; poll `poll_url`.
    Pending { poll_url: String },
}

impl WireOutcome {
    pub(crate) fn complete(text: impl Into<String>, usage: Option<TokenUsage>) -> Self {
        WireOutcome::Complete {
            text: text.into(),
            usage,
        }
    }
}

/// Meaning of one decoded SSE payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDelta {
    Text(String),
    /// Vendor signalled the end of the answer.
    Finished,
    /// Bookkeeping event without text.
    Skip,
}

/// Vendor payload translator consumed by [`HttpAdapter`].
///
/// Implementations are pure: they build URLs, headers and JSON bodies and read
/// JSON back, never touching the network.
pub trait WireProtocol: Clone + Send + Sync + 'static {
    /// Endpoint root used when the provider config has no `base_url`.
    fn default_base_url(&self) -> &str;

    /// Full URL for a call.
    fn endpoint(&self, base_url: &str, params: &GenerationParameters, stream: bool) -> String;

    /// Authentication and vendor headers; `Content-Type` is added by the adapter.
    fn headers(&self, api_key: &str) -> HashMap<String, String>;

    fn build_body(
        &self,
        request: &GenerationRequest,
        params: &GenerationParameters,
        stream: bool,
    ) -> Value;

    /// Reads a successful response body. `Err` carries a message for malformed or
    /// failed payloads.
    fn parse_response(&self, body: &Value) -> Result<WireOutcome, String>;

    /// Reads one SSE `data:` payload.
    fn parse_stream_event(&self, data: &str) -> Result<StreamDelta, String> {
        let _ = data;
        Ok(StreamDelta::Skip)
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    /// Extracts a human-readable message from an error body.
    fn error_message(&self, body: &str) -> Option<String> {
        extract_error_message(body)
    }
}

/// Looks for the usual vendor error shapes: `error.message`, `error` as a string,
/// `message` and `detail`.
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let candidates = [
        value.pointer("/error/message"),
        value.get("error"),
        value.get("message"),
        value.get("detail"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|candidate| candidate.as_str())
        .filter(|message| !message.trim().is_empty())
        .map(str::to_string)
}

/// JSON number for an `f32` parameter, keeping its shortest decimal form so `0.7`
/// is sent as `0.7` rather than `0.699999988079071`.
pub(crate) fn float(value: f32) -> Value {
    value
        .to_string()
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Copies `keys` from `extra` into `target` under their vendor names.
pub(crate) fn copy_extra(
    params: &GenerationParameters,
    target: &mut serde_json::Map<String, Value>,
    keys: &[(&str, &str)],
) {
    for (source, destination) in keys {
        if let Some(value) = params.extra_value(source) {
            target.insert((*destination).to_string(), value.clone());
        }
    }
}

/// Builds the adapter for a resolved provider.
pub fn build_adapter(
    resolved: ResolvedProvider,
    settings: &Settings,
    transport: DynHttpTransport,
) -> DynAdapter {
    let policy = settings.retry_policy();
    let timeout = settings.timeout();
    macro_rules! adapter {
        ($protocol:expr) => {{
            let adapter: DynAdapter = Arc::new(
                HttpAdapter::new($protocol, resolved, transport)
                    .with_retry_policy(policy)
                    .with_timeout(timeout),
            );
            adapter
        }};
    }
    let kind = resolved.config.kind;
    match kind {
        ProviderKind::OpenAi => adapter!(openai_compat::OpenAiCompatible::openai()),
        ProviderKind::Mistral => adapter!(openai_compat::OpenAiCompatible::mistral()),
        ProviderKind::Groq => adapter!(openai_compat::OpenAiCompatible::groq()),
        ProviderKind::Together => adapter!(openai_compat::OpenAiCompatible::together()),
        ProviderKind::Anthropic => adapter!(anthropic::AnthropicMessages::default()),
        ProviderKind::Google => adapter!(google::GeminiGenerateContent),
        ProviderKind::Cohere => adapter!(cohere::CohereChat),
        ProviderKind::Replicate => adapter!(replicate::ReplicatePredictions::new(timeout)),
        ProviderKind::HuggingFace => adapter!(huggingface::HuggingFaceInference),
    }
}
