//! OpenAI chat-completions wire format, shared by OpenAI, Mistral, Groq and
//! Together AI.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::types::{GenerationParameters, GenerationRequest, TokenUsage};

use super::{StreamDelta, WireOutcome, WireProtocol, float};

/// Chat-completions protocol parameterized by vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiCompatible {
    base_url: &'static str,
    max_tokens_field: &'static str,
}

impl OpenAiCompatible {
    pub fn openai() -> Self {
        Self {
            base_url: "https://api.openai.com",
            max_tokens_field: "max_completion_tokens",
        }
    }

    pub fn mistral() -> Self {
        Self {
            base_url: "https://api.mistral.ai/v1",
            max_tokens_field: "max_tokens",
        }
    }

    pub fn groq() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1",
            max_tokens_field: "max_tokens",
        }
    }

    pub fn together() -> Self {
        Self {
            base_url: "https://api.together.xyz/v1",
            max_tokens_field: "max_tokens",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDeltaBody>,
}

#[derive(Debug, Deserialize)]
struct StreamDeltaBody {
    content: Option<String>,
}

impl WireProtocol for OpenAiCompatible {
    fn default_base_url(&self) -> &str {
        self.base_url
    }

    fn endpoint(&self, base_url: &str, _params: &GenerationParameters, _stream: bool) -> String {
        let base = base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn headers(&self, api_key: &str) -> HashMap<String, String> {
        HashMap::from([("Authorization".to_string(), format!("Bearer {api_key}"))])
    }

    fn build_body(
        &self,
        request: &GenerationRequest,
        params: &GenerationParameters,
        stream: bool,
    ) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = request.system_prompt() {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.user_prompt()}));

        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(params.model.clone()));
        body.insert("messages".to_string(), Value::Array(messages));
        body.insert("temperature".to_string(), float(params.temperature));
        body.insert("top_p".to_string(), float(params.top_p));
        body.insert(
            self.max_tokens_field.to_string(),
            Value::from(params.max_tokens),
        );
        for (key, value) in &params.extra {
            body.insert(key.clone(), value.clone());
        }
        body.insert("stream".to_string(), Value::Bool(stream));
        Value::Object(body)
    }

    fn parse_response(&self, body: &Value) -> Result<WireOutcome, String> {
        let parsed = ChatResponse::deserialize(body)
            .map_err(|err| format!("failed to parse chat completion: {err}"))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default();
        let usage = parsed.usage.map(|usage| TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        });
        Ok(WireOutcome::complete(text, usage))
    }

    fn parse_stream_event(&self, data: &str) -> Result<StreamDelta, String> {
        let chunk: ChatChunk = serde_json::from_str(data)
            .map_err(|err| format!("failed to parse stream chunk: {err}"))?;
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(StreamDelta::Skip);
        };
        Ok(match choice.delta.and_then(|delta| delta.content) {
            Some(text) if !text.is_empty() => StreamDelta::Text(text),
            _ => StreamDelta::Skip,
        })
    }
}
