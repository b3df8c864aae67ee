use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::types::{GenerationParameters, GenerationRequest, TokenUsage};

use super::{StreamDelta, WireOutcome, WireProtocol, copy_extra, float};

const DEFAULT_BASE_URL: &str = "https://api.cohere.com";

/// Cohere v2 chat API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CohereChat;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<AssistantMessage>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentItem>,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    tokens: Option<TokenCounts>,
    billed_units: Option<TokenCounts>,
}

#[derive(Debug, Deserialize)]
struct TokenCounts {
    input_tokens: Option<f64>,
    output_tokens: Option<f64>,
}

impl TokenCounts {
    fn into_usage(self) -> TokenUsage {
        TokenUsage::from_counts(
            self.input_tokens.map(|n| n as u64),
            self.output_tokens.map(|n| n as u64),
        )
    }
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<Value>,
}

impl WireProtocol for CohereChat {
    fn default_base_url(&self) -> &str {
        DEFAULT_BASE_URL
    }

    fn endpoint(&self, base_url: &str, _params: &GenerationParameters, _stream: bool) -> String {
        format!("{}/v2/chat", base_url.trim_end_matches('/'))
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
        body.insert("max_tokens".to_string(), Value::from(params.max_tokens));
        body.insert("p".to_string(), float(params.top_p));
        copy_extra(
            params,
            &mut body,
            &[("k", "k"), ("top_k", "k"), ("seed", "seed")],
        );
        body.insert("stream".to_string(), Value::Bool(stream));
        Value::Object(body)
    }

    fn parse_response(&self, body: &Value) -> Result<WireOutcome, String> {
        let parsed = ChatResponse::deserialize(body)
            .map_err(|err| format!("failed to parse Cohere response: {err}"))?;
        let text = parsed
            .message
            .map(|message| {
                message
                    .content
                    .into_iter()
                    .filter_map(|item| item.text)
                    .collect::<String>()
            })
            .unwrap_or_default();
        let usage = parsed
            .usage
            .and_then(|usage| usage.tokens.or(usage.billed_units))
            .map(TokenCounts::into_usage);
        Ok(WireOutcome::complete(text, usage))
    }

    fn parse_stream_event(&self, data: &str) -> Result<StreamDelta, String> {
        let event: StreamEvent = serde_json::from_str(data)
            .map_err(|err| format!("failed to parse stream event: {err}"))?;
        match event.kind.as_str() {
            "content-delta" => Ok(event
                .delta
                .as_ref()
                .and_then(|delta| delta.pointer("/message/content/text"))
                .and_then(Value::as_str)
                .map(|text| StreamDelta::Text(text.to_string()))
                .unwrap_or(StreamDelta::Skip)),
            "message-end" => Ok(StreamDelta::Finished),
            _ => Ok(StreamDelta::Skip),
        }
    }
}
