use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::types::{GenerationParameters, GenerationRequest, TokenUsage};

use super::{StreamDelta, WireOutcome, WireProtocol, copy_extra, float};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_VERSION: &str = "2023-06-01";

/// Anthropic Messages API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnthropicMessages {
    version: String,
}

impl Default for AnthropicMessages {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
        }
    }
}

impl AnthropicMessages {
    /// Overrides the `anthropic-version` header.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<EventDelta>,
    error: Option<EventError>,
}

#[derive(Debug, Deserialize)]
struct EventDelta {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventError {
    message: Option<String>,
}

impl WireProtocol for AnthropicMessages {
    fn default_base_url(&self) -> &str {
        DEFAULT_BASE_URL
    }

    fn endpoint(&self, base_url: &str, _params: &GenerationParameters, _stream: bool) -> String {
        let base = base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }

    fn headers(&self, api_key: &str) -> HashMap<String, String> {
        HashMap::from([
            ("x-api-key".to_string(), api_key.to_string()),
            ("anthropic-version".to_string(), self.version.clone()),
        ])
    }

    fn build_body(
        &self,
        request: &GenerationRequest,
        params: &GenerationParameters,
        stream: bool,
    ) -> Value {
        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(params.model.clone()));
        body.insert("max_tokens".to_string(), Value::from(params.max_tokens));
        if let Some(system) = request.system_prompt() {
            body.insert("system".to_string(), Value::String(system.to_string()));
        }
        body.insert(
            "messages".to_string(),
            json!([{"role": "user", "content": request.user_prompt()}]),
        );
        body.insert("temperature".to_string(), float(params.temperature));
        body.insert("top_p".to_string(), float(params.top_p));
        copy_extra(params, &mut body, &[("top_k", "top_k"), ("stop_sequences", "stop_sequences")]);
        if stream {
            body.insert("stream".to_string(), Value::Bool(true));
        }
        Value::Object(body)
    }

    fn parse_response(&self, body: &Value) -> Result<WireOutcome, String> {
        let parsed = MessagesResponse::deserialize(body)
            .map_err(|err| format!("failed to parse Anthropic message: {err}"))?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        let usage = parsed
            .usage
            .map(|usage| TokenUsage::from_counts(usage.input_tokens, usage.output_tokens));
        Ok(WireOutcome::complete(text, usage))
    }

    fn parse_stream_event(&self, data: &str) -> Result<StreamDelta, String> {
        let event: StreamEvent = serde_json::from_str(data)
            .map_err(|err| format!("failed to parse stream event: {err}"))?;
        match event.kind.as_str() {
            "content_block_delta" => Ok(event
                .delta
                .and_then(|delta| delta.text)
                .map(StreamDelta::Text)
                .unwrap_or(StreamDelta::Skip)),
            "message_stop" => Ok(StreamDelta::Finished),
            "error" => Err(event
                .error
                .and_then(|error| error.message)
                .unwrap_or_else(|| "stream error".to_string())),
            _ => Ok(StreamDelta::Skip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::types::ParameterOverrides;

    fn params(overrides: ParameterOverrides) -> GenerationParameters {
        let settings = Settings::default();
        GenerationParameters::merge(&settings.models["anthropic"], &overrides)
    }

    #[test]
    fn body_places_system_prompt_at_top_level() {
        let request = GenerationRequest::new("Name a colour.").with_system_prompt("One word.");
        let overrides = ParameterOverrides {
            max_tokens: Some(16),
            extra: HashMap::from([("top_k".to_string(), json!(5))]),
            ..Default::default()
        };
        let body = AnthropicMessages::default().build_body(&request, &params(overrides), false);

        assert_eq!(body["system"], json!("One word."));
        assert_eq!(body["max_tokens"], json!(16));
        assert_eq!(body["top_k"], json!(5));
        assert_eq!(
            body["messages"],
            json!([{"role": "user", "content": "Name a colour."}])
        );
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn headers_carry_key_and_version() {
        let headers = AnthropicMessages::default().headers("sk-ant");
        assert_eq!(headers["x-api-key"], "sk-ant");
        assert_eq!(headers["anthropic-version"], DEFAULT_VERSION);
        assert!(!headers.contains_key("Authorization"));
    }

    #[test]
    fn parses_text_blocks_and_usage() {
        let body = json!({
            "type": "message",
            "content": [
                {"type": "text", "text": "Blue"},
                {"type": "tool_use", "id": "t1", "name": "noop", "input": {}},
                {"type": "text", "text": "."}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 2}
        });
        let outcome = AnthropicMessages::default().parse_response(&body).expect("outcome");
        assert_eq!(
            outcome,
            WireOutcome::complete("Blue.", Some(TokenUsage::from_counts(Some(12), Some(2))))
        );
    }

    #[test]
    fn stream_events_map_to_deltas() {
        let protocol = AnthropicMessages::default();
        assert_eq!(
            protocol.parse_stream_event(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#
            ),
            Ok(StreamDelta::Text("Hi".to_string()))
        );
        assert_eq!(
            protocol.parse_stream_event(r#"{"type":"ping"}"#),
            Ok(StreamDelta::Skip)
        );
        assert_eq!(
            protocol.parse_stream_event(r#"{"type":"message_stop"}"#),
            Ok(StreamDelta::Finished)
        );
        assert_eq!(
            protocol.parse_stream_event(
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#
            ),
            Err("Overloaded".to_string())
        );
    }
}
