use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::types::{GenerationParameters, GenerationRequest, TokenUsage};

use super::{StreamDelta, WireOutcome, WireProtocol, copy_extra, float};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini `generateContent` API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeminiGenerateContent;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
    total_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn first_candidate_text(&self) -> String {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl WireProtocol for GeminiGenerateContent {
    fn default_base_url(&self) -> &str {
        DEFAULT_BASE_URL
    }

    fn endpoint(&self, base_url: &str, params: &GenerationParameters, stream: bool) -> String {
        let base = base_url.trim_end_matches('/');
        let model = params.model.trim_start_matches("models/");
        if stream {
            format!("{base}/v1beta/models/{model}:streamGenerateContent?alt=sse")
        } else {
            format!("{base}/v1beta/models/{model}:generateContent")
        }
    }

    fn headers(&self, api_key: &str) -> HashMap<String, String> {
        HashMap::from([("x-goog-api-key".to_string(), api_key.to_string())])
    }

    fn build_body(
        &self,
        request: &GenerationRequest,
        params: &GenerationParameters,
        _stream: bool,
    ) -> Value {
        let mut generation_config = Map::new();
        generation_config.insert("temperature".to_string(), float(params.temperature));
        generation_config.insert("topP".to_string(), float(params.top_p));
        generation_config.insert(
            "maxOutputTokens".to_string(),
            Value::from(params.max_tokens),
        );
        copy_extra(
            params,
            &mut generation_config,
            &[
                ("top_k", "topK"),
                ("candidate_count", "candidateCount"),
                ("stop_sequences", "stopSequences"),
            ],
        );

        let mut body = Map::new();
        body.insert(
            "contents".to_string(),
            json!([{"role": "user", "parts": [{"text": request.user_prompt()}]}]),
        );
        if let Some(system) = request.system_prompt() {
            body.insert(
                "systemInstruction".to_string(),
                json!({"parts": [{"text": system}]}),
            );
        }
        body.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );
        if let Some(safety) = params.extra_value("safety_settings") {
            body.insert("safetySettings".to_string(), safety.clone());
        }
        Value::Object(body)
    }

    fn parse_response(&self, body: &Value) -> Result<WireOutcome, String> {
        let parsed = GenerateContentResponse::deserialize(body)
            .map_err(|err| format!("failed to parse Gemini response: {err}"))?;
        if parsed.candidates.is_empty() {
            if let Some(reason) = parsed
                .prompt_feedback
                .as_ref()
                .and_then(|feedback| feedback.block_reason.as_deref())
            {
                return Err(format!("prompt blocked: {reason}"));
            }
        }
        let text = parsed.first_candidate_text();
        let usage = parsed.usage_metadata.map(|usage| TokenUsage {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        });
        Ok(WireOutcome::complete(text, usage))
    }

    fn parse_stream_event(&self, data: &str) -> Result<StreamDelta, String> {
        let chunk: GenerateContentResponse = serde_json::from_str(data)
            .map_err(|err| format!("failed to parse stream chunk: {err}"))?;
        let text = chunk.first_candidate_text();
        if text.is_empty() {
            Ok(StreamDelta::Skip)
        } else {
            Ok(StreamDelta::Text(text))
        }
    }
}
