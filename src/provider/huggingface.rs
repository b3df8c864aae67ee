use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::types::{GenerationParameters, GenerationRequest};

use super::{WireOutcome, WireProtocol, copy_extra, float};

const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";

/// Hugging Face serverless Inference API (text generation task).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HuggingFaceInference;

/// Prompt layout by model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PromptTemplate {
    /// Conversational GPT-style models (`gpt2`, `DialoGPT`).
    Dialogue,
    /// Instruction-tuned encoder-decoder models (`t5`, `flan-*`).
    Instruction,
    Plain,
}

impl PromptTemplate {
    pub(crate) fn for_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        if model.contains("gpt") {
            PromptTemplate::Dialogue
        } else if model.contains("t5") || model.contains("flan") {
            PromptTemplate::Instruction
        } else {
            PromptTemplate::Plain
        }
    }

    pub(crate) fn render(self, system: Option<&str>, user: &str) -> String {
        match (self, system) {
            (PromptTemplate::Dialogue, Some(system)) => {
                format!("{system}\n\nUser: {user}\nAssistant:")
            }
            (PromptTemplate::Dialogue, None) => format!("User: {user}\nAssistant:"),
            (PromptTemplate::Instruction, Some(system)) => format!("system: {system} user: {user}"),
            (PromptTemplate::Plain, Some(system)) => format!("{system}\n{user}"),
            (_, None) => user.to_string(),
        }
    }
}

fn generated_text(value: &Value) -> Option<&str> {
    match value {
        Value::Array(items) => items.first().and_then(generated_text),
        Value::Object(map) => map
            .get("generated_text")
            .or_else(|| map.get("summary_text"))
            .and_then(Value::as_str),
        Value::String(text) => Some(text),
        _ => None,
    }
}

impl WireProtocol for HuggingFaceInference {
    fn default_base_url(&self) -> &str {
        DEFAULT_BASE_URL
    }

    fn endpoint(&self, base_url: &str, params: &GenerationParameters, _stream: bool) -> String {
        format!("{}/models/{}", base_url.trim_end_matches('/'), params.model)
    }

    fn headers(&self, api_key: &str) -> HashMap<String, String> {
        HashMap::from([("Authorization".to_string(), format!("Bearer {api_key}"))])
    }

    fn build_body(
        &self,
        request: &GenerationRequest,
        params: &GenerationParameters,
        _stream: bool,
    ) -> Value {
        let prompt = PromptTemplate::for_model(&params.model)
            .render(request.system_prompt(), request.user_prompt());

        let mut parameters = Map::new();
        parameters.insert("max_new_tokens".to_string(), Value::from(params.max_tokens));
        parameters.insert("temperature".to_string(), float(params.temperature));
        parameters.insert("top_p".to_string(), float(params.top_p));
        parameters.insert("return_full_text".to_string(), Value::Bool(false));
        copy_extra(
            params,
            &mut parameters,
            &[
                ("top_k", "top_k"),
                ("repetition_penalty", "repetition_penalty"),
                ("do_sample", "do_sample"),
            ],
        );

        let mut options = Map::new();
        options.insert(
            "wait_for_model".to_string(),
            params
                .extra_value("wait_for_model")
                .cloned()
                .unwrap_or(Value::Bool(true)),
        );

        let mut body = Map::new();
        body.insert("inputs".to_string(), Value::String(prompt));
        body.insert("parameters".to_string(), Value::Object(parameters));
        body.insert("options".to_string(), Value::Object(options));
        Value::Object(body)
    }

    fn parse_response(&self, body: &Value) -> Result<WireOutcome, String> {
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(error.to_string());
        }
        let text = generated_text(body).unwrap_or_default();
        Ok(WireOutcome::complete(text.trim(), None))
    }

    fn supports_streaming(&self) -> bool {
        false
    }
}
