use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::types::{GenerationParameters, GenerationRequest, TokenUsage};

use super::{WireOutcome, WireProtocol, float};

const DEFAULT_BASE_URL: &str = "https://api.replicate.com";
const MAX_WAIT_SECS: u64 = 60;

/// Replicate predictions API.
///
/// Calls ask the server to hold the connection with `Prefer: wait`; predictions
/// still running when it answers are polled by the adapter. Models given as
/// `owner/name:version` go through the versioned `/v1/predictions` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatePredictions {
    wait_secs: u64,
}

impl ReplicatePredictions {
    /// Keeps the server-side wait below the per-attempt `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            wait_secs: timeout.as_secs().saturating_sub(1).clamp(1, MAX_WAIT_SECS),
        }
    }
}

impl Default for ReplicatePredictions {
    fn default() -> Self {
        Self::new(Duration::from_secs(MAX_WAIT_SECS))
    }
}

/// Chat-style prompt understood by the hosted instruction models.
pub(crate) fn format_prompt(system: Option<&str>, user: &str) -> String {
    match system {
        Some(system) => format!("System: {system}\n\nUser: {user}\n\nAssistant:"),
        None => format!("User: {user}\n\nAssistant:"),
    }
}

fn split_version(model: &str) -> Option<&str> {
    model.split_once(':').map(|(_, version)| version)
}

#[derive(Debug, Deserialize)]
struct Prediction {
    status: Option<String>,
    output: Option<Value>,
    error: Option<Value>,
    urls: Option<PredictionUrls>,
    metrics: Option<Metrics>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Metrics {
    input_token_count: Option<u64>,
    output_token_count: Option<u64>,
}

fn output_text(output: Option<Value>) -> String {
    match output {
        Some(Value::String(text)) => text,
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<String>(),
        _ => String::new(),
    }
}

impl WireProtocol for ReplicatePredictions {
    fn default_base_url(&self) -> &str {
        DEFAULT_BASE_URL
    }

    fn endpoint(&self, base_url: &str, params: &GenerationParameters, _stream: bool) -> String {
        let base = base_url.trim_end_matches('/');
        if split_version(&params.model).is_some() {
            format!("{base}/v1/predictions")
        } else {
            format!("{base}/v1/models/{}/predictions", params.model)
        }
    }

    fn headers(&self, api_key: &str) -> HashMap<String, String> {
        HashMap::from([
            ("Authorization".to_string(), format!("Bearer {api_key}")),
            ("Prefer".to_string(), format!("wait={}", self.wait_secs)),
        ])
    }

    fn build_body(
        &self,
        request: &GenerationRequest,
        params: &GenerationParameters,
        _stream: bool,
    ) -> Value {
        let mut input = Map::new();
        input.insert(
            "prompt".to_string(),
            Value::String(format_prompt(request.system_prompt(), request.user_prompt())),
        );
        input.insert("max_tokens".to_string(), Value::from(params.max_tokens));
        input.insert("temperature".to_string(), float(params.temperature));
        input.insert("top_p".to_string(), float(params.top_p));
        for (key, value) in &params.extra {
            input.insert(key.clone(), value.clone());
        }

        let mut body = Map::new();
        if let Some(version) = split_version(&params.model) {
            body.insert("version".to_string(), Value::String(version.to_string()));
        }
        body.insert("input".to_string(), Value::Object(input));
        Value::Object(body)
    }

    fn parse_response(&self, body: &Value) -> Result<WireOutcome, String> {
        let prediction = Prediction::deserialize(body)
            .map_err(|err| format!("failed to parse prediction: {err}"))?;
        match prediction.status.as_deref() {
            Some("succeeded") | None => {
                let usage = prediction.metrics.map(|metrics| {
                    TokenUsage::from_counts(metrics.input_token_count, metrics.output_token_count)
                });
                Ok(WireOutcome::complete(output_text(prediction.output), usage))
            }
            Some("failed") | Some("canceled") | Some("aborted") => Err(prediction
                .error
                .map(|error| match error {
                    Value::String(message) => message,
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "prediction failed".to_string())),
            Some(status) => prediction
                .urls
                .and_then(|urls| urls.get)
                .map(|poll_url| WireOutcome::Pending { poll_url })
                .ok_or_else(|| format!("prediction is {status} but has no polling URL")),
        }
    }

    fn supports_streaming(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::Settings;
    use crate::types::ParameterOverrides;

    fn params(model: Option<&str>) -> GenerationParameters {
        let settings = Settings::default();
        GenerationParameters::merge(
            &settings.models["replicate"],
            &ParameterOverrides {
                model: model.map(str::to_string),
                ..Default::default()
            },
        )
    }

    #[test]
    fn prompt_uses_chat_transcript_format() {
        assert_eq!(
            format_prompt(Some("Be brief."), "Hi"),
            "System: Be brief.\n\nUser: Hi\n\nAssistant:"
        );
        assert_eq!(format_prompt(None, "Hi"), "User: Hi\n\nAssistant:");
    }

    #[test]
    fn official_models_use_model_endpoint() {
        let protocol = ReplicatePredictions::default();
        let params = params(None);
        assert_eq!(
            protocol.endpoint(DEFAULT_BASE_URL, &params, false),
            "https://api.replicate.com/v1/models/meta/meta-llama-3-70b-instruct/predictions"
        );
        let body = protocol.build_body(&GenerationRequest::new("Hi"), &params, false);
        assert!(body.get("version").is_none());
        assert_eq!(body["input"]["max_tokens"], json!(2000));
        assert_eq!(body["input"]["prompt"], json!("User: Hi\n\nAssistant:"));
    }

    #[test]
    fn versioned_models_use_predictions_endpoint() {
        let protocol = ReplicatePredictions::default();
        let params = params(Some("replicate/flan-t5-xl:7a216605"));
        assert_eq!(
            protocol.endpoint(DEFAULT_BASE_URL, &params, false),
            "https://api.replicate.com/v1/predictions"
        );
        let body = protocol.build_body(&GenerationRequest::new("Hi"), &params, false);
        assert_eq!(body["version"], json!("7a216605"));
    }

    #[test]
    fn wait_header_stays_below_timeout() {
        let headers = ReplicatePredictions::new(Duration::from_secs(30)).headers("r8");
        assert_eq!(headers["Prefer"], "wait=29");
        assert_eq!(headers["Authorization"], "Bearer r8");
        let headers = ReplicatePredictions::new(Duration::from_secs(600)).headers("r8");
        assert_eq!(headers["Prefer"], "wait=60");
    }

    #[test]
    fn succeeded_prediction_joins_output_tokens() {
        let body = json!({
            "status": "succeeded",
            "output": ["Hel", "lo", "!"],
            "metrics": {"input_token_count": 10, "output_token_count": 3}
        });
        let outcome = ReplicatePredictions::default().parse_response(&body).expect("outcome");
        assert_eq!(
            outcome,
            WireOutcome::complete("Hello!", Some(TokenUsage::from_counts(Some(10), Some(3))))
        );
    }

    #[test]
    fn running_prediction_is_pending() {
        let body = json!({
            "status": "processing",
            "output": null,
            "urls": {"get": "https://api.replicate.com/v1/predictions/abc", "cancel": "https://api.replicate.com/v1/predictions/abc/cancel"}
        });
        assert_eq!(
            ReplicatePredictions::default().parse_response(&body),
            Ok(WireOutcome::Pending {
                poll_url: "https://api.replicate.com/v1/predictions/abc".to_string()
            })
        );
    }

    #[test]
    fn failed_prediction_reports_error() {
        let body = json!({"status": "failed", "error": "CUDA out of memory"});
        assert_eq!(
            ReplicatePredictions::default().parse_response(&body),
            Err("CUDA out of memory".to_string())
        );
    }
}
