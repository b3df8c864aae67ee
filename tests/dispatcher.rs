use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};

use llm_switchboard::benchmark::BenchmarkOutcome;
use llm_switchboard::config::{ConfigStore, Settings, StaticCredentials};
use llm_switchboard::http::{
    HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport, TransportError,
};
use llm_switchboard::{
    AdapterError, ChunkStream, ConfigError, Dispatcher, GenerationRequest, GenerationResult,
    ProviderAdapter, StreamChunk,
};

struct OfflineTransport;

#[async_trait]
impl HttpTransport for OfflineTransport {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
        Err(TransportError::Connect {
            message: "offline".into(),
        })
    }

    async fn send_stream(
        &self,
        _request: HttpRequest,
    ) -> Result<HttpStreamResponse, TransportError> {
        Err(TransportError::Connect {
            message: "offline".into(),
        })
    }
}

/// Answers with a fixed reply and records the prompts it saw.
struct CannedAdapter {
    provider: &'static str,
    model: &'static str,
    reply: &'static str,
    calls: AtomicUsize,
    prompts: Mutex<Vec<(Option<String>, String)>>,
}

impl CannedAdapter {
    fn new(provider: &'static str, model: &'static str, reply: &'static str) -> Arc<Self> {
        Arc::new(Self {
            provider,
            model,
            reply,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for CannedAdapter {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push((
            request.system_prompt().map(str::to_string),
            request.user_prompt().to_string(),
        ));
        Ok(GenerationResult {
            text: self.reply.to_string(),
            usage: None,
            latency: Default::default(),
            provider_id: self.provider.to_string(),
            model: self.model.to_string(),
        })
    }

    async fn stream(&self, _request: GenerationRequest) -> Result<ChunkStream, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut chunks: Vec<Result<StreamChunk, AdapterError>> = self
            .reply
            .split_inclusive(' ')
            .map(|word| Ok(StreamChunk::partial(word)))
            .collect();
        chunks.push(Ok(StreamChunk::last("")));
        Ok(Box::pin(stream::iter(chunks)))
    }

    fn provider_id(&self) -> &str {
        self.provider
    }

    fn model(&self) -> &str {
        self.model
    }
}

/// Always rejects the credential.
struct RejectingAdapter;

#[async_trait]
impl ProviderAdapter for RejectingAdapter {
    async fn generate(&self, _request: GenerationRequest) -> Result<GenerationResult, AdapterError> {
        Err(AdapterError::auth("anthropic", "invalid x-api-key"))
    }

    async fn stream(&self, _request: GenerationRequest) -> Result<ChunkStream, AdapterError> {
        Err(AdapterError::auth("anthropic", "invalid x-api-key"))
    }

    fn provider_id(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        "claude-3-5-haiku-latest"
    }
}

fn dispatcher(settings: Settings) -> Dispatcher {
    let store = ConfigStore::new(settings, Arc::new(StaticCredentials::new())).expect("store");
    Dispatcher::new(Arc::new(store), Arc::new(OfflineTransport))
}

#[tokio::test]
async fn switching_routes_calls_to_the_new_provider() {
    let openai = CannedAdapter::new("openai", "gpt-4o-mini", "from openai");
    let groq = CannedAdapter::new("groq", "llama-3.1-8b-instant", "from groq");
    let mut dispatcher = dispatcher(Settings::default())
        .with_adapter("openai", openai.clone())
        .with_adapter("groq", groq.clone());

    let first = dispatcher
        .generate_response("Hello", None, None)
        .await
        .expect("openai answer");
    assert_eq!(first, "from openai");

    dispatcher.switch_provider("groq").expect("switch");
    assert_eq!(dispatcher.current_provider(), "groq");
    let second = dispatcher
        .generate_response("Hello", None, None)
        .await
        .expect("groq answer");
    assert_eq!(second, "from groq");

    assert_eq!(openai.calls(), 1);
    assert_eq!(groq.calls(), 1);
}

#[tokio::test]
async fn unknown_provider_keeps_current_selection() {
    let mut dispatcher = dispatcher(Settings::default());
    let err = dispatcher
        .switch_provider("palm")
        .expect_err("unknown provider");
    assert!(matches!(err, ConfigError::UnknownProvider { ref provider } if provider == "palm"));
    assert_eq!(dispatcher.current_provider(), "openai");
    assert!(!dispatcher.store().contains("palm"));
    assert!(dispatcher.store().contains("groq"));
}

#[tokio::test]
async fn explicit_system_prompt_wins_over_default() {
    let openai = CannedAdapter::new("openai", "gpt-4o-mini", "ok");
    let dispatcher = dispatcher(Settings::default()).with_adapter("openai", openai.clone());

    dispatcher
        .generate("First", None, None)
        .await
        .expect("default system prompt");
    dispatcher
        .generate("Second", Some("Answer in French."), None)
        .await
        .expect("explicit system prompt");

    let prompts = openai.prompts.lock().unwrap().clone();
    assert_eq!(
        prompts[0].0.as_deref(),
        Some(Settings::default().system_prompt.as_str())
    );
    assert_eq!(prompts[1].0.as_deref(), Some("Answer in French."));
    assert_eq!(prompts[1].1, "Second");
}

#[tokio::test]
async fn streamed_text_matches_generated_text() {
    let openai = CannedAdapter::new("openai", "gpt-4o-mini", "machine learning finds patterns");
    let dispatcher = dispatcher(Settings::default()).with_adapter("openai", openai);

    let generated = dispatcher
        .generate_response("Explain ML", None, None)
        .await
        .expect("generated");
    let chunks: Vec<StreamChunk> = dispatcher
        .stream_response("Explain ML", None, None)
        .await
        .expect("stream")
        .map(|chunk| chunk.expect("chunk"))
        .collect()
        .await;

    let streamed: String = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
    assert_eq!(streamed, generated);
    assert!(chunks.len() > 1);
    assert_eq!(chunks.iter().filter(|chunk| chunk.is_final).count(), 1);
}

#[tokio::test]
async fn stream_errors_surface_from_adapter() {
    let mut dispatcher =
        dispatcher(Settings::default()).with_adapter("anthropic", Arc::new(RejectingAdapter));
    dispatcher.switch_provider("anthropic").expect("switch");

    let err = match dispatcher.stream_response("Hello", None, None).await {
        Ok(_) => panic!("stream should fail"),
        Err(err) => err,
    };
    assert_eq!(err.kind_label(), "auth_error");
    assert_eq!(err.provider(), Some("anthropic"));
}

#[tokio::test]
async fn benchmark_records_every_pair_in_order() {
    let settings = Settings {
        benchmark_concurrency: 2,
        ..Settings::default()
    };
    let openai = CannedAdapter::new("openai", "gpt-4o-mini", "four words of text");
    let dispatcher = dispatcher(settings)
        .with_adapter("openai", openai.clone())
        .with_adapter("anthropic", Arc::new(RejectingAdapter));

    let providers = vec!["openai".to_string(), "anthropic".to_string()];
    let prompts = vec!["first prompt".to_string(), "second prompt".to_string()];
    let report = dispatcher.benchmark(&providers, &prompts).await;

    assert_eq!(report.len(), 4);
    let order: Vec<(&str, &str)> = report
        .entries
        .iter()
        .map(|entry| (entry.provider_id.as_str(), entry.prompt.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("openai", "first prompt"),
            ("openai", "second prompt"),
            ("anthropic", "first prompt"),
            ("anthropic", "second prompt"),
        ]
    );

    assert!(report.entries[0].is_success());
    assert_eq!(report.entries[0].text(), Some("four words of text"));
    match &report.entries[2].outcome {
        BenchmarkOutcome::Failure {
            error_kind,
            message,
        } => {
            assert_eq!(error_kind, "auth_error");
            assert_eq!(message, "invalid x-api-key");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(report.entries[2].model, "claude-3-5-haiku-latest");
    assert_eq!(openai.calls(), 2);

    let openai_summary = report
        .summaries
        .iter()
        .find(|summary| summary.provider_id == "openai")
        .expect("openai summary");
    assert_eq!(openai_summary.successes, 2);
    assert_eq!(openai_summary.average_characters, Some(18.0));

    let anthropic_summary = report
        .summaries
        .iter()
        .find(|summary| summary.provider_id == "anthropic")
        .expect("anthropic summary");
    assert_eq!(anthropic_summary.successes, 0);
    assert_eq!(anthropic_summary.attempts, 2);
    assert_eq!(anthropic_summary.average_latency_ms, None);
}

#[tokio::test]
async fn benchmark_report_serializes_status_tags() {
    let dispatcher = dispatcher(Settings::default());
    let report = dispatcher
        .benchmark(&["mistral".to_string()], &["Hello".to_string()])
        .await;

    let json: serde_json::Value =
        serde_json::from_str(&report.to_json_pretty().expect("json")).expect("parse");
    let entry = &json["entries"][0];
    assert_eq!(entry["provider_id"], "mistral");
    assert_eq!(entry["model"], "mistral-large-latest");
    assert_eq!(entry["outcome"]["status"], "failure");
    assert_eq!(entry["outcome"]["error_kind"], "config_error");
}

#[tokio::test]
async fn benchmark_files_results_under_requested_id() {
    let gateway = CannedAdapter::new("openai", "gpt-4o-mini", "routed through a gateway");
    let dispatcher = dispatcher(Settings::default()).with_adapter("groq", gateway);

    let report = dispatcher
        .benchmark(&["groq".to_string()], &["Hello".to_string()])
        .await;

    assert_eq!(report.entries[0].provider_id, "groq");
    assert!(report.entries[0].is_success());
    assert_eq!(report.summaries.len(), 1);
    assert_eq!(report.summaries[0].provider_id, "groq");
    assert_eq!(report.summaries[0].successes, 1);
}
