use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use serde_json::Value;
use tokio::time::{Instant, sleep, timeout};
use tracing::debug;

use crate::config::{ProviderConfig, ResolvedProvider};
use crate::error::AdapterError;
use crate::http::{
    DynHttpTransport, HttpRequest, HttpResponse, HttpStreamResponse, collect_body_text,
};
use crate::stream::{StreamDecoder, StreamEvent};
use crate::types::{GenerationParameters, GenerationRequest, GenerationResult, StreamChunk};

use super::retry::{self, RetryPolicy, classify_status, retry_after_from_headers};
use super::{ChunkStream, ProviderAdapter, StreamDelta, WireOutcome, WireProtocol};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_POLLS: u32 = 120;

/// Adapter that drives any [`WireProtocol`] over an [`HttpTransport`](crate::http::HttpTransport).
///
/// Every call merges overrides onto the provider defaults, builds the vendor
/// payload, and sends it through the shared retry helper with a per-attempt
/// timeout.
pub struct HttpAdapter<P> {
    protocol: P,
    config: ProviderConfig,
    api_key: String,
    base_url: String,
    transport: DynHttpTransport,
    policy: RetryPolicy,
    timeout: Duration,
    poll_interval: Duration,
}

impl<P: WireProtocol> HttpAdapter<P> {
    pub fn new(protocol: P, resolved: ResolvedProvider, transport: DynHttpTransport) -> Self {
        let base_url = resolved
            .config
            .base_url
            .clone()
            .unwrap_or_else(|| protocol.default_base_url().to_string());
        Self {
            protocol,
            config: resolved.config,
            api_key: resolved.api_key,
            base_url,
            transport,
            policy: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pause between polls of a pending prediction.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn provider(&self) -> &str {
        &self.config.provider_id
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = self.protocol.headers(&self.api_key);
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers
    }

    fn build_request(
        &self,
        request: &GenerationRequest,
        params: &GenerationParameters,
        stream: bool,
    ) -> Result<HttpRequest, AdapterError> {
        let body = self.protocol.build_body(request, params, stream);
        let payload = serde_json::to_vec(&body).map_err(|err| {
            AdapterError::invalid_request(
                self.provider(),
                format!("failed to serialize request: {err}"),
            )
        })?;
        let url = self.protocol.endpoint(&self.base_url, params, stream);
        let mut headers = self.build_headers();
        if stream {
            headers.insert("Accept".to_string(), "text/event-stream".to_string());
        }
        Ok(HttpRequest::post_json(url, payload).with_headers(headers))
    }

    /// Sends with the per-attempt timeout, also enforced here so transports that
    /// ignore [`HttpRequest::timeout`] are still bounded.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AdapterError> {
        let request = request.with_timeout(self.timeout);
        match timeout(self.timeout, self.transport.send(request)).await {
            Ok(result) => result.map_err(|err| err.into_adapter_error(self.provider())),
            Err(_) => Err(self.attempt_timed_out()),
        }
    }

    fn attempt_timed_out(&self) -> AdapterError {
        AdapterError::timeout(
            self.provider(),
            format!("no response within {}s", self.timeout.as_secs_f32()),
        )
    }

    fn status_error(
        &self,
        status: u16,
        headers: &HashMap<String, String>,
        body: &str,
    ) -> AdapterError {
        let message = self
            .protocol
            .error_message(body)
            .unwrap_or_else(|| fallback_message(status, body));
        classify_status(
            self.provider(),
            status,
            message,
            retry_after_from_headers(headers),
        )
    }

    fn read_outcome(&self, response: &HttpResponse) -> Result<WireOutcome, AdapterError> {
        let text = response.text();
        if !response.is_success() {
            return Err(self.status_error(response.status, &response.headers, &text));
        }
        if text.trim().is_empty() {
            return Ok(WireOutcome::complete("", None));
        }
        let value: Value = serde_json::from_str(&text).map_err(|err| {
            AdapterError::vendor(
                self.provider(),
                format!("failed to parse response body: {err}"),
            )
        })?;
        self.protocol
            .parse_response(&value)
            .map_err(|message| AdapterError::vendor(self.provider(), message))
    }

    async fn attempt(&self, request: HttpRequest) -> Result<WireOutcome, AdapterError> {
        let response = self.send(request).await?;
        let mut outcome = self.read_outcome(&response)?;
        let mut polls = 0;
        while let WireOutcome::Pending { poll_url } = &outcome {
            if polls == MAX_POLLS {
                // Retrying would start a second prediction.
                return Err(AdapterError::timeout(
                    self.provider(),
                    format!("prediction still running after {polls} polls"),
                )
                .with_retriable(false));
            }
            polls += 1;
            sleep(self.poll_interval).await;
            debug!(provider = self.provider(), polls, "polling pending prediction");
            outcome = self.poll_prediction(poll_url).await?;
        }
        Ok(outcome)
    }

    /// One status read of a running prediction, retried on its own so a failed
    /// read never reaches the caller's retry loop. Errors are non-retriable.
    async fn poll_prediction(&self, poll_url: &str) -> Result<WireOutcome, AdapterError> {
        let poll = HttpRequest::get(poll_url).with_headers(self.build_headers());
        retry::execute(&self.policy, self.provider(), None, || {
            let poll = poll.clone();
            async move {
                let response = self.send(poll).await?;
                self.read_outcome(&response)
            }
        })
        .await
    }

    async fn open_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, AdapterError> {
        let response = match timeout(self.timeout, self.transport.send_stream(request)).await {
            Ok(result) => result.map_err(|err| err.into_adapter_error(self.provider()))?,
            Err(_) => return Err(self.attempt_timed_out()),
        };
        if (200..300).contains(&response.status) {
            return Ok(response);
        }
        let body = collect_body_text(response.body)
            .await
            .map_err(|err| err.into_adapter_error(self.provider()))?;
        Err(self.status_error(response.status, &response.headers, &body))
    }

    async fn synthesized_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<ChunkStream, AdapterError> {
        let result = self.generate(request).await?;
        Ok(Box::pin(stream::iter([Ok(StreamChunk::last(result.text))])))
    }
}

fn fallback_message(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("status {status}")
    } else {
        format!("status {status}: {body}")
    }
}

struct ChunkState<P> {
    events: StreamDecoder,
    protocol: P,
    provider: String,
    finished: bool,
}

fn chunk_stream<P: WireProtocol>(
    events: StreamDecoder,
    protocol: P,
    provider: String,
) -> ChunkStream {
    let state = ChunkState {
        events,
        protocol,
        provider,
        finished: false,
    };
    Box::pin(stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        loop {
            let item = match state.events.next().await {
                Some(Ok(StreamEvent::Data(data))) => match state.protocol.parse_stream_event(&data) {
                    Ok(StreamDelta::Text(text)) if !text.is_empty() => {
                        return Some((Ok(StreamChunk::partial(text)), state));
                    }
                    Ok(StreamDelta::Text(_)) | Ok(StreamDelta::Skip) => continue,
                    Ok(StreamDelta::Finished) => Ok(StreamChunk::last("")),
                    Err(message) => Err(AdapterError::vendor(&state.provider, message)),
                },
                Some(Ok(StreamEvent::Done)) | None => Ok(StreamChunk::last("")),
                Some(Err(err)) => Err(err),
            };
            state.finished = true;
            return Some((item, state));
        }
    }))
}

#[async_trait]
impl<P: WireProtocol> ProviderAdapter for HttpAdapter<P> {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult, AdapterError> {
        let started = Instant::now();
        let params = GenerationParameters::merge(&self.config, request.overrides());
        let http = self.build_request(&request, &params, false)?;
        debug!(provider = self.provider(), model = %params.model, "sending generation request");

        let outcome = retry::execute(&self.policy, self.provider(), request.deadline(), || {
            self.attempt(http.clone())
        })
        .await?;

        let (text, usage) = match outcome {
            WireOutcome::Complete { text, usage } => (text, usage),
            WireOutcome::Pending { .. } => {
                return Err(AdapterError::vendor(
                    self.provider(),
                    "prediction did not complete",
                ));
            }
        };
        Ok(GenerationResult {
            text,
            usage,
            latency: started.elapsed(),
            provider_id: self.config.provider_id.clone(),
            model: params.model,
        })
    }

    async fn stream(&self, request: GenerationRequest) -> Result<ChunkStream, AdapterError> {
        if !self.protocol.supports_streaming() {
            return self.synthesized_stream(request).await;
        }
        let params = GenerationParameters::merge(&self.config, request.overrides());
        let http = self.build_request(&request, &params, true)?;
        debug!(provider = self.provider(), model = %params.model, "opening stream");

        let response = retry::execute(&self.policy, self.provider(), request.deadline(), || {
            self.open_stream(http.clone())
        })
        .await?;

        let events = StreamDecoder::new(response.body, self.provider())
            .with_idle_timeout(self.timeout)
            .with_deadline(request.deadline());
        Ok(chunk_stream(
            events,
            self.protocol.clone(),
            self.config.provider_id.clone(),
        ))
    }

    fn provider_id(&self) -> &str {
        &self.config.provider_id
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_streaming(&self) -> bool {
        self.protocol.supports_streaming()
    }
}
