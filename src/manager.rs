use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use futures_util::{StreamExt, stream};
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::benchmark::{BenchmarkEntry, BenchmarkReport};
use crate::config::{ConfigStore, ProviderConfig, Settings};
use crate::error::{ConfigError, LLMError};
use crate::http::DynHttpTransport;
use crate::provider::{ChunkStream, DynAdapter, build_adapter};
use crate::types::{GenerationRequest, GenerationResult, ParameterOverrides, StreamChunk};

/// Entry point that routes prompts to the currently selected provider.
///
/// Adapters are built lazily on first use and cached for the dispatcher's lifetime.
/// Switching providers is a plain assignment that requires `&mut self`.
pub struct Dispatcher {
    store: Arc<ConfigStore>,
    transport: DynHttpTransport,
    current: String,
    adapters: HashMap<String, OnceCell<DynAdapter>>,
}

impl Dispatcher {
    /// Creates a dispatcher selecting the settings' `current_provider`.
    pub fn new(store: Arc<ConfigStore>, transport: DynHttpTransport) -> Self {
        let adapters = store
            .provider_ids()
            .map(|id| (id.to_string(), OnceCell::new()))
            .collect();
        Self {
            current: store.settings().current_provider.clone(),
            store,
            transport,
            adapters,
        }
    }

    /// Registers a ready-made adapter under `provider_id`, replacing lazy
    /// construction for that id.
    pub fn with_adapter(mut self, provider_id: impl Into<String>, adapter: DynAdapter) -> Self {
        self.adapters
            .insert(provider_id.into(), OnceCell::new_with(Some(adapter)));
        self
    }

    pub fn settings(&self) -> &Settings {
        self.store.settings()
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn current_provider(&self) -> &str {
        &self.current
    }

    /// Configuration of the current provider.
    pub fn current_config(&self) -> Result<&ProviderConfig, ConfigError> {
        self.store.lookup(&self.current)
    }

    /// Every selectable provider id, sorted.
    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Makes `provider_id` the target of subsequent calls.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownProvider`] when the id is not configured; the current
    /// selection is left unchanged.
    pub fn switch_provider(&mut self, provider_id: &str) -> Result<(), ConfigError> {
        if !self.adapters.contains_key(provider_id) {
            return Err(ConfigError::UnknownProvider {
                provider: provider_id.to_string(),
            });
        }
        info!(from = %self.current, to = provider_id, "switching provider");
        self.current = provider_id.to_string();
        Ok(())
    }

    /// Returns the adapter for `provider_id`, building it on first use.
    pub async fn adapter_for(&self, provider_id: &str) -> Result<DynAdapter, LLMError> {
        let cell = self
            .adapters
            .get(provider_id)
            .ok_or_else(|| ConfigError::UnknownProvider {
                provider: provider_id.to_string(),
            })?;
        let adapter = cell
            .get_or_try_init(|| async {
                let resolved = self.store.resolve(provider_id)?;
                debug!(provider = provider_id, model = %resolved.config.model, "building adapter");
                Ok::<_, ConfigError>(build_adapter(
                    resolved,
                    self.store.settings(),
                    self.transport.clone(),
                ))
            })
            .await?;
        Ok(adapter.clone())
    }

    fn request(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        overrides: Option<ParameterOverrides>,
    ) -> GenerationRequest {
        let system_prompt = system_prompt.unwrap_or(&self.settings().system_prompt);
        GenerationRequest::new(prompt)
            .with_system_prompt(system_prompt)
            .with_overrides(overrides.unwrap_or_default())
    }

    /// Sends a prepared request to the current provider.
    pub async fn generate_request(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationResult, LLMError> {
        let adapter = self.adapter_for(&self.current).await?;
        debug!(provider = %self.current, "dispatching generation");
        Ok(adapter.generate(request).await?)
    }

    /// Sends `prompt` to the current provider. Without `system_prompt` the
    /// configured default is used.
    pub async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        overrides: Option<ParameterOverrides>,
    ) -> Result<GenerationResult, LLMError> {
        self.generate_request(self.request(prompt, system_prompt, overrides))
            .await
    }

    /// Like [`Dispatcher::generate`] but returns only the text.
    pub async fn generate_response(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        overrides: Option<ParameterOverrides>,
    ) -> Result<String, LLMError> {
        self.generate(prompt, system_prompt, overrides)
            .await
            .map(|result| result.text)
    }

    /// Streams the answer of the current provider.
    ///
    /// When streaming is disabled in the settings, the complete answer arrives as
    /// a single final chunk.
    pub async fn stream_response(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        overrides: Option<ParameterOverrides>,
    ) -> Result<ChunkStream, LLMError> {
        self.stream_request(self.request(prompt, system_prompt, overrides))
            .await
    }

    /// Streaming counterpart of [`Dispatcher::generate_request`].
    pub async fn stream_request(&self, request: GenerationRequest) -> Result<ChunkStream, LLMError> {
        let adapter = self.adapter_for(&self.current).await?;
        if !self.settings().enable_streaming {
            debug!(provider = %self.current, "streaming disabled, generating instead");
            let result = adapter.generate(request).await?;
            return Ok(Box::pin(stream::iter([Ok(StreamChunk::last(result.text))])));
        }
        debug!(provider = %self.current, "dispatching stream");
        Ok(adapter.stream(request).await?)
    }

    /// Sends every prompt to every provider and collects the outcomes.
    ///
    /// Entries follow provider-major input order. Failures are recorded in the
    /// report, never returned. Up to `benchmark_concurrency` calls run at once.
    pub async fn benchmark(&self, provider_ids: &[String], prompts: &[String]) -> BenchmarkReport {
        let started_at = SystemTime::now();
        let concurrency = self.settings().benchmark_concurrency.max(1);
        info!(
            providers = provider_ids.len(),
            prompts = prompts.len(),
            concurrency,
            "starting benchmark"
        );

        let pairs = provider_ids
            .iter()
            .flat_map(|provider| prompts.iter().map(move |prompt| (provider, prompt)));
        let entries: Vec<BenchmarkEntry> = stream::iter(pairs)
            .map(|(provider, prompt)| self.benchmark_one(provider, prompt))
            .buffered(concurrency)
            .collect()
            .await;

        BenchmarkReport::new(started_at, entries)
    }

    async fn benchmark_one(&self, provider_id: &str, prompt: &str) -> BenchmarkEntry {
        let started = Instant::now();
        let outcome = match self.adapter_for(provider_id).await {
            Ok(adapter) => adapter
                .generate(self.request(prompt, None, None))
                .await
                .map_err(LLMError::from),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(result) => BenchmarkEntry::success(provider_id, prompt, result),
            Err(err) => {
                debug!(provider = provider_id, error = %err, "benchmark call failed");
                let model = self
                    .store
                    .lookup(provider_id)
                    .map(|config| config.model.clone())
                    .unwrap_or_default();
                BenchmarkEntry::failure(provider_id, &model, prompt, &err, started.elapsed())
            }
        }
    }
}
