//! Configuration-driven façade over hosted LLM vendors.
//!
//! A [`Dispatcher`] routes prompts to the currently selected provider, each
//! provider being an adapter that translates a uniform [`GenerationRequest`] into
//! one vendor's HTTP API.

pub mod benchmark;
pub mod config;
pub mod error;
pub mod http;
pub mod manager;
pub mod provider;
pub mod stream;
pub mod types;

pub use benchmark::BenchmarkReport;
pub use config::{ConfigStore, Settings};
pub use error::{AdapterError, AdapterErrorKind, ConfigError, LLMError};
pub use manager::Dispatcher;
pub use provider::{ChunkStream, DynAdapter, ProviderAdapter};
pub use types::*;
