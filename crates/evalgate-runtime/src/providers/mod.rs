//! LLM provider abstractions for judge backends.
//!
//! A provider turns chat messages into a completion. Judges pick a
//! provider by the vendor of their model, so one process can judge with
//! OpenAI-family and Anthropic models side by side.
//!
//! ## Security
//!
//! Providers load credentials through [`secrets::ApiCredential`], which never
//! prints its value.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use evalgate_core::TokenizableMessage;

mod factory;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};

/// Errors from LLM providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::HttpError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_) => true,
            ProviderError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Configuration for a completion request.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub model: String,
    pub max_tokens: u32,
    /// 0.0 for reproducible verdicts
    pub temperature: f32,
    pub timeout: Duration,
    /// Mark the rubric as cacheable (Anthropic)
    pub prompt_caching: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 500,
            temperature: 0.0,
            timeout: Duration::from_secs(15),
            prompt_caching: true,
        }
    }
}

/// A chat message for LLM completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "system", "user", or "assistant"
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

impl TokenizableMessage for ChatMessage {
    fn token_fields(&self) -> Vec<&str> {
        vec![self.role.as_str(), self.content.as_str()]
    }
}

/// Response from an LLM completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
    pub stop_reason: Option<String>,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Tokens read from the prompt cache (Anthropic)
    pub cache_read_tokens: u64,
    /// Tokens written to the prompt cache (Anthropic)
    pub cache_creation_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Provider abstraction; the only place judge LLM calls are made.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    async fn health_check(&self) -> bool;

    /// Provider type name, also the vendor key in [`ProviderSet`].
    fn name(&self) -> &str;
}

/// Vendor that serves `model`, if recognizable.
pub fn vendor_for_model(model: &str) -> Option<&'static str> {
    let model = model.to_ascii_lowercase();
    if model.starts_with("claude") {
        Some("anthropic")
    } else if ["gpt-", "o1", "o3", "o4", "chatgpt-"]
        .iter()
        .any(|prefix| model.starts_with(prefix))
    {
        Some("openai")
    } else {
        None
    }
}

/// Configured providers keyed by vendor.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: BTreeMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create every provider named in `configs` through `registry`.
    pub fn from_configs(
        registry: &ProviderRegistry,
        configs: &BTreeMap<String, JsonValue>,
    ) -> Result<Self, ProviderError> {
        let mut set = Self::new();
        for (provider_type, config) in configs {
            registry.validate(provider_type, config)?;
            let provider = registry.create(provider_type, config)?;
            tracing::info!(provider = %provider_type, "Judge provider configured");
            set.insert(provider);
        }
        Ok(set)
    }

    /// Add a provider under its own name, replacing any previous one.
    pub fn insert(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Provider able to serve `model`.
    pub fn for_model(&self, model: &str) -> Option<Arc<dyn LlmProvider>> {
        vendor_for_model(model).and_then(|vendor| self.providers.get(vendor).cloned())
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("providers", &self.names())
            .finish()
    }
}
