//! Provider resolution and the normalized model-invocation surface.
//!
//! Each backend family gets one thin adapter implementing [`ModelHandle`];
//! after [`ModelResolver::resolve`] nothing downstream branches on provider
//! identity. Adding a provider is one enum variant, one row in
//! [`DEFAULT_MODELS`], and one adapter module.

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use thiserror::Error;

use nimbus_core::config::{AiProvider, TenantAiConfig};
use nimbus_core::errors::GatewayError;

pub use anthropic::AnthropicHandle;
pub use gemini::GeminiHandle;
pub use ollama::OllamaHandle;
pub use openai::OpenAiHandle;

/// Internal adapter failures. The detail strings stay in logs; the taxonomy
/// mapping to user-safe messages happens in [`ResolvedModel::invoke`].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("provider returned status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

/// Normalized invocation surface: prompt in, text out. Deadlines are enforced
/// by the caller through [`ResolvedModel::invoke`] so every adapter stays a
/// plain request/response translation.
#[async_trait]
pub trait ModelHandle: Send + Sync {
    async fn invoke(
        &self,
        model: &str,
        prompt: &str,
        max_output_tokens: u32,
    ) -> Result<String, ProviderError>;
}

/// A resolved, callable model for one tenant configuration.
pub struct ResolvedModel {
    provider: AiProvider,
    model: String,
    handle: Box<dyn ModelHandle>,
}

impl ResolvedModel {
    pub fn new(provider: AiProvider, model: impl Into<String>, handle: Box<dyn ModelHandle>) -> Self {
        Self { provider, model: model.into(), handle }
    }

    pub fn provider(&self) -> AiProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Single bounded invocation. Deadline expiry cancels the in-flight
    /// request (the future is dropped) and reports `Timeout`; partial output
    /// is never treated as success. No retries happen at this layer.
    pub async fn invoke(
        &self,
        prompt: &str,
        max_output_tokens: u32,
        deadline: Duration,
    ) -> Result<String, GatewayError> {
        match tokio::time::timeout(
            deadline,
            self.handle.invoke(&self.model, prompt, max_output_tokens),
        )
        .await
        {
            Err(_) => Err(GatewayError::Timeout(deadline)),
            Ok(Err(error)) => Err(GatewayError::UpstreamError(error.to_string())),
            Ok(Ok(text)) => Ok(text),
        }
    }
}

/// Documented per-provider defaults, applied when a tenant has not pinned a
/// model. Data-driven on purpose: call sites never hard-code model strings.
const DEFAULT_MODELS: &[(AiProvider, &str)] = &[
    (AiProvider::OpenAi, "gpt-4o-mini"),
    (AiProvider::Anthropic, "claude-3-5-haiku-latest"),
    (AiProvider::Gemini, "gemini-1.5-flash"),
    (AiProvider::Ollama, "llama3.1"),
];

pub fn default_model(provider: AiProvider) -> Option<&'static str> {
    DEFAULT_MODELS
        .iter()
        .find(|(candidate, _)| *candidate == provider)
        .map(|(_, model)| *model)
}

/// Seam for tests: the orchestrator depends on this trait, not on the concrete
/// HTTP-backed resolver.
pub trait ModelResolver: Send + Sync {
    fn resolve(&self, config: &TenantAiConfig) -> Result<ResolvedModel, GatewayError>;
}

pub struct ProviderResolver {
    client: reqwest::Client,
}

impl ProviderResolver {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for ProviderResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelResolver for ProviderResolver {
    fn resolve(&self, config: &TenantAiConfig) -> Result<ResolvedModel, GatewayError> {
        let model = config
            .model
            .clone()
            .or_else(|| default_model(config.provider).map(str::to_string))
            .ok_or_else(|| {
                GatewayError::ProviderUnavailable(format!(
                    "no default model registered for provider `{}`",
                    config.provider
                ))
            })?;

        let handle: Box<dyn ModelHandle> = match config.provider {
            AiProvider::OpenAi => Box::new(OpenAiHandle::new(
                self.client.clone(),
                required_credential(config)?,
                config.base_url.clone(),
            )),
            AiProvider::Anthropic => Box::new(AnthropicHandle::new(
                self.client.clone(),
                required_credential(config)?,
                config.base_url.clone(),
            )),
            AiProvider::Gemini => Box::new(GeminiHandle::new(
                self.client.clone(),
                required_credential(config)?,
                config.base_url.clone(),
            )),
            AiProvider::Ollama => {
                Box::new(OllamaHandle::new(self.client.clone(), config.base_url.clone()))
            }
        };

        Ok(ResolvedModel::new(config.provider, model, handle))
    }
}

fn required_credential(config: &TenantAiConfig) -> Result<String, GatewayError> {
    config
        .credential
        .as_ref()
        .map(|credential| credential.expose_secret().trim().to_string())
        .filter(|credential| !credential.is_empty())
        .ok_or_else(|| {
            GatewayError::ProviderUnavailable(format!(
                "no credential configured for provider `{}`",
                config.provider
            ))
        })
}

/// Bounded excerpt of an upstream error body, safe to keep in logs.
pub(crate) fn truncate_detail(body: &str) -> String {
    const DETAIL_LIMIT: usize = 200;
    if body.chars().count() <= DETAIL_LIMIT {
        body.to_string()
    } else {
        body.chars().take(DETAIL_LIMIT).collect()
    }
}
