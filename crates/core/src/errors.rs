use std::time::Duration;

use thiserror::Error;

use crate::config::Capability;

/// Terminal failure taxonomy for orchestration calls.
///
/// Variants carry internal detail for logs; nothing here is rendered to an end
/// user directly. The web layer maps [`GatewayError::code`] to a transport
/// status and shows [`GatewayError::user_message`], so raw provider text never
/// crosses the boundary.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("rate limit exceeded for `{operation}`, retry after {retry_after_secs}s")]
    RateLimitExceeded { operation: &'static str, retry_after_secs: u64 },
    #[error("capability `{capability}` is not enabled for this tenant")]
    CapabilityDisabled { capability: Capability },
    #[error("no usable model provider: {0}")]
    ProviderUnavailable(String),
    #[error("model provider failure: {0}")]
    UpstreamError(String),
    #[error("model invocation exceeded the {}s deadline", .0.as_secs())]
    Timeout(Duration),
    #[error("document retrieval is not configured for this tenant")]
    RetrievalNotConfigured,
}

impl GatewayError {
    /// Stable machine code for transport mapping by the caller.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::CapabilityDisabled { .. } => "capability_disabled",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::UpstreamError(_) => "upstream_error",
            Self::Timeout(_) => "timeout",
            Self::RetrievalNotConfigured => "retrieval_not_configured",
        }
    }

    /// Short, actionable, sanitized message for end users.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded { .. } => {
                "Requests are coming in too frequently. Please retry shortly."
            }
            Self::CapabilityDisabled { .. } => {
                "This AI feature is not configured. Ask an administrator to enable it in settings."
            }
            Self::ProviderUnavailable(_) => {
                "The AI provider is not configured for this organization."
            }
            Self::UpstreamError(_) => "The AI provider returned an error. Please try again.",
            Self::Timeout(_) => "The AI provider took too long to respond. Please try again.",
            Self::RetrievalNotConfigured => {
                "Document search is not set up yet. Configure embeddings in settings first."
            }
        }
    }

    /// Rejections are produced before any provider cost is incurred.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. } | Self::CapabilityDisabled { .. })
    }
}
