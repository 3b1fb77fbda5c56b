use thiserror::Error;

use super::image::ImagePart;

/// What went wrong upstream, as classified by the provider adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Missing or rejected credentials.
    Authentication,
    /// Bad model name or malformed request; retrying cannot help.
    Configuration,
    /// Account-level quota or credits exhausted at the provider.
    UpstreamQuota,
    RateLimited,
    Network,
    Timeout,
    /// Provider-side failure (5xx and similar).
    Upstream,
    /// Response arrived but had no usable completion.
    InvalidResponse,
}

impl ProviderErrorKind {
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ProviderErrorKind::Authentication
                | ProviderErrorKind::Configuration
                | ProviderErrorKind::UpstreamQuota
        )
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

/// Trait for generative model providers (OpenRouter, test doubles, etc.)
#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    /// Send one prompt, optionally with an image, and return the raw completion text.
    async fn invoke(&self, prompt: &str, image: Option<&ImagePart>) -> Result<String, ProviderError>;
}
