pub mod assistant;
pub mod gemini;
pub mod openai;

use crate::config::{ProviderConfig, ProviderKind};
use crate::store::Role;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub use assistant::Assistant;

/// One prior turn handed to the text service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTurn {
    pub role: Role,
    pub text: String,
}

/// A single completion request: system instructions, prior turns and the
/// final user prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextRequest {
    pub system: String,
    pub turns: Vec<PromptTurn>,
    pub prompt: String,
}

#[derive(Debug)]
pub enum ProviderError {
    Api { status: u16, message: String },
    Network(reqwest::Error),
    InvalidResponse(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Api { status, .. } => is_retryable_status(*status),
            ProviderError::Network(_) => true,
            ProviderError::InvalidResponse(_) => false,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Api { status, message } => write!(f, "API error {}: {}", status, message),
            ProviderError::Network(e) => write!(f, "network error: {}", e),
            ProviderError::InvalidResponse(message) => write!(f, "invalid response: {}", message),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Network(e)
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Black-box text completion. One call is one attempt; retries belong to
/// [`Assistant`].
#[async_trait]
pub trait TextService: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, request: &TextRequest) -> Result<String, ProviderError>;
}

/// Builds the configured service once at startup. `Ok(None)` means the
/// service runs without a provider.
pub fn build_service(config: &ProviderConfig) -> anyhow::Result<Option<Arc<dyn TextService>>> {
    let key = config.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty());
    match (config.resolved_kind(), key) {
        (ProviderKind::None, _) => Ok(None),
        (kind, None) => {
            log::warn!("Provider {:?} selected but no API key is configured. Running without it.", kind);
            Ok(None)
        }
        (ProviderKind::Gemini, Some(key)) => Ok(Some(Arc::new(gemini::GeminiClient::new(config, key)?))),
        (ProviderKind::OpenAi, Some(key)) => Ok(Some(Arc::new(openai::OpenAiClient::new(config, key)?))),
    }
}

/// Reads an error response into a [`ProviderError`].
pub(crate) async fn api_error(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    ProviderError::Api { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(ProviderError::Api { status: 429, message: String::new() }.is_retryable());
        assert!(!ProviderError::Api { status: 400, message: String::new() }.is_retryable());
        assert!(!ProviderError::InvalidResponse("empty".into()).is_retryable());
    }

    #[test]
    fn test_build_service_without_key_is_none() {
        let config = ProviderConfig {
            kind: Some(ProviderKind::Gemini),
            ..Default::default()
        };
        assert!(build_service(&config).unwrap().is_none());
        assert!(build_service(&ProviderConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_build_service_with_key() {
        let config = ProviderConfig {
            kind: Some(ProviderKind::OpenAi),
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        let service = build_service(&config).unwrap().unwrap();
        assert_eq!(service.name(), "openai");
    }
}
