//! OpenRouter provider: a thin re-skin of the OpenAI-compatible wire format
//! against OpenRouter's own endpoint and header requirements.

use async_trait::async_trait;

use super::openai::OpenAIProvider;
use crate::error::ProviderError;
use crate::{ChunkStream, Provider, ProviderMessage, Usage};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// OpenRouter speaks the same `chat/completions` SSE shape as OpenAI, so we
/// delegate the wire handling to [`OpenAIProvider`] against a different base
/// URL rather than duplicating the parser.
pub struct OpenRouterProvider {
    inner: OpenAIProvider,
}

impl OpenRouterProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let inner = OpenAIProvider::new(api_key, model).with_base_url(DEFAULT_BASE_URL);
        Self { inner }
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
    async fn stream(
        &self,
        messages: &[ProviderMessage],
        temperature: Option<f32>,
        thinking: bool,
    ) -> Result<ChunkStream, ProviderError> {
        self.inner.stream(messages, temperature, thinking).await
    }

    fn last_usage(&self) -> Option<Usage> {
        self.inner.last_usage()
    }

    async fn cleanup(&self) {
        self.inner.cleanup().await
    }

    fn model_family(&self) -> &str {
        "openrouter"
    }
}
