//! OpenAI-compatible chat-completions provider: POST `/v1/chat/completions`
//! with `stream: true`, consuming the `choices[0].delta` SSE shape shared by
//! OpenAI itself and its many API-compatible re-implementations.

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

use super::http_common::{error_for_status, line_stream, shared_client, sse_payload};
use crate::error::ProviderError;
use crate::{Chunk, ChunkStream, Provider, ProviderMessage, Role, Usage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAIProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
    last_usage: Arc<Mutex<Option<Usage>>>,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: shared_client(),
            last_usage: Arc::new(Mutex::new(None)),
        }
    }

    /// Point this provider at a different base URL, for OpenAI-compatible
    /// vendors that only differ in endpoint and auth header.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_request(&self, messages: &[ProviderMessage], temperature: Option<f32>) -> Value {
        let turns: Vec<Value> = messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": turns,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if let Some(t) = temperature {
            body["temperature"] = json!(t);
        }
        body
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn stream(
        &self,
        messages: &[ProviderMessage],
        temperature: Option<f32>,
        _thinking: bool,
    ) -> Result<ChunkStream, ProviderError> {
        let body = self.build_request(messages, temperature);
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, text));
        }

        let last_usage = self.last_usage.clone();
        let lines = line_stream(response.bytes_stream());
        let stream = lines.filter_map(move |line| {
            let last_usage = last_usage.clone();
            async move {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => return Some(Err(e)),
                };
                let payload = sse_payload(&line)?;
                let value: Value = match serde_json::from_str(payload) {
                    Ok(v) => v,
                    Err(_) => return None,
                };
                if let Some(usage) = value.get("usage").filter(|u| !u.is_null()) {
                    let prompt = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
                    let completion = usage
                        .get("completion_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    *last_usage.lock() = Some(Usage {
                        prompt_tokens: prompt,
                        completion_tokens: completion,
                        total_tokens: prompt + completion,
                    });
                }
                let delta = value.get("choices")?.get(0)?.get("delta")?;
                let text = delta.get("content")?.as_str()?;
                if text.is_empty() {
                    None
                } else {
                    Some(Ok(Chunk::response(text.to_string())))
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn last_usage(&self) -> Option<Usage> {
        *self.last_usage.lock()
    }

    fn model_family(&self) -> &str {
        "openai"
    }
}
