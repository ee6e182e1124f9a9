//! Anthropic Claude provider: POST `/v1/messages` with `stream: true`,
//! consuming Anthropic's `content_block_delta` SSE event shape.

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

use super::http_common::{error_for_status, line_stream, sse_payload, shared_client};
use crate::error::ProviderError;
use crate::{Chunk, ChunkStream, Provider, ProviderMessage, Role, Usage};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
    last_usage: Arc<Mutex<Option<Usage>>>,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: shared_client(),
            last_usage: Arc::new(Mutex::new(None)),
        }
    }

    fn build_request(
        &self,
        messages: &[ProviderMessage],
        temperature: Option<f32>,
        thinking: bool,
    ) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let turns: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                        Role::System => unreachable!(),
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": DEFAULT_MAX_TOKENS,
            "messages": turns,
            "stream": true,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if let Some(t) = temperature {
            body["temperature"] = json!(t);
        }
        if thinking {
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": 4096 });
        }
        body
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn stream(
        &self,
        messages: &[ProviderMessage],
        temperature: Option<f32>,
        thinking: bool,
    ) -> Result<ChunkStream, ProviderError> {
        let body = self.build_request(messages, temperature, thinking);
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
                match value.get("type").and_then(Value::as_str) {
                    Some("content_block_delta") => {
                        let delta = value.get("delta")?;
                        match delta.get("type").and_then(Value::as_str) {
                            Some("text_delta") => {
                                let text = delta.get("text")?.as_str()?.to_string();
                                Some(Ok(Chunk::response(text)))
                            }
                            Some("thinking_delta") => {
                                let text = delta.get("thinking")?.as_str()?.to_string();
                                Some(Ok(Chunk::thinking(text)))
                            }
                            _ => None,
                        }
                    }
                    Some("message_start") => {
                        if let Some(u) = value
                            .get("message")
                            .and_then(|m| m.get("usage"))
                            .and_then(|u| u.get("input_tokens"))
                            .and_then(Value::as_u64)
                        {
                            let mut guard = last_usage.lock();
                            let entry = guard.get_or_insert_with(Usage::default);
                            entry.prompt_tokens = u;
                        }
                        None
                    }
                    Some("message_delta") => {
                        if let Some(out) = value
                            .get("usage")
                            .and_then(|u| u.get("output_tokens"))
                            .and_then(Value::as_u64)
                        {
                            let mut guard = last_usage.lock();
                            let entry = guard.get_or_insert_with(Usage::default);
                            entry.completion_tokens = out;
                            entry.total_tokens = entry.prompt_tokens + out;
                        }
                        None
                    }
                    _ => None,
                }
            }
        });

        Ok(Box::pin(stream))
    }

    fn last_usage(&self) -> Option<Usage> {
        *self.last_usage.lock()
    }

    fn model_family(&self) -> &str {
        "anthropic"
    }
}
