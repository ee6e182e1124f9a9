//! Google Gemini provider: POST
//! `/v1beta/models/{model}:streamGenerateContent?alt=sse` consuming
//! Gemini's `candidates[0].content.parts` SSE shape.

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

use super::http_common::{error_for_status, line_stream, shared_client, sse_payload};
use crate::error::ProviderError;
use crate::{Chunk, ChunkStream, Provider, ProviderMessage, Role, Usage};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GoogleProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
    last_usage: Arc<Mutex<Option<Usage>>>,
}

impl GoogleProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: shared_client(),
            last_usage: Arc::new(Mutex::new(None)),
        }
    }

    fn build_request(&self, messages: &[ProviderMessage]) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let contents: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::User => "user",
                        Role::Assistant => "model",
                        Role::System => unreachable!(),
                    },
                    "parts": [{ "text": m.content }],
                })
            })
            .collect();

        let mut body = json!({ "contents": contents });
        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system.join("\n\n") }] });
        }
        body
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    async fn stream(
        &self,
        messages: &[ProviderMessage],
        _temperature: Option<f32>,
        _thinking: bool,
    ) -> Result<ChunkStream, ProviderError> {
        let body = self.build_request(messages);
        let url = format!(
            "{}/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.model, self.api_key
        );
        let response = self.client.post(&url).json(&body).send().await?;

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
                if let Some(meta) = value.get("usageMetadata") {
                    let prompt = meta
                        .get("promptTokenCount")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    let completion = meta
                        .get("candidatesTokenCount")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    *last_usage.lock() = Some(Usage {
                        prompt_tokens: prompt,
                        completion_tokens: completion,
                        total_tokens: prompt + completion,
                    });
                }
                let text = value
                    .get("candidates")?
                    .get(0)?
                    .get("content")?
                    .get("parts")?
                    .get(0)?
                    .get("text")?
                    .as_str()?;
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
        "google"
    }
}
