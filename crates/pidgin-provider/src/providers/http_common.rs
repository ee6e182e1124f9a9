//! Shared plumbing for the HTTP-streaming provider implementations.
//!
//! Each vendor has its own request/response shape, but all of them ride on
//! an SSE-or-ndjson byte stream over a shared `reqwest::Client`; this module
//! is where that shape stops being vendor-specific.

use futures_util::{Stream, StreamExt};
use std::pin::Pin;

use crate::error::ProviderError;

/// One global client per process, matching the source lineage's
/// `Lazy<Client>` pattern (a fresh client per call would burn a TCP/TLS
/// handshake on every provider request).
pub fn shared_client() -> reqwest::Client {
    reqwest::Client::new()
}

/// Map an HTTP status code onto the provider error taxonomy for a
/// non-2xx response, folding in the response body as context.
pub fn error_for_status(status: reqwest::StatusCode, body: String) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::AuthFailed(body),
        404 => ProviderError::ModelNotFound(body),
        408 => ProviderError::Timeout(body),
        402 => ProviderError::QuotaExhausted(body),
        429 => ProviderError::RateLimited(body),
        400 | 422 => ProviderError::BadRequest(body),
        503 => ProviderError::Overloaded(body),
        500..=599 => ProviderError::Transient(body),
        _ => ProviderError::Unknown(format!("HTTP {status}: {body}")),
    }
}

/// Split a byte stream on newlines, yielding complete lines with trailing
/// `\r`/`\n` stripped. Used for both SSE (`data: {...}`) and ndjson
/// (one JSON object per line) wire formats.
pub fn line_stream(
    bytes: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>> {
    let mut buf = String::new();
    let mapped = bytes.map(|chunk| chunk.map_err(ProviderError::from));
    Box::pin(async_stream::stream! {
        futures_util::pin_mut!(mapped);
        while let Some(chunk) = mapped.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(e);
                    continue;
                }
            };
            buf.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(idx) = buf.find('\n') {
                let line: String = buf.drain(..=idx).collect();
                let line = line.trim_end_matches(['\r', '\n']).to_string();
                if !line.is_empty() {
                    yield Ok(line);
                }
            }
        }
        if !buf.trim().is_empty() {
            yield Ok(buf.trim().to_string());
        }
    })
}

/// Strip the SSE `data: ` prefix, if present, and report `[DONE]` sentinels
/// as `None` so callers can filter them out.
pub fn sse_payload(line: &str) -> Option<&str> {
    let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    if payload == "[DONE]" {
        None
    } else {
        Some(payload)
    }
}
