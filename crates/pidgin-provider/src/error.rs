//! Typed provider error taxonomy.
//!
//! Replaces exception-driven provider error handling: every failure a
//! provider can produce is one of these variants, and the retry wrapper in
//! [`crate::retry`] is a pure function of the variant rather than a catch-all
//! around provider-specific exceptions.

use thiserror::Error;

/// Errors a [`crate::Provider`] call can surface.
///
/// The first four variants are retryable by [`crate::retry::with_retry`];
/// the rest are fatal for that call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("provider overloaded: {0}")]
    Overloaded(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("context window exceeded: {0}")]
    ContextLimitExceeded(String),

    #[error("unknown provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Whether the retry wrapper should attempt this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::Overloaded(_)
                | ProviderError::Timeout(_)
                | ProviderError::Transient(_)
        )
    }

    /// Short, redacted message suitable for the manifest's per-conversation
    /// `error` field (full detail belongs in the JSONL `APIError` event).
    pub fn redacted(&self) -> String {
        self.to_string()
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            ProviderError::Transient(err.to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                401 | 403 => ProviderError::AuthFailed(err.to_string()),
                404 => ProviderError::ModelNotFound(err.to_string()),
                429 => ProviderError::RateLimited(err.to_string()),
                402 => ProviderError::QuotaExhausted(err.to_string()),
                400 | 422 => ProviderError::BadRequest(err.to_string()),
                500..=599 => ProviderError::Transient(err.to_string()),
                _ => ProviderError::Unknown(err.to_string()),
            }
        } else {
            ProviderError::Unknown(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Unknown(format!("response decode failed: {err}"))
    }
}
