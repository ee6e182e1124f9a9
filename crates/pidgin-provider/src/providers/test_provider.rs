//! Deterministic in-process provider used for offline tests.
//!
//! Configured entirely from the model string after the `local:` vendor
//! prefix is stripped by the caller, mirroring the configurable-behavior
//! mocks elsewhere in this lineage (`mockall`-based mocks return whatever
//! the test wires up; this one is wired up by string instead of by mock
//! expectation, since experiment configs are plain TOML, not Rust).
//!
//! - `test` (default): always replies with a fixed short string, so
//!   repeated turns converge immediately.
//! - `test:echo`: echoes the most recent user/assistant message back,
//!   verbatim, so a two-agent conversation under this model visibly grows.
//! - `test:fail-auth`: every call raises `AuthFailed`.
//! - `test:fail-once`: the first call raises a retryable `Transient` error,
//!   every call after that succeeds with the fixed reply.
//! - `test:named`: replies with a quoted chosen name followed by fixed
//!   text, for exercising name-choosing extraction.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::ProviderError;
use crate::{Chunk, ChunkStream, Provider, ProviderMessage, Usage};

const FIXED_REPLY: &str = "Test response.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Fixed,
    Echo,
    FailAuth,
    FailOnce,
    Named,
}

pub struct TestProvider {
    behavior: Behavior,
    call_count: Arc<AtomicUsize>,
}

impl TestProvider {
    pub fn new(model: &str) -> Self {
        let behavior = match model {
            "echo" => Behavior::Echo,
            "fail-auth" => Behavior::FailAuth,
            "fail-once" => Behavior::FailOnce,
            "named" => Behavior::Named,
            _ => Behavior::Fixed,
        };
        Self {
            behavior,
            call_count: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Provider for TestProvider {
    async fn stream(
        &self,
        messages: &[ProviderMessage],
        _temperature: Option<f32>,
        _thinking: bool,
    ) -> Result<ChunkStream, ProviderError> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            Behavior::FailAuth => {
                return Err(ProviderError::AuthFailed(
                    "test provider configured to always fail".into(),
                ))
            }
            Behavior::FailOnce if call == 0 => {
                return Err(ProviderError::Transient(
                    "test provider configured to fail its first call".into(),
                ))
            }
            _ => {}
        }

        let text = match self.behavior {
            Behavior::Echo => messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default(),
            Behavior::Named => format!("\"Nova\" {FIXED_REPLY}"),
            _ => FIXED_REPLY.to_string(),
        };

        let stream = tokio_stream::once(Ok(Chunk::response(text)));
        Ok(Box::pin(stream))
    }

    fn last_usage(&self) -> Option<Usage> {
        Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 4,
            total_tokens: 14,
        })
    }

    fn model_family(&self) -> &str {
        "test"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn fixed_behavior_is_deterministic() {
        let provider = TestProvider::new("test");
        let messages = [ProviderMessage::new(crate::Role::User, "hello")];
        let mut s1 = provider.stream(&messages, None, false).await.unwrap();
        let mut s2 = provider.stream(&messages, None, false).await.unwrap();
        let c1 = s1.next().await.unwrap().unwrap();
        let c2 = s2.next().await.unwrap().unwrap();
        assert_eq!(c1.content, c2.content);
    }

    #[tokio::test]
    async fn fail_once_then_succeeds() {
        let provider = TestProvider::new("fail-once");
        let messages = [ProviderMessage::new(crate::Role::User, "hi")];
        assert!(provider.stream(&messages, None, false).await.is_err());
        assert!(provider.stream(&messages, None, false).await.is_ok());
    }

    #[tokio::test]
    async fn fail_auth_always_fails() {
        let provider = TestProvider::new("fail-auth");
        let messages = [ProviderMessage::new(crate::Role::User, "hi")];
        let err = match provider.stream(&messages, None, false).await {
            Err(e) => e,
            Ok(_) => panic!("expected fail-auth to error"),
        };
        assert!(matches!(err, ProviderError::AuthFailed(_)));
    }
}
