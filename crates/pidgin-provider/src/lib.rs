//! Streaming provider abstraction.
//!
//! A single `Provider` capability (stream, usage, cleanup) stands in place
//! of dynamic dispatch over vendor identity: the core never branches on
//! which vendor it is talking to.

pub mod error;
pub mod providers;
pub mod retry;

use async_trait::async_trait;
use futures::stream::BoxStream;
pub use error::ProviderError;

/// Role of a message from the *recipient's* viewpoint, as replayed to a
/// provider. The conductor rewrites roles per speaker before calling
/// `stream`; providers never see the underlying `agent_a`/`agent_b` split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in the provider-facing view of a conversation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// What kind of content a streamed chunk carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Response,
    Thinking,
    /// A pacing notice emitted by the retry wrapper, not provider content.
    RetryNotice,
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub content: String,
    pub kind: ChunkKind,
}

impl Chunk {
    pub fn response(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: ChunkKind::Response,
        }
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: ChunkKind::Thinking,
        }
    }
}

/// Token accounting reported at the end of a stream, when the wire protocol
/// supplies it.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

pub type ChunkStream = BoxStream<'static, Result<Chunk, ProviderError>>;

/// Capability every provider variant (HTTP-streaming vendors, the local
/// test provider, the silent provider) satisfies identically.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stream tokens for one provider call. The returned stream is finite
    /// and not restartable — a caller that wants to retry must call
    /// `stream` again, discarding whatever content the previous attempt
    /// produced.
    async fn stream(
        &self,
        messages: &[ProviderMessage],
        temperature: Option<f32>,
        thinking: bool,
    ) -> Result<ChunkStream, ProviderError>;

    /// Usage from the most recently completed stream, if the wire protocol
    /// reported it.
    fn last_usage(&self) -> Option<Usage> {
        None
    }

    /// Release any held connections. Default no-op; HTTP providers hold
    /// nothing beyond a shared `reqwest::Client` so they rarely need to
    /// override this.
    async fn cleanup(&self) {}

    /// Model family identifier used by the context manager's per-family
    /// token-estimation multiplier. Not otherwise user-visible.
    fn model_family(&self) -> &str {
        "default"
    }
}
