//! The silent provider: yields exactly one empty chunk. Used for meditation
//! mode, where one side of a conversation is deliberately mute.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::{Chunk, ChunkStream, Provider, ProviderMessage};

pub struct SilentProvider;

#[async_trait]
impl Provider for SilentProvider {
    async fn stream(
        &self,
        _messages: &[ProviderMessage],
        _temperature: Option<f32>,
        _thinking: bool,
    ) -> Result<ChunkStream, ProviderError> {
        let stream = tokio_stream::once(Ok(Chunk::response(String::new())));
        Ok(Box::pin(stream))
    }

    fn model_family(&self) -> &str {
        "silent"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn yields_exactly_one_empty_chunk() {
        let provider = SilentProvider;
        let mut stream = provider.stream(&[], None, false).await.unwrap();
        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(chunk.content, "");
        assert!(stream.next().await.is_none());
    }
}
