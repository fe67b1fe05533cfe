//! Time bounds layered onto any remote pipeline

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{ChatTurn, RemotePipeline, RemoteResult};
use crate::error::RemoteError;
use crate::voice::AudioBuffer;

/// Wraps a pipeline so every call fails with [`RemoteError::Timeout`] after `limit`
pub struct WithTimeout<R> {
    inner: R,
    limit: Duration,
}

impl<R> WithTimeout<R> {
    /// Bound every call of `inner` by `limit`
    #[must_use]
    pub const fn new(inner: R, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn bounded<T>(&self, fut: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        tokio::time::timeout(self.limit, fut).await.unwrap_or_else(|_| {
            tracing::warn!(limit = ?self.limit, "remote call timed out");
            Err(RemoteError::Timeout(self.limit))
        })
    }
}

#[async_trait]
impl<R: RemotePipeline> RemotePipeline for WithTimeout<R> {
    async fn transcribe(
        &self,
        audio: &AudioBuffer,
        language: Option<&str>,
        cancel: &CancellationToken,
    ) -> RemoteResult<String> {
        self.bounded(self.inner.transcribe(audio, language, cancel))
            .await
    }

    async fn generate_reply(
        &self,
        context: &[ChatTurn],
        cancel: &CancellationToken,
    ) -> RemoteResult<String> {
        self.bounded(self.inner.generate_reply(context, cancel)).await
    }

    async fn synthesize(&self, text: &str, cancel: &CancellationToken) -> RemoteResult<AudioBuffer> {
        self.bounded(self.inner.synthesize(text, cancel)).await
    }
}
