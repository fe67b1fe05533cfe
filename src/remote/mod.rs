//! Remote speech pipeline
//!
//! Speech-to-text, reply generation and text-to-speech as three stateless
//! calls behind the [`RemotePipeline`] trait. Every call takes a
//! [`CancellationToken`] so the turn controller can abandon it without
//! waiting for the network round-trip.

mod chat;
mod client;
mod stt;
mod timeout;
mod tts;

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::RemoteError;
use crate::transcript::{Role, Utterance};
use crate::voice::AudioBuffer;

pub use client::OpenAiClient;
pub use timeout::WithTimeout;

/// Result of a single remote call
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Role of a chat message sent for reply generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions for the model
    System,
    /// Speaker input
    User,
    /// Earlier model output
    Assistant,
}

impl From<Role> for ChatRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => Self::User,
            Role::Assistant => Self::Assistant,
        }
    }
}

/// One message of conversation context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Author of the message
    pub role: ChatRole,
    /// Message text
    pub content: String,
}

impl ChatTurn {
    /// Create a system message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

impl From<&Utterance> for ChatTurn {
    fn from(utterance: &Utterance) -> Self {
        Self {
            role: utterance.role.into(),
            content: utterance.text.clone(),
        }
    }
}

/// The three remote operations a pipeline run performs
#[async_trait]
pub trait RemotePipeline: Send + Sync {
    /// Transcribe recorded speech to text
    async fn transcribe(
        &self,
        audio: &AudioBuffer,
        language: Option<&str>,
        cancel: &CancellationToken,
    ) -> RemoteResult<String>;

    /// Generate a reply to the conversation so far
    async fn generate_reply(
        &self,
        context: &[ChatTurn],
        cancel: &CancellationToken,
    ) -> RemoteResult<String>;

    /// Synthesize speech for `text`
    async fn synthesize(&self, text: &str, cancel: &CancellationToken) -> RemoteResult<AudioBuffer>;
}

/// Run `fut` unless `cancel` fires first
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> RemoteResult<T>
where
    F: Future<Output = RemoteResult<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RemoteError::Cancelled),
        result = fut => result,
    }
}
