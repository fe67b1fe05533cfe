//! OpenAI-compatible HTTP client

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;

use super::{ChatTurn, RemotePipeline, RemoteResult, cancellable};
use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::voice::AudioBuffer;
use crate::{Error, Result};

/// Error body returned by OpenAI-style APIs
#[derive(serde::Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(serde::Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Talks to an OpenAI-compatible API for STT, chat and TTS
pub struct OpenAiClient {
    pub(super) client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    pub(super) chat_model: String,
    pub(super) stt_model: String,
    pub(super) tts_model: String,
    pub(super) tts_voice: String,
    pub(super) tts_speed: f64,
}

impl OpenAiClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".to_string()))?;

        if config.base_url.trim().is_empty() {
            return Err(Error::Config("remote base URL is empty".to_string()));
        }

        tracing::debug!(
            base_url = %config.base_url,
            chat_model = %config.chat_model,
            stt_model = %config.stt_model,
            tts_model = %config.tts_model,
            "remote client initialized"
        );

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chat_model: config.chat_model.clone(),
            stt_model: config.stt_model.clone(),
            tts_model: config.tts_model.clone(),
            tts_voice: config.tts_voice.clone(),
            tts_speed: config.tts_speed,
        })
    }

    /// Full URL for an API path
    pub(super) fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// Bearer authorization header value
    pub(super) fn authorization(&self) -> String {
        format!("Bearer {}", self.api_key.expose_secret())
    }
}

/// Pass through 2xx responses, turn everything else into a service error
pub(super) async fn ensure_success(
    response: reqwest::Response,
    api: &str,
) -> RemoteResult<reqwest::Response> {
    let status = response.status();
    tracing::debug!(status = %status, api, "received response");

    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(status = %status, body = %body, api, "API error");

    Err(RemoteError::Service {
        status: status.as_u16(),
        message: service_message(&body),
    })
}

/// Prefer the structured `error.message`, fall back to the raw body
fn service_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[async_trait]
impl RemotePipeline for OpenAiClient {
    async fn transcribe(
        &self,
        audio: &AudioBuffer,
        language: Option<&str>,
        cancel: &CancellationToken,
    ) -> RemoteResult<String> {
        cancellable(cancel, self.transcribe_audio(audio, language)).await
    }

    async fn generate_reply(
        &self,
        context: &[ChatTurn],
        cancel: &CancellationToken,
    ) -> RemoteResult<String> {
        cancellable(cancel, self.chat_completion(context)).await
    }

    async fn synthesize(&self, text: &str, cancel: &CancellationToken) -> RemoteResult<AudioBuffer> {
        cancellable(cancel, self.synthesize_speech(text)).await
    }
}
