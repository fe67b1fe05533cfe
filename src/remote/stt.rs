//! Speech-to-text (STT) processing

use super::RemoteResult;
use super::client::{OpenAiClient, ensure_success};
use crate::error::RemoteError;
use crate::voice::AudioBuffer;

/// Response from the transcription API
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl OpenAiClient {
    /// Transcribe audio to text
    pub(super) async fn transcribe_audio(
        &self,
        audio: &AudioBuffer,
        language: Option<&str>,
    ) -> RemoteResult<String> {
        tracing::debug!(audio_bytes = audio.len(), language, "starting transcription");

        let file = reqwest::multipart::Part::bytes(audio.data.clone())
            .file_name(audio.format.file_name())
            .mime_str(audio.format.mime())
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.stt_model.clone());

        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }

        let response = self
            .client
            .post(self.endpoint("audio/transcriptions"))
            .header("Authorization", self.authorization())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                RemoteError::from(e)
            })?;

        let response = ensure_success(response, "transcription").await?;

        let result: TranscriptionResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse transcription response");
            RemoteError::Decode(e.to_string())
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}
