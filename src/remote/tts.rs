//! Text-to-speech (TTS) processing

use super::RemoteResult;
use super::client::{OpenAiClient, ensure_success};
use crate::voice::{AudioBuffer, AudioFormat};

impl OpenAiClient {
    /// Synthesize text to speech
    ///
    /// # Returns
    ///
    /// Audio bytes (MP3 format)
    pub(super) async fn synthesize_speech(&self, text: &str) -> RemoteResult<AudioBuffer> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f64,
        }

        tracing::debug!(text, "synthesizing speech");

        let request = TtsRequest {
            model: &self.tts_model,
            input: text,
            voice: &self.tts_voice,
            speed: self.tts_speed,
        };

        let response = self
            .client
            .post(self.endpoint("audio/speech"))
            .header("Authorization", self.authorization())
            .header("Accept", AudioFormat::Mp3.mime())
            .json(&request)
            .send()
            .await?;

        let response = ensure_success(response, "speech").await?;

        let audio = response.bytes().await?;
        tracing::debug!(audio_bytes = audio.len(), "speech synthesized");
        Ok(AudioBuffer::new(audio.to_vec(), AudioFormat::Mp3))
    }
}
