//! Reply generation via chat completions

use super::client::{OpenAiClient, ensure_success};
use super::{ChatTurn, RemoteResult};
use crate::error::RemoteError;

#[derive(serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(serde::Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    /// Ask the chat model for the next reply
    ///
    /// An empty choice list or null content yields an empty reply.
    pub(super) async fn chat_completion(&self, context: &[ChatTurn]) -> RemoteResult<String> {
        tracing::debug!(messages = context.len(), model = %self.chat_model, "requesting reply");

        let request = ChatRequest {
            model: &self.chat_model,
            messages: context,
        };

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .header("Authorization", self.authorization())
            .json(&request)
            .send()
            .await?;

        let response = ensure_success(response, "chat").await?;

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        let reply = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        tracing::info!(reply_len = reply.len(), "reply generated");
        Ok(reply)
    }
}
