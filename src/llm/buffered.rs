//! Whole-message backend: one non-streaming request per reply.

use async_trait::async_trait;
use serde_json::Value;

use super::backend::{DeltaStream, HttpEndpoint, ReplyBackend};
use super::error::LlmError;
use super::message::ConversationMessage;

/// Requests `stream: false` and hands the whole reply over as one delta.
#[derive(Debug, Clone)]
pub struct BufferedBackend {
    endpoint: HttpEndpoint,
}

impl BufferedBackend {
    /// Wrap a configured endpoint.
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl ReplyBackend for BufferedBackend {
    fn name(&self) -> &str {
        "buffered"
    }

    async fn stream_response(
        &self,
        messages: &[ConversationMessage],
        instructions: &str,
    ) -> Result<DeltaStream, LlmError> {
        let text = self.generate_response(messages, instructions).await?;
        Ok(Box::pin(futures_util::stream::once(async move { Ok(text) })))
    }

    async fn generate_response(
        &self,
        messages: &[ConversationMessage],
        instructions: &str,
    ) -> Result<String, LlmError> {
        let response = self.endpoint.send(messages, instructions, false).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| LlmError::ProviderError(format!("unreadable response body: {e}")))?;
        extract_reply_text(&body)
            .ok_or_else(|| LlmError::ProviderError("response carried no reply text".into()))
    }
}

/// Pull the reply text out of a non-streaming response.
///
/// Accepts `choices[0].message.content` or the first `text` block of a
/// `content` array. An empty `content` array is an empty reply.
pub fn extract_reply_text(body: &Value) -> Option<String> {
    if let Some(text) = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
    {
        return Some(text.to_string());
    }

    let blocks = body.get("content")?.as_array()?;
    let text = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str).is_none_or(|t| t == "text"))
        .find_map(|b| b.get("text").and_then(Value::as_str))
        .unwrap_or_default();
    Some(text.to_string())
}
