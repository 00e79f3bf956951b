//! Server-sent-event backend.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::backend::{DeltaStream, HttpEndpoint, ReplyBackend};
use super::error::LlmError;
use super::events::{StreamEvent, classify_event};
use super::message::ConversationMessage;
use super::sse::{SseDecoder, SseEvent};

/// Requests `stream: true` and yields text deltas as the upstream emits them.
#[derive(Debug, Clone)]
pub struct StreamingBackend {
    endpoint: HttpEndpoint,
}

impl StreamingBackend {
    /// Wrap a configured endpoint.
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl ReplyBackend for StreamingBackend {
    fn name(&self) -> &str {
        "streaming"
    }

    async fn stream_response(
        &self,
        messages: &[ConversationMessage],
        instructions: &str,
    ) -> Result<DeltaStream, LlmError> {
        let response = self.endpoint.send(messages, instructions, true).await?;
        tracing::debug!(model = self.endpoint.model(), "upstream stream opened");
        Ok(Box::pin(delta_stream(response.bytes_stream())))
    }

    async fn generate_response(
        &self,
        messages: &[ConversationMessage],
        instructions: &str,
    ) -> Result<String, LlmError> {
        let mut deltas = self.stream_response(messages, instructions).await?;
        let mut text = String::new();
        while let Some(delta) = deltas.next().await {
            text.push_str(&delta?);
        }
        Ok(text)
    }
}

struct StreamState {
    byte_stream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    decoder: SseDecoder,
    ready: VecDeque<Result<String, LlmError>>,
    finished: bool,
}

impl StreamState {
    /// Queue the outcome of one SSE event. Returns `true` when the event ends the stream.
    fn absorb(&mut self, event: &SseEvent) -> bool {
        match classify_event(event.event_type.as_deref(), &event.data) {
            StreamEvent::Text(text) => {
                self.ready.push_back(Ok(text));
                false
            }
            StreamEvent::Done => true,
            StreamEvent::Error(message) => {
                self.ready.push_back(Err(LlmError::StreamError(message)));
                true
            }
            StreamEvent::Skip => false,
        }
    }
}

/// Turn an SSE body into text deltas.
///
/// Ends at the first terminal marker, error event, or the end of the body.
/// A transport error mid-body becomes a final [`LlmError::StreamError`].
pub fn delta_stream(
    byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = Result<String, LlmError>> + Send {
    futures_util::stream::unfold(
        StreamState {
            byte_stream: Box::pin(byte_stream),
            decoder: SseDecoder::new(),
            ready: VecDeque::new(),
            finished: false,
        },
        |mut state| async move {
            loop {
                if let Some(item) = state.ready.pop_front() {
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        for event in state.decoder.push(&chunk) {
                            if state.absorb(&event) {
                                state.finished = true;
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        state
                            .ready
                            .push_back(Err(LlmError::StreamError(format!("stream read failed: {e}"))));
                    }
                    None => {
                        state.finished = true;
                        if let Some(event) = state.decoder.finish() {
                            state.absorb(&event);
                        }
                    }
                }
            }
        },
    )
}
