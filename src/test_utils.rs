//! Shared test utilities used by unit and integration tests.
//!
//! [`ScriptedBackend`] stands in for an upstream model: each generation
//! pops the next scripted [`Reply`] and records the conversation it was
//! asked about.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::llm::{ConversationMessage, DeltaStream, LlmError, ReplyBackend};

/// Conversations seen by a [`ScriptedBackend`], one entry per generation.
pub type RequestLog = Arc<Mutex<Vec<Vec<ConversationMessage>>>>;

/// One scripted generation.
#[derive(Debug)]
pub enum Reply {
    /// Yield these deltas, then end normally.
    Deltas(Vec<String>),
    /// Fail the request before any delta.
    Fail,
    /// Yield these deltas, then fail mid-stream.
    FailAfter(Vec<String>),
    /// Yield whatever the test pushes into the paired sender; end when it is dropped.
    Gated(mpsc::UnboundedReceiver<Result<String, LlmError>>),
}

/// Scripted [`ReplyBackend`].
#[derive(Debug)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Reply>>,
    requests: RequestLog,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBackend {
    /// A backend with an empty script. Unscripted generations answer "Okay.".
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a successful reply made of `deltas`.
    pub fn reply(self, deltas: &[&str]) -> Self {
        self.push(Reply::Deltas(deltas.iter().map(|d| (*d).to_string()).collect()))
    }

    /// Queue a request failure.
    pub fn fail(self) -> Self {
        self.push(Reply::Fail)
    }

    /// Queue a reply that breaks off after `deltas`.
    pub fn fail_after(self, deltas: &[&str]) -> Self {
        self.push(Reply::FailAfter(
            deltas.iter().map(|d| (*d).to_string()).collect(),
        ))
    }

    /// Queue a reply driven by the returned sender.
    pub fn gated(self) -> (Self, mpsc::UnboundedSender<Result<String, LlmError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.push(Reply::Gated(rx)), tx)
    }

    /// Handle on the conversations this backend is asked about.
    pub fn requests(&self) -> RequestLog {
        Arc::clone(&self.requests)
    }

    fn push(self, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
        self
    }

    fn next_reply(&self) -> Reply {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Reply::Deltas(vec!["Okay.".to_string()]))
    }
}

#[async_trait]
impl ReplyBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_response(
        &self,
        messages: &[ConversationMessage],
        _instructions: &str,
    ) -> Result<DeltaStream, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());

        match self.next_reply() {
            Reply::Deltas(deltas) => Ok(Box::pin(futures_util::stream::iter(
                deltas.into_iter().map(Ok).collect::<Vec<_>>(),
            ))),
            Reply::Fail => Err(LlmError::ProviderError("HTTP 500: scripted failure".into())),
            Reply::FailAfter(deltas) => {
                let items: Vec<Result<String, LlmError>> = deltas
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(LlmError::StreamError(
                        "scripted disconnect".into(),
                    ))))
                    .collect();
                Ok(Box::pin(futures_util::stream::iter(items)))
            }
            Reply::Gated(rx) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
        }
    }

    async fn generate_response(
        &self,
        messages: &[ConversationMessage],
        instructions: &str,
    ) -> Result<String, LlmError> {
        use futures_util::StreamExt;

        let mut deltas = self.stream_response(messages, instructions).await?;
        let mut text = String::new();
        while let Some(delta) = deltas.next().await {
            text.push_str(&delta?);
        }
        Ok(text)
    }
}
