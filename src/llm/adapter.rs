//! Normalizes any [`ReplyBackend`] into a fragment stream that always ends.
//!
//! [`StreamAdapter::stream`] yields [`TextFragment`]s and finishes with exactly
//! one fragment whose `is_final` is set. Upstream failures never surface as
//! errors: the final fragment then carries [`APOLOGY_TEXT`] instead.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};

use super::backend::ReplyBackend;
use super::message::ConversationMessage;

/// Spoken when the upstream fails mid-call.
pub const APOLOGY_TEXT: &str = "I'm sorry, I encountered an error. Could you please try again?";

/// Spoken when a generation succeeds without producing any text.
pub const EMPTY_REPLY_TEXT: &str = "I'm sorry, I couldn't generate a response.";

/// One piece of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFragment {
    /// Text of this piece; empty on an ordinary terminal fragment.
    pub text: String,
    /// Set on the last fragment of the reply.
    pub is_final: bool,
}

impl TextFragment {
    fn delta(text: String) -> Self {
        Self {
            text,
            is_final: false,
        }
    }

    fn terminal(text: &str) -> Self {
        Self {
            text: text.to_string(),
            is_final: true,
        }
    }
}

enum Step {
    Delta(String),
    Failed,
    Empty,
    End,
}

/// Wraps one backend for one call.
pub struct StreamAdapter {
    backend: Box<dyn ReplyBackend>,
}

impl std::fmt::Debug for StreamAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAdapter")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl StreamAdapter {
    /// Wrap a backend.
    pub fn new(backend: Box<dyn ReplyBackend>) -> Self {
        Self { backend }
    }

    /// Name of the wrapped backend.
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Start a reply. Nothing is sent upstream until the stream is first polled.
    pub fn stream(&self, messages: &[ConversationMessage], instructions: &str) -> ReplyStream<'_> {
        let backend: &dyn ReplyBackend = self.backend.as_ref();
        let messages = messages.to_vec();
        let instructions = instructions.to_string();

        let steps = async_stream::stream! {
            let mut deltas = match backend.stream_response(&messages, &instructions).await {
                Ok(deltas) => deltas,
                Err(e) => {
                    tracing::warn!(backend = backend.name(), code = e.code(), error = %e, "upstream request failed");
                    yield Step::Failed;
                    return;
                }
            };
            let mut produced = false;
            while let Some(item) = deltas.next().await {
                match item {
                    Ok(text) if text.is_empty() => {}
                    Ok(text) => {
                        produced = true;
                        yield Step::Delta(text);
                    }
                    Err(e) => {
                        tracing::warn!(backend = backend.name(), code = e.code(), error = %e, "upstream stream failed");
                        yield Step::Failed;
                        return;
                    }
                }
            }
            if produced {
                yield Step::End;
            } else {
                tracing::warn!(backend = backend.name(), "upstream returned an empty reply");
                yield Step::Empty;
            }
        };

        ReplyStream {
            steps: Box::pin(steps),
            full_text: String::new(),
            finished: false,
        }
    }
}

/// Fragments of one reply; see [`StreamAdapter::stream`].
///
/// The stream is fused: after the final fragment it only yields `None`.
pub struct ReplyStream<'a> {
    steps: Pin<Box<dyn Stream<Item = Step> + Send + 'a>>,
    full_text: String,
    finished: bool,
}

impl ReplyStream<'_> {
    /// Everything the reply has said so far. After a failure this is the apology.
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    /// Whether the final fragment has been yielded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drain the stream, returning every fragment and the full text.
    pub async fn collect_all(mut self) -> (Vec<TextFragment>, String) {
        let mut fragments = Vec::new();
        while let Some(fragment) = self.next().await {
            fragments.push(fragment);
        }
        (fragments, self.full_text)
    }

    fn finish_with(&mut self, text: &str) -> TextFragment {
        self.finished = true;
        self.full_text = text.to_string();
        TextFragment::terminal(text)
    }
}

impl Stream for ReplyStream<'_> {
    type Item = TextFragment;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        let fragment = match this.steps.as_mut().poll_next(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Some(Step::Delta(text))) => {
                this.full_text.push_str(&text);
                TextFragment::delta(text)
            }
            Poll::Ready(Some(Step::Failed)) => this.finish_with(APOLOGY_TEXT),
            Poll::Ready(Some(Step::Empty)) => this.finish_with(EMPTY_REPLY_TEXT),
            Poll::Ready(Some(Step::End)) | Poll::Ready(None) => {
                this.finished = true;
                TextFragment::terminal("")
            }
        };
        Poll::Ready(Some(fragment))
    }
}
