//! Upstream language model access.
//!
//! Two backends sit behind [`ReplyBackend`]:
//! - **Streaming** (default): SSE token stream, tolerant of the
//!   chat-completions, flat-delta and content-block delta envelopes.
//! - **Buffered**: one non-streaming request per reply.
//!
//! Either speaks the `chat_completions` or `messages` request flavor. Callers
//! normally go through [`StreamAdapter`], which turns any backend into a
//! fragment stream that always finishes and never errors.

pub mod adapter;
pub mod backend;
pub mod buffered;
pub mod error;
pub mod events;
pub mod message;
pub mod sse;
pub mod streaming;

pub use adapter::{APOLOGY_TEXT, EMPTY_REPLY_TEXT, ReplyStream, StreamAdapter, TextFragment};
pub use backend::{DeltaStream, HttpEndpoint, ReplyBackend, build_backend};
pub use buffered::BufferedBackend;
pub use error::LlmError;
pub use message::{ConversationMessage, Role};
pub use streaming::StreamingBackend;
