//! Error types for the voice relay.

use crate::llm::LlmError;

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A session with this call id is already registered.
    #[error("duplicate call id: {0}")]
    DuplicateCall(String),

    /// An inbound protocol frame could not be decoded.
    #[error("frame error: {0}")]
    Frame(String),

    /// An outbound frame could not be delivered.
    #[error("send error: {0}")]
    Send(String),

    /// Upstream language model error.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Listener or connection error.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RelayError>;
