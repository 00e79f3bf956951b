//! Error types for upstream LLM backends.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! included in the Display output and accessible via [`LlmError::code()`].

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// Invalid or missing backend configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// Authentication failed (invalid/missing API key).
    pub const AUTH_FAILED: &str = "AUTH_FAILED";

    /// Request to the LLM backend failed before a response arrived.
    pub const REQUEST_FAILED: &str = "REQUEST_FAILED";

    /// Streaming response broke off or reported an error mid-stream.
    pub const STREAM_FAILED: &str = "STREAM_FAILED";

    /// Backend answered with a non-success status or an unusable body.
    pub const PROVIDER_ERROR: &str = "PROVIDER_ERROR";
}

/// Errors produced while talking to an LLM backend.
///
/// The Display impl formats as `[CODE] message`.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Invalid or missing configuration.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    ConfigError(String),

    /// Authentication failed (invalid/missing API key).
    #[error("[{}] {}", error_codes::AUTH_FAILED, .0)]
    AuthError(String),

    /// Request to the backend failed.
    #[error("[{}] {}", error_codes::REQUEST_FAILED, .0)]
    RequestError(String),

    /// Streaming response encountered an error.
    #[error("[{}] {}", error_codes::STREAM_FAILED, .0)]
    StreamError(String),

    /// Backend-specific error not covered by other variants.
    #[error("[{}] {}", error_codes::PROVIDER_ERROR, .0)]
    ProviderError(String),
}

impl LlmError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => error_codes::CONFIG_INVALID,
            Self::AuthError(_) => error_codes::AUTH_FAILED,
            Self::RequestError(_) => error_codes::REQUEST_FAILED,
            Self::StreamError(_) => error_codes::STREAM_FAILED,
            Self::ProviderError(_) => error_codes::PROVIDER_ERROR,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::ConfigError(m)
            | Self::AuthError(m)
            | Self::RequestError(m)
            | Self::StreamError(m)
            | Self::ProviderError(m) => m,
        }
    }

    /// Map a non-success HTTP status and its body to an error.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = extract_error_message(body);
        match status.as_u16() {
            401 | 403 => Self::AuthError(format!("authentication failed: {message}")),
            429 => Self::RequestError(format!("rate limited: {message}")),
            code => Self::ProviderError(format!("HTTP {code}: {message}")),
        }
    }
}

/// Pull a human-readable message out of an error response body.
///
/// Understands `{"error": {"message": ...}}` and `{"error": "..."}`; falls
/// back to the raw body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            let error = v.get("error")?;
            error
                .get("message")
                .and_then(|m| m.as_str())
                .or_else(|| error.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
