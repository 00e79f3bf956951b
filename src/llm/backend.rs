//! The reply backend seam and the HTTP plumbing shared by concrete backends.
//!
//! A [`ReplyBackend`] turns a conversation plus instruction text into either
//! a stream of text deltas or one whole reply. Two implementations exist:
//! [`StreamingBackend`](super::streaming::StreamingBackend) reads SSE and
//! [`BufferedBackend`](super::buffered::BufferedBackend) makes one
//! non-streaming request. Both speak either request flavor through
//! [`HttpEndpoint`].

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::{Value, json};

use super::buffered::BufferedBackend;
use super::error::LlmError;
use super::message::ConversationMessage;
use super::streaming::StreamingBackend;
use crate::config::{ApiFlavor, BackendKind, LlmConfig};

/// A stream of text deltas from an upstream generation.
///
/// The stream ends after the last delta; an `Err` item is the last item.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Produces replies from an upstream model.
#[async_trait]
pub trait ReplyBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Start a generation and return its deltas.
    ///
    /// Request-level failures (connection refused, non-success status) are
    /// returned here rather than as stream items.
    async fn stream_response(
        &self,
        messages: &[ConversationMessage],
        instructions: &str,
    ) -> Result<DeltaStream, LlmError>;

    /// Produce one whole reply.
    async fn generate_response(
        &self,
        messages: &[ConversationMessage],
        instructions: &str,
    ) -> Result<String, LlmError>;
}

/// Build the backend described by `config`.
///
/// # Errors
///
/// Returns [`LlmError::ConfigError`] for a missing base URL or an HTTP
/// client that cannot be constructed.
pub fn build_backend(config: &LlmConfig) -> Result<Box<dyn ReplyBackend>, LlmError> {
    let endpoint = HttpEndpoint::from_config(config)?;
    Ok(match config.backend {
        BackendKind::Streaming => Box::new(StreamingBackend::new(endpoint)),
        BackendKind::Buffered => Box::new(BufferedBackend::new(endpoint)),
    })
}

/// One configured upstream: client, URL, credentials and request shape.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    client: reqwest::Client,
    flavor: ApiFlavor,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    anthropic_version: String,
}

impl HttpEndpoint {
    /// Build an endpoint with its own client and request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigError`] when the base URL is blank or the
    /// client cannot be built.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(LlmError::ConfigError("base_url is required".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::ConfigError(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            flavor: config.api_flavor,
            base_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            anthropic_version: config.anthropic_version.clone(),
        })
    }

    /// Request dialect of this endpoint.
    pub fn flavor(&self) -> ApiFlavor {
        self.flavor
    }

    /// Model requested from the upstream.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Full request URL for the configured flavor.
    pub fn url(&self) -> String {
        match self.flavor {
            ApiFlavor::ChatCompletions => format!("{}/v1/chat/completions", self.base_url),
            ApiFlavor::Messages => format!("{}/v1/messages", self.base_url),
        }
    }

    /// Send a generation request and check its status.
    ///
    /// # Errors
    ///
    /// [`LlmError::RequestError`] when the request never got a response,
    /// otherwise the mapping of [`LlmError::from_status`].
    pub async fn send(
        &self,
        messages: &[ConversationMessage],
        instructions: &str,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let body = build_request_body(
            self.flavor,
            &self.model,
            self.max_tokens,
            messages,
            instructions,
            stream,
        );

        let mut request = self
            .client
            .post(self.url())
            .header("content-type", "application/json");
        request = match self.flavor {
            ApiFlavor::ChatCompletions if !self.api_key.is_empty() => {
                request.bearer_auth(&self.api_key)
            }
            ApiFlavor::ChatCompletions => request,
            ApiFlavor::Messages => request
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", &self.anthropic_version),
        };
        if stream {
            request = request.header("accept", "text/event-stream");
        }

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestError(format!("request to {} failed: {e}", self.url())))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, &text));
        }
        Ok(response)
    }
}

/// Build the JSON request body for a flavor.
///
/// The chat-completions flavor puts the instructions first as a `system`
/// message; the messages flavor carries them in the top-level `system`
/// field. Blank instructions are omitted in both.
pub fn build_request_body(
    flavor: ApiFlavor,
    model: &str,
    max_tokens: u32,
    messages: &[ConversationMessage],
    instructions: &str,
    stream: bool,
) -> Value {
    let turns = messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }));
    let instructions = instructions.trim();

    match flavor {
        ApiFlavor::ChatCompletions => {
            let mut wire = Vec::with_capacity(messages.len() + 1);
            if !instructions.is_empty() {
                wire.push(json!({ "role": "system", "content": instructions }));
            }
            wire.extend(turns);
            json!({
                "model": model,
                "messages": wire,
                "max_tokens": max_tokens,
                "stream": stream,
            })
        }
        ApiFlavor::Messages => {
            let mut body = json!({
                "model": model,
                "messages": turns.collect::<Vec<_>>(),
                "max_tokens": max_tokens,
                "stream": stream,
            });
            if !instructions.is_empty() {
                body["system"] = Value::String(instructions.to_string());
            }
            body
        }
    }
}
