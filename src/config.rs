//! Configuration types for the relay.
//!
//! A [`RelayConfig`] is read from an optional TOML file and then overlaid
//! with environment variables (a `.env` file in the working directory is
//! honoured). Every section has working defaults except the upstream base
//! URL, which [`RelayConfig::validate`] insists on.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{RelayError, Result};

/// Instructions sent with every generation unless overridden.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful voice assistant on a phone call. \
Keep your responses brief and conversational, usually one to three sentences.

Guidelines for spoken replies:
- Speak naturally, as a person would on the phone
- Never use markdown, URLs, code blocks or special formatting
- Do not use bullet points or numbered lists
- Avoid technical jargon unless the caller uses it first
- When listing options, say them in a sentence, like \"you could try A, B, or C\"
- Ask a clarifying question when the request is unclear
- Be warm and personable while staying professional";

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listening socket for the call transport.
    pub server: ServerConfig,
    /// Upstream LLM backend.
    pub llm: LlmConfig,
    /// Per-call session behaviour.
    pub session: SessionConfig,
    /// Credential issued by the telephony provider. Carried for the
    /// transport collaborator; the session engine does not read it.
    pub call_api_key: Option<String>,
}

/// Listening socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
        }
    }
}

/// How replies are fetched from the upstream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Server-sent-event token stream.
    #[default]
    Streaming,
    /// One non-streaming request per reply.
    Buffered,
}

/// Request/response dialect spoken by the upstream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFlavor {
    /// `POST /v1/chat/completions`, bearer auth, instructions as a system message.
    #[default]
    ChatCompletions,
    /// `POST /v1/messages`, `x-api-key` auth, instructions in the `system` field.
    Messages,
}

/// Upstream LLM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Streaming or buffered replies.
    pub backend: BackendKind,
    /// Request dialect.
    pub api_flavor: ApiFlavor,
    /// Base URL of the upstream, without the `/v1/...` path.
    pub base_url: String,
    /// API key; may be empty for local gateways.
    pub api_key: String,
    /// Model name to request.
    pub model: String,
    /// Maximum tokens per reply. Voice replies are short.
    pub max_tokens: u32,
    /// Whole-request timeout enforced by the HTTP client, in seconds.
    pub request_timeout_secs: u64,
    /// `anthropic-version` header for the messages flavor.
    pub anthropic_version: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Streaming,
            api_flavor: ApiFlavor::ChatCompletions,
            base_url: String::new(),
            api_key: String::new(),
            model: "default".to_owned(),
            max_tokens: 300,
            request_timeout_secs: 30,
            anthropic_version: "2023-06-01".to_owned(),
        }
    }
}

/// Per-call session behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Instruction text sent with every generation.
    pub instructions: String,
    /// Buffered characters that trigger a chunk flush.
    pub chunk_threshold: usize,
    /// Length bound applied when normalizing each chunk.
    pub max_chunk_length: usize,
    /// Text spoken when a call is ended by the relay.
    pub farewell: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_INSTRUCTIONS.to_owned(),
            chunk_threshold: 20,
            max_chunk_length: 500,
            farewell: "Goodbye!".to_owned(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| RelayError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| RelayError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Build the effective configuration: optional file, then `.env`, then
    /// process environment, then validation.
    ///
    /// # Errors
    ///
    /// Returns an error for unreadable files, malformed values, or a config
    /// that fails [`validate`](Self::validate).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            tracing::warn!(error = %e, "ignoring unreadable .env file");
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from an environment lookup.
    ///
    /// The lookup is injected so tests do not touch the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a variable holds an unparseable value.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| RelayError::Config(format!("PORT is not a valid port: {port}")))?;
        }
        if let Some(url) = get("LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(key) = get("LLM_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(model) = get("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(backend) = get("LLM_BACKEND") {
            self.llm.backend = match backend.trim().to_ascii_lowercase().as_str() {
                "streaming" => BackendKind::Streaming,
                "buffered" => BackendKind::Buffered,
                other => {
                    return Err(RelayError::Config(format!(
                        "LLM_BACKEND must be streaming or buffered, got {other}"
                    )));
                }
            };
        }
        if let Some(flavor) = get("LLM_API_FLAVOR") {
            self.llm.api_flavor = match flavor.trim().to_ascii_lowercase().as_str() {
                "chat_completions" => ApiFlavor::ChatCompletions,
                "messages" => ApiFlavor::Messages,
                other => {
                    return Err(RelayError::Config(format!(
                        "LLM_API_FLAVOR must be chat_completions or messages, got {other}"
                    )));
                }
            };
        }
        if let Some(prompt) = get("SYSTEM_PROMPT") {
            self.session.instructions = prompt;
        }
        if let Some(key) = get("CALL_API_KEY") {
            self.call_api_key = Some(key);
        }
        Ok(())
    }

    /// Check the values the relay cannot run without.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.llm.base_url.trim().is_empty() {
            return Err(RelayError::Config(
                "llm.base_url is required (or set LLM_BASE_URL)".into(),
            ));
        }
        if self.server.port == 0 {
            return Err(RelayError::Config("server.port must be non-zero".into()));
        }
        if self.session.chunk_threshold == 0 {
            return Err(RelayError::Config(
                "session.chunk_threshold must be non-zero".into(),
            ));
        }
        if self.session.max_chunk_length == 0 {
            return Err(RelayError::Config(
                "session.max_chunk_length must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
