//! Call protocol frames.
//!
//! Inbound frames are JSON text messages from the telephony provider:
//!
//! ```json
//! {"interaction_type":"response_required","response_id":3,
//!  "transcript":[{"role":"agent","content":"Hi!"},{"role":"user","content":"Hello"}]}
//! ```
//!
//! Outbound frames are either a keepalive reply or a response chunk.

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// What the provider expects from us for an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    /// Keepalive; answer with a pong.
    PingPong,
    /// Transcript changed; no reply expected.
    UpdateOnly,
    /// The caller finished a turn; reply now.
    ResponseRequired,
    /// The caller has been silent; nudge them.
    ReminderRequired,
    /// Anything this relay does not know.
    #[serde(other)]
    Unknown,
}

/// Speaker of a transcript entry, as the provider names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The voice agent (us).
    Agent,
    /// The caller.
    User,
    /// Any other role; skipped when syncing.
    #[serde(other)]
    Other,
}

/// One entry of the provider's transcript snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Who spoke.
    pub role: Speaker,
    /// What they said.
    #[serde(default)]
    pub content: String,
}

impl TranscriptEntry {
    /// Convenience constructor.
    pub fn new(role: Speaker, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundFrame {
    /// Frame classification.
    pub interaction_type: InteractionType,
    /// Full transcript snapshot, when the provider sent one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Vec<TranscriptEntry>>,
    /// Provider correlation id; echoed in pongs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<u64>,
}

impl InboundFrame {
    /// Decode one text message.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Frame`] for anything that is not a valid frame.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| RelayError::Frame(e.to_string()))
    }
}

/// A frame sent back to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    /// Keepalive reply.
    Pong {
        /// Always `"pong"`.
        response_type: String,
        /// The `response_id` of the ping, when it had one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    /// A chunk of a reply.
    Response {
        /// Correlates all chunks of one generation.
        response_id: u64,
        /// Speakable text.
        content: String,
        /// Set on the last chunk of a generation.
        content_complete: bool,
        /// Set only when the relay ends the call.
        end_call: bool,
    },
}

impl OutboundFrame {
    /// Keepalive reply echoing the ping's id.
    pub fn pong(timestamp: Option<u64>) -> Self {
        Self::Pong {
            response_type: "pong".to_owned(),
            timestamp,
        }
    }

    /// Non-final reply chunk.
    pub fn chunk(response_id: u64, content: impl Into<String>) -> Self {
        Self::Response {
            response_id,
            content: content.into(),
            content_complete: false,
            end_call: false,
        }
    }

    /// Last chunk of a generation.
    pub fn complete(response_id: u64, content: impl Into<String>) -> Self {
        Self::Response {
            response_id,
            content: content.into(),
            content_complete: true,
            end_call: false,
        }
    }

    /// Final frame of a call.
    pub fn end_call(response_id: u64, content: impl Into<String>) -> Self {
        Self::Response {
            response_id,
            content: content.into(),
            content_complete: true,
            end_call: true,
        }
    }

    /// Whether this frame closes a generation.
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            Self::Response {
                content_complete: true,
                ..
            }
        )
    }

    /// Encode as a JSON text message.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Send`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| RelayError::Send(e.to_string()))
    }
}
