//! Per-call conversation log.

use crate::llm::{ConversationMessage, Role};
use crate::protocol::{Speaker, TranscriptEntry};

/// Ordered turns of one call, rebuilt from the provider's transcript.
///
/// Every stored message is trimmed and non-empty. Call identity and start
/// time live on the session handle.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
}

impl Conversation {
    /// Start an empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the log with the turns of a transcript snapshot.
    ///
    /// Agent turns become assistant messages; blank turns and unknown
    /// speakers are dropped. Replaying the same snapshot is a no-op.
    pub fn sync_from_transcript(&mut self, transcript: &[TranscriptEntry]) {
        self.messages = transcript
            .iter()
            .filter_map(|entry| {
                let role = match entry.role {
                    Speaker::Agent => Role::Assistant,
                    Speaker::User => Role::User,
                    Speaker::Other => return None,
                };
                ConversationMessage::new(role, &entry.content)
            })
            .collect();
    }

    /// Append a completed assistant reply. Returns `false` if it was blank.
    pub fn push_assistant(&mut self, content: &str) -> bool {
        match ConversationMessage::new(Role::Assistant, content) {
            Some(message) => {
                self.messages.push(message);
                true
            }
            None => false,
        }
    }

    /// The most recent caller turn, if any.
    pub fn latest_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// All turns, oldest first.
    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Number of stored turns.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether no turns are stored.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
