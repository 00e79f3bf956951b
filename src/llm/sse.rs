//! Incremental Server-Sent Events decoder for streaming LLM responses.
//!
//! Bytes arrive from the HTTP body in arbitrary slices; [`SseDecoder`] keeps
//! the partial line between pushes and yields an [`SseEvent`] at every blank
//! line. Lines are split on raw `\n` bytes before UTF-8 decoding so a
//! multi-byte character cut across two network reads survives intact.
//!
//! ```text
//! event: content_block_delta
//! data: {"type":"content_block_delta", ...}
//!
//! data: [DONE]
//! ```

/// A decoded Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if the server sent one.
    pub event_type: Option<String>,
    /// All `data:` lines of the event joined with `\n`.
    pub data: String,
}

#[derive(Debug, Default)]
struct PendingEvent {
    event_type: Option<String>,
    data_lines: Vec<String>,
}

impl PendingEvent {
    fn take(&mut self) -> Option<SseEvent> {
        if self.data_lines.is_empty() {
            self.event_type = None;
            return None;
        }
        let event = SseEvent {
            event_type: self.event_type.take(),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        Some(event)
    }

    /// Apply one line; returns an event when the line is a blank boundary.
    fn apply(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = split_field(line);
        match field {
            "data" => self.data_lines.push(value.to_string()),
            "event" => self.event_type = Some(value.to_string()),
            // id, retry and unknown fields carry nothing we use
            _ => {}
        }
        None
    }
}

/// Split `field: value`, dropping one optional space after the colon.
/// A line without a colon is a field with an empty value.
fn split_field(line: &str) -> (&str, &str) {
    match line.split_once(':') {
        Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
        None => (line, ""),
    }
}

/// Incremental SSE decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    partial: Vec<u8>,
    pending: PendingEvent,
}

impl SseDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a slice of body bytes, returning every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for &byte in chunk {
            if byte != b'\n' {
                self.partial.push(byte);
                continue;
            }
            let raw = std::mem::take(&mut self.partial);
            let line = String::from_utf8_lossy(&raw);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.pending.apply(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.partial.is_empty() {
            let raw = std::mem::take(&mut self.partial);
            let line = String::from_utf8_lossy(&raw);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            // a non-empty line never completes an event by itself
            let _ = self.pending.apply(line);
        }
        self.pending.take()
    }
}
