//! Recognition of upstream streaming event shapes.
//!
//! OpenAI-compatible gateways do not agree on one delta envelope. Some emit
//! chat-completion chunks (`choices[].delta.content`), some a flat
//! `{"delta": "..."}` payload (Responses-style `response.output_text.delta`),
//! and Anthropic-compatible ones emit `content_block_delta` events. All of
//! them are mapped onto the closed [`StreamEvent`] set here; anything else is
//! [`StreamEvent::Skip`].

use serde_json::Value;

/// One decoded upstream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A text delta, whichever envelope carried it.
    Text(String),
    /// The upstream signalled the end of the generation.
    Done,
    /// The upstream reported an error inside the stream.
    Error(String),
    /// Unrecognized, empty or malformed; ignore and keep reading.
    Skip,
}

/// The envelope a text delta arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaShape {
    /// `{"choices":[{"delta":{"content":"..."}}]}`
    ChoiceDelta,
    /// `{"delta":"..."}`
    FlatDelta,
    /// `{"type":"content_block_delta","delta":{"type":"text_delta","text":"..."}}`
    ContentBlockDelta,
}

/// Event names that close a stream without a `[DONE]` data line.
const TERMINAL_EVENT_TYPES: &[&str] = &["message_stop", "response.completed", "response.done"];

/// Classify one SSE event from its optional `event:` name and `data:` body.
pub fn classify_event(event_type: Option<&str>, data: &str) -> StreamEvent {
    let data = data.trim();
    if data == "[DONE]" {
        return StreamEvent::Done;
    }

    let Ok(payload) = serde_json::from_str::<Value>(data) else {
        tracing::debug!(data_len = data.len(), "skipping malformed stream frame");
        return StreamEvent::Skip;
    };

    // the JSON `type` wins over the SSE event name when both are present
    let kind = payload
        .get("type")
        .and_then(Value::as_str)
        .or(event_type)
        .unwrap_or_default();

    if TERMINAL_EVENT_TYPES.contains(&kind) {
        return StreamEvent::Done;
    }
    if kind == "error" || kind == "response.failed" {
        return StreamEvent::Error(error_text(&payload));
    }
    if kind.is_empty()
        && let Some(error) = payload.get("error")
        && !error.is_null()
    {
        return StreamEvent::Error(error_text(&payload));
    }

    match extract_delta(&payload) {
        Some((_, text)) if !text.is_empty() => StreamEvent::Text(text.to_string()),
        _ => StreamEvent::Skip,
    }
}

/// Find the delta text in whichever recognized envelope is present.
pub fn extract_delta(payload: &Value) -> Option<(DeltaShape, &str)> {
    if let Some(text) = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str)
    {
        return Some((DeltaShape::ChoiceDelta, text));
    }

    match payload.get("delta") {
        Some(Value::String(text)) => Some((DeltaShape::FlatDelta, text.as_str())),
        Some(delta @ Value::Object(_)) => {
            let is_text = delta
                .get("type")
                .and_then(Value::as_str)
                .is_none_or(|t| t == "text_delta");
            if !is_text {
                return None;
            }
            delta
                .get("text")
                .and_then(Value::as_str)
                .map(|text| (DeltaShape::ContentBlockDelta, text))
        }
        _ => None,
    }
}

fn error_text(payload: &Value) -> String {
    let error = payload.get("error").unwrap_or(payload);
    error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map(String::from)
        .unwrap_or_else(|| error.to_string())
}
