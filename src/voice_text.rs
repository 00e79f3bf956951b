//! Text shaping for speech output.
//!
//! LLM replies arrive as prose that often contains markdown. Before a chunk
//! goes to TTS it must be plain text: markup stripped, links reduced to
//! their labels, URLs dropped, line structure flattened to single spaces,
//! and the length bounded.

use regex::Regex;
use std::sync::LazyLock;

/// Default bound applied by callers that have no configured limit.
pub const DEFAULT_MAX_LENGTH: usize = 500;

/// Appended when text is cut without a sentence boundary.
pub const ELLIPSIS: &str = "...";

/// Sentence terminators considered when truncating.
const SENTENCE_BREAKS: [&str; 3] = [". ", "? ", "! "];

/// Rewrite rules, applied in order. Later rules assume earlier ones have
/// already removed structure.
const RULE_SOURCES: &[(&str, &str)] = &[
    // fenced code, content and all
    (r"(?s)```.*?```", ""),
    (r"`([^`]+)`", "$1"),
    (r"\*\*([^*]+)\*\*", "$1"),
    (r"__([^_]+)__", "$1"),
    (r"\*([^*]+)\*", "$1"),
    (r"_([^_]+)_", "$1"),
    (r"~~([^~]+)~~", "$1"),
    (r"\[([^\]]+)\]\([^)]+\)", "$1"),
    (r"[A-Za-z][A-Za-z0-9+.\-]*://\S+", ""),
    (r"(?m)^#+[ \t]*", ""),
    (r"(?m)^[ \t]*[-*+][ \t]+", ""),
    (r"(?m)^[ \t]*\d+\.[ \t]+", ""),
    (r"\n{2,}", " "),
    (r"\n", " "),
    (r"\s{2,}", " "),
    (r"\.{2,}", "."),
];

static RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    RULE_SOURCES
        .iter()
        .filter_map(|&(pattern, replacement)| match Regex::new(pattern) {
            Ok(re) => Some((re, replacement)),
            Err(e) => {
                tracing::error!(pattern, error = %e, "invalid normalization pattern");
                None
            }
        })
        .collect()
});

static QUESTION_START: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(who|what|when|where|why|how|is|are|can|could|would|should|do|does|did)\b",
    )
    .ok()
});

/// Turn arbitrary LLM output into plain text suitable for TTS.
///
/// Never fails. When the cleaned text is longer than `max_len` characters it
/// is cut at the last sentence break past the halfway point, or hard-cut and
/// suffixed with [`ELLIPSIS`].
///
/// # Examples
///
/// ```
/// use voice_relay::voice_text::normalize;
///
/// assert_eq!(
///     normalize("This is **important** text.", 500),
///     "This is important text."
/// );
/// ```
pub fn normalize(text: &str, max_len: usize) -> String {
    let mut cleaned = text.to_string();
    for (re, replacement) in RULES.iter() {
        if re.is_match(&cleaned) {
            cleaned = re.replace_all(&cleaned, *replacement).into_owned();
        }
    }
    let cleaned = cleaned.trim();

    if cleaned.chars().count() > max_len {
        truncate_at_sentence(cleaned, max_len)
    } else {
        cleaned.to_string()
    }
}

/// Cut `text` to at most `max_len` characters, preferring a sentence break.
fn truncate_at_sentence(text: &str, max_len: usize) -> String {
    let cut = text
        .char_indices()
        .nth(max_len)
        .map_or(text.len(), |(idx, _)| idx);
    let window = &text[..cut];

    let boundary = SENTENCE_BREAKS
        .iter()
        .filter_map(|brk| window.rfind(brk))
        .max();
    if let Some(idx) = boundary {
        let offset = window[..idx].chars().count();
        if offset * 2 > max_len {
            // the terminator is one ASCII byte, so idx + 1 is a char boundary
            return text[..=idx].trim().to_string();
        }
    }

    format!("{}{ELLIPSIS}", window.trim())
}

/// Heuristic question detection, used for turn logging.
pub fn is_question(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.ends_with('?')
        || QUESTION_START
            .as_ref()
            .is_some_and(|re| re.is_match(trimmed))
}
