//! Terminal JSON recovery: deterministic cleanup of raw model output, then a
//! strict parse into `StudentProfile`.
//!
//! Each cleanup step is conditional on a prefix or structural check and runs
//! once, in a fixed order. These heuristics are the only concession made to
//! model unreliability; nothing is retried.

use super::ExtractionError;
use crate::models::StudentProfile;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";
const FENCE_OPEN: &str = "```json";
const FENCE_CLOSE: &str = "```";

/// Parse accumulated model output into a profile.
///
/// On failure the error carries `raw` verbatim (before cleanup) so the
/// operator can judge the model output without re-running the extraction.
pub fn recover(raw: &str) -> Result<StudentProfile, ExtractionError> {
    let cleaned = clean_response(raw);
    serde_json::from_str::<StudentProfile>(&cleaned).map_err(|e| ExtractionError::Parse {
        raw: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Apply every cleanup step in order.
pub fn clean_response(raw: &str) -> String {
    let text = raw.trim();
    let text = strip_reasoning_block(text);
    let text = strip_code_fence(text);
    unwrap_outer_layer(text).to_string()
}

/// Drop a leading `<think>...</think>` block.
///
/// Without a closing tag the text is returned unchanged and the parse fails.
pub fn strip_reasoning_block(text: &str) -> &str {
    if !text.starts_with(THINK_OPEN) {
        return text;
    }
    match text.find(THINK_CLOSE) {
        Some(end) => text[end + THINK_CLOSE.len()..].trim(),
        None => text,
    }
}

/// Drop a leading ```` ```json ```` opener and, if present, the closing
/// ```` ``` ```` marker at the very end.
pub fn strip_code_fence(text: &str) -> &str {
    let Some(body) = text.strip_prefix(FENCE_OPEN) else {
        return text;
    };
    let body = body.trim();
    body.strip_suffix(FENCE_CLOSE).unwrap_or(body).trim()
}

/// Heuristic single-layer unwrap.
///
/// When the last `{` is not the first character (or there is none), the
/// object is assumed to sit inside one character of wrapping on each side,
/// e.g. `[{...}]`. The first and last characters are dropped once. This is
/// not a structural parse: `{"a": {...}}` also triggers it.
pub fn unwrap_outer_layer(text: &str) -> &str {
    if text.rfind('{') == Some(0) {
        return text;
    }
    let mut chars = text.chars();
    chars.next();
    chars.next_back();
    chars.as_str().trim()
}
