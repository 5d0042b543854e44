//! Recover a JSON object from loosely formatted model output.
//!
//! Strategies run in order and each is all-or-nothing: a strategy either
//! yields a complete object or contributes nothing.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use verdict_core::util::sanitize_api_response;

pub type JsonObject = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to parse structured response. Content: {preview}")]
pub struct MalformedResponseError {
    /// Bounded, redacted prefix of the raw text.
    pub preview: String,
}

/// Which strategy recovered the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    Direct,
    Fenced,
    BraceSpan,
    BraceSpanCleaned,
}

type Strategy = fn(&str) -> Option<JsonObject>;

const STRATEGIES: [(DecodeStrategy, Strategy); 4] = [
    (DecodeStrategy::Direct, parse_direct),
    (DecodeStrategy::Fenced, parse_fenced),
    (DecodeStrategy::BraceSpan, parse_brace_span),
    (DecodeStrategy::BraceSpanCleaned, parse_brace_span_cleaned),
];

fn as_object(text: &str) -> Option<JsonObject> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*(?i:json)?[ \t]*\r?\n?(.*?)```")
            .unwrap_or_else(|_| Regex::new("$^").unwrap())
    })
}

fn trailing_comma_regex() -> &'static Regex {
    static TRAILING: OnceLock<Regex> = OnceLock::new();
    TRAILING.get_or_init(|| {
        Regex::new(r",(\s*[}\]])").unwrap_or_else(|_| Regex::new("$^").unwrap())
    })
}

/// Strategy 1: the whole text is the object.
pub fn parse_direct(text: &str) -> Option<JsonObject> {
    as_object(text)
}

/// Strategy 2: the inner text of the first fenced block, optionally tagged `json`.
pub fn parse_fenced(text: &str) -> Option<JsonObject> {
    let inner = fence_regex().captures(text)?.get(1)?.as_str();
    as_object(inner)
}

fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Strategy 3: from the first `{` to the last `}` inclusive.
pub fn parse_brace_span(text: &str) -> Option<JsonObject> {
    as_object(brace_span(text)?)
}

/// Remove commas that directly precede a closing `}` or `]`.
pub fn strip_trailing_commas(text: &str) -> String {
    trailing_comma_regex().replace_all(text, "$1").into_owned()
}

/// Strategy 4: strategy 3 after trailing-comma cleanup.
pub fn parse_brace_span_cleaned(text: &str) -> Option<JsonObject> {
    let span = brace_span(text)?;
    as_object(&strip_trailing_commas(span))
}

/// Decode `text` into a JSON object, reporting the strategy that worked.
pub fn decode_with_strategy(
    text: &str,
) -> Result<(JsonObject, DecodeStrategy), MalformedResponseError> {
    for (kind, strategy) in STRATEGIES {
        if let Some(object) = strategy(text) {
            return Ok((object, kind));
        }
    }
    Err(MalformedResponseError {
        preview: sanitize_api_response(text),
    })
}

pub fn decode_object(text: &str) -> Result<JsonObject, MalformedResponseError> {
    decode_with_strategy(text).map(|(object, _)| object)
}
