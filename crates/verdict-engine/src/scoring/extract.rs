//! Map decoded provider payloads onto score records and synthesis results.
//!
//! Providers drift on key spelling and number shape, so every field is looked
//! up under a few aliases and numbers may arrive as integers, floats, or
//! numeric strings such as `"14"` or `"14/20"`.

use crate::llm::JsonObject;
use serde_json::Value;
use verdict_core::record::clamp_holistic;
use verdict_core::{ScoreRecord, ScoringItem};

const CATEGORY_KEYS: [&str; 4] = ["categoryScores", "category_scores", "scores", "categories"];
const HOLISTIC_KEYS: [&str; 6] = [
    "holisticScore",
    "holistic_score",
    "overallScore",
    "overall_score",
    "totalScore",
    "score",
];
const CRITIQUE_KEYS: [&str; 4] = ["critique", "feedback", "comments", "improvements"];
const NARRATIVE_KEYS: [&str; 4] = ["narrative", "summary", "overallFeedback", "overall_feedback"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload has no holistic score")]
    MissingHolistic,
    #[error("payload has no category scores")]
    MissingCategories,
}

/// Advisory result of the whole-sequence synthesis call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynthesisResult {
    /// Holistic score the provider reported for itself, already range-clamped.
    pub reported_holistic: Option<u8>,
    pub narrative: String,
    pub critique: String,
}

fn first_field<'a>(payload: &'a JsonObject, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| payload.get(*key))
        .filter(|value| !value.is_null())
}

/// Read a number out of a JSON value, tolerating numeric strings.
pub fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let head = s.split('/').next().unwrap_or_default().trim();
            head.parse::<f64>().ok()
        }
        Value::Object(map) => map.get("score").and_then(number_value),
        _ => None,
    }
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Array(parts) => {
            let lines: Vec<String> = parts
                .iter()
                .filter_map(text_value)
                .filter(|line| !line.is_empty())
                .collect();
            Some(lines.join("\n"))
        }
        _ => None,
    }
}

fn first_text(payload: &JsonObject, keys: &[&str]) -> String {
    first_field(payload, keys)
        .and_then(text_value)
        .unwrap_or_default()
}

fn category_values(payload: &JsonObject, categories: &[String]) -> Vec<(String, f64)> {
    if let Some(Value::Object(scores)) = first_field(payload, &CATEGORY_KEYS) {
        return scores
            .iter()
            .filter_map(|(key, value)| number_value(value).map(|raw| (key.clone(), raw)))
            .collect();
    }
    // Some providers flatten the categories into the top-level object.
    categories
        .iter()
        .filter_map(|key| payload.get(key).and_then(number_value).map(|raw| (key.clone(), raw)))
        .collect()
}

/// Build a [`ScoreRecord`] for `item` from its decoded payload.
pub fn score_record(
    item: &ScoringItem,
    payload: &JsonObject,
    categories: &[String],
) -> Result<ScoreRecord, PayloadError> {
    let holistic = first_field(payload, &HOLISTIC_KEYS)
        .and_then(number_value)
        .ok_or(PayloadError::MissingHolistic)?;
    let scores = category_values(payload, categories);
    if scores.is_empty() {
        return Err(PayloadError::MissingCategories);
    }
    Ok(ScoreRecord::new(
        item.index,
        item.content.clone(),
        scores,
        holistic,
        first_text(payload, &CRITIQUE_KEYS),
    ))
}

/// Synthesis payloads are fully optional: any missing field stays empty.
pub fn synthesis_result(payload: &JsonObject) -> SynthesisResult {
    SynthesisResult {
        reported_holistic: first_field(payload, &HOLISTIC_KEYS)
            .and_then(number_value)
            .map(clamp_holistic),
        narrative: first_text(payload, &NARRATIVE_KEYS),
        critique: first_text(payload, &CRITIQUE_KEYS),
    }
}
