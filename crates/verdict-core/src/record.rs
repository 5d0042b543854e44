use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Upper bound for a single category score.
pub const CATEGORY_MAX: u8 = 20;
/// Upper bound for a holistic score.
pub const HOLISTIC_MAX: u8 = 100;

/// Category score used for every category of a degraded record.
pub const DEGRADED_CATEGORY_SCORE: u8 = 2;
/// Holistic score used for a degraded record.
pub const DEGRADED_HOLISTIC_SCORE: u8 = 10;

/// Category key -> score, ordered by key so reports render deterministically.
pub type CategoryScores = BTreeMap<String, u8>;

/// Clamp a raw numeric score into `0..=CATEGORY_MAX`.
pub fn clamp_category(raw: f64) -> u8 {
    clamp_score(raw, CATEGORY_MAX)
}

/// Clamp a raw numeric score into `0..=HOLISTIC_MAX`.
pub fn clamp_holistic(raw: f64) -> u8 {
    clamp_score(raw, HOLISTIC_MAX)
}

fn clamp_score(raw: f64, max: u8) -> u8 {
    if !raw.is_finite() {
        return 0;
    }
    raw.round().clamp(0.0, max as f64) as u8
}

/// Independent judgment for exactly one scored item.
///
/// `holistic_score` is its own judgment and is never derived from
/// `category_scores`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    /// 1-based position among the scored items.
    pub index: usize,
    pub content: String,
    pub category_scores: CategoryScores,
    pub holistic_score: u8,
    pub critique: String,
    /// Set when the record is the fixed fallback for a failed evaluation.
    #[serde(default)]
    pub degraded: bool,
}

impl ScoreRecord {
    /// Build a record, clamping every score into its valid range.
    pub fn new(
        index: usize,
        content: impl Into<String>,
        category_scores: impl IntoIterator<Item = (String, f64)>,
        holistic_score: f64,
        critique: impl Into<String>,
    ) -> Self {
        Self {
            index,
            content: content.into(),
            category_scores: category_scores
                .into_iter()
                .map(|(key, raw)| (key, clamp_category(raw)))
                .collect(),
            holistic_score: clamp_holistic(holistic_score),
            critique: critique.into(),
            degraded: false,
        }
    }

    /// Fixed-form stand-in for an item whose evaluation could not complete.
    pub fn degraded(
        index: usize,
        content: impl Into<String>,
        categories: &[String],
        reason: &str,
    ) -> Self {
        Self {
            index,
            content: content.into(),
            category_scores: categories
                .iter()
                .map(|key| (key.clone(), DEGRADED_CATEGORY_SCORE))
                .collect(),
            holistic_score: DEGRADED_HOLISTIC_SCORE,
            critique: format!(
                "Evaluation failed for this item, so a placeholder score was recorded. Reason: {}",
                reason
            ),
            degraded: true,
        }
    }
}

/// Holistic report derived from a full sequence of score records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub category_averages: CategoryScores,
    /// Authoritative aggregate: rounded mean of the per-item holistic scores.
    pub holistic_average: u8,
    pub pattern_summary: String,
    pub items: Vec<ScoreRecord>,
    /// Advisory synthesis score after the one-directional clamp.
    pub corrected_holistic: u8,
    /// Score the synthesis call reported for itself, before correction.
    #[serde(default)]
    pub reported_holistic: Option<u8>,
    /// Synthesis narrative; empty when the synthesis call was skipped or failed.
    #[serde(default)]
    pub narrative: String,
    #[serde(default)]
    pub critique: String,
}

impl AggregateReport {
    pub fn degraded_count(&self) -> usize {
        self.items.iter().filter(|item| item.degraded).count()
    }
}
