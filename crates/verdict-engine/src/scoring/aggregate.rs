//! Pure aggregation over score records: averages, pattern heuristics, and the
//! downward-only correction of a synthesis-reported holistic score.

use super::extract::SynthesisResult;
use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;
use verdict_core::record::{clamp_category, clamp_holistic, CATEGORY_MAX, HOLISTIC_MAX};
use verdict_core::{AggregateReport, CategoryScores, ScoreRecord};

const SPREAD_INCONSISTENT: u8 = 30;
const SPREAD_STABLE: u8 = 10;
const OPENER_DEVIATION: f64 = 10.0;
const TREND_DELTA: f64 = 10.0;
const LEVEL_WEAK: f64 = 25.0;
const LEVEL_STRONG: f64 = 60.0;

/// Ceiling applied when category evidence is weak.
///
/// `max_ratio` is exclusive and compared against
/// `sum(category averages) / (CATEGORY_MAX * category count)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsistencyTier {
    pub max_ratio: f64,
    pub ceiling: u8,
}

/// Checked in order; the first matching tier wins.
pub const CONSISTENCY_TIERS: [ConsistencyTier; 3] = [
    ConsistencyTier {
        max_ratio: 0.20,
        ceiling: 25,
    },
    ConsistencyTier {
        max_ratio: 0.35,
        ceiling: 40,
    },
    ConsistencyTier {
        max_ratio: 0.50,
        ceiling: 55,
    },
];

fn mean(values: impl ExactSizeIterator<Item = f64>) -> Option<f64> {
    let len = values.len();
    if len == 0 {
        return None;
    }
    Some(values.sum::<f64>() / len as f64)
}

/// Rounded mean per category key, over the records that carry that key.
pub fn category_averages(items: &[ScoreRecord]) -> CategoryScores {
    let mut sums: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
    for item in items {
        for (key, score) in &item.category_scores {
            let entry = sums.entry(key.as_str()).or_insert((0, 0));
            entry.0 += u32::from(*score);
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(key, (sum, count))| (key.to_string(), clamp_category(sum as f64 / count as f64)))
        .collect()
}

/// Rounded mean of per-item holistic scores; 0 for an empty sequence.
pub fn holistic_average(items: &[ScoreRecord]) -> u8 {
    mean(items.iter().map(|item| f64::from(item.holistic_score)))
        .map(clamp_holistic)
        .unwrap_or(0)
}

/// Heuristic tags over the holistic-score sequence.
pub fn pattern_summary(scores: &[u8]) -> String {
    let Some(avg) = mean(scores.iter().map(|s| f64::from(*s))) else {
        return "no items scored".to_string();
    };
    let mut tags: Vec<&str> = Vec::new();

    let max = scores.iter().copied().max().unwrap_or(0);
    let min = scores.iter().copied().min().unwrap_or(0);
    let spread = max - min;
    if spread > SPREAD_INCONSISTENT {
        tags.push("inconsistent");
    } else if spread < SPREAD_STABLE {
        tags.push("stable");
    }

    let first = f64::from(scores[0]);
    if first < avg - OPENER_DEVIATION {
        tags.push("weak opener");
    } else if first > avg + OPENER_DEVIATION {
        tags.push("strong opener, declines");
    }

    if scores.len() >= 2 {
        let (early, late) = scores.split_at(scores.len() / 2);
        let early = mean(early.iter().map(|s| f64::from(*s))).unwrap_or(avg);
        let late = mean(late.iter().map(|s| f64::from(*s))).unwrap_or(avg);
        if late - early > TREND_DELTA {
            tags.push("improves over time");
        } else if early - late > TREND_DELTA {
            tags.push("declines over time");
        }
    }

    if avg < LEVEL_WEAK {
        tags.push("overall weak");
    } else if avg > LEVEL_STRONG {
        tags.push("overall strong");
    }

    let rounded = clamp_holistic(avg);
    if tags.is_empty() {
        format!("average performance (avg {})", rounded)
    } else {
        format!("{} (avg {})", tags.join("; "), rounded)
    }
}

/// Ceiling implied by the category averages; `HOLISTIC_MAX` when no tier applies.
pub fn tier_ceiling(category_averages: &CategoryScores) -> u8 {
    if category_averages.is_empty() {
        return HOLISTIC_MAX;
    }
    let total: u32 = category_averages.values().map(|v| u32::from(*v)).sum();
    let possible = u32::from(CATEGORY_MAX) * category_averages.len() as u32;
    let ratio = f64::from(total) / f64::from(possible);
    CONSISTENCY_TIERS
        .iter()
        .find(|tier| ratio < tier.max_ratio)
        .map(|tier| tier.ceiling)
        .unwrap_or(HOLISTIC_MAX)
}

/// Clamp a reported holistic score downward against the per-item average and
/// the category tier ceiling. Never raises, and applying it twice is a no-op.
pub fn correct_holistic(
    reported: u8,
    holistic_average: u8,
    category_averages: &CategoryScores,
) -> u8 {
    reported
        .min(holistic_average)
        .min(tier_ceiling(category_averages))
}

/// Build the report from all records plus an optional synthesis result.
///
/// Without a synthesis score the corrected value starts from the per-item
/// average, so it is still bounded by the category tiers.
pub fn aggregate(
    run_id: Uuid,
    items: Vec<ScoreRecord>,
    synthesis: Option<&SynthesisResult>,
) -> AggregateReport {
    let category_averages = category_averages(&items);
    let holistic_average = holistic_average(&items);
    let scores: Vec<u8> = items.iter().map(|item| item.holistic_score).collect();
    let pattern_summary = pattern_summary(&scores);

    let reported_holistic = synthesis.and_then(|s| s.reported_holistic);
    let corrected_holistic = correct_holistic(
        reported_holistic.unwrap_or(holistic_average),
        holistic_average,
        &category_averages,
    );

    AggregateReport {
        run_id,
        generated_at: Utc::now(),
        category_averages,
        holistic_average,
        pattern_summary,
        items,
        corrected_holistic,
        reported_holistic,
        narrative: synthesis.map(|s| s.narrative.clone()).unwrap_or_default(),
        critique: synthesis.map(|s| s.critique.clone()).unwrap_or_default(),
    }
}
