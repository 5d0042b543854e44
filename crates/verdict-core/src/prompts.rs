use serde::{Deserialize, Serialize};

/// Default score categories, six keys scored 0-20 each.
pub const DEFAULT_CATEGORIES: [&str; 6] = [
    "clarity",
    "relevance",
    "structure",
    "vocabulary",
    "fluency",
    "engagement",
];

pub fn default_categories() -> Vec<String> {
    DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect()
}

/// Caller-supplied instructions. The engine treats both strings as opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPrompts {
    /// System instructions for each per-item call.
    pub item_instructions: String,
    /// System instructions for the optional whole-sequence synthesis call.
    pub synthesis_instructions: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl Default for ScoringPrompts {
    fn default() -> Self {
        Self::for_categories(&default_categories())
    }
}

impl ScoringPrompts {
    pub fn for_categories(categories: &[String]) -> Self {
        let keys = categories.join(", ");
        Self {
            item_instructions: format!(
                "You evaluate one response at a time. Judge only the item you are given, \
                 using the preceding context for reference. Reply with a JSON object: \
                 {{\"categoryScores\": {{<key>: 0-20}}, \"holisticScore\": 0-100, \"critique\": string}}. \
                 Category keys: {}. The holistic score is your own overall judgment, not a sum.",
                keys
            ),
            synthesis_instructions: "You review a whole sequence of responses. Reply with a JSON \
                 object: {\"holisticScore\": 0-100, \"narrative\": string, \"critique\": string}. \
                 Describe recurring patterns across the sequence."
                .to_string(),
            temperature: Some(0.2),
            max_output_tokens: Some(1_024),
        }
    }
}
