use serde::{Deserialize, Serialize};

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
}

impl Turn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub turns: Vec<Turn>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TranscriptShape {
    Wrapped { turns: Vec<Turn> },
    Bare(Vec<Turn>),
}

impl Transcript {
    /// Parse either `{"turns": [...]}` or a bare array of turns.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let turns = match serde_json::from_str::<TranscriptShape>(text)? {
            TranscriptShape::Wrapped { turns } | TranscriptShape::Bare(turns) => turns,
        };
        Ok(Self { turns })
    }

    pub fn scoring_items(&self, scored_role: &str, window: usize) -> Vec<ScoringItem> {
        ScoringItem::from_turns(&self.turns, scored_role, window)
    }
}

/// A discrete unit to score plus its fixed window of preceding turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringItem {
    /// 1-based position among scored items.
    pub index: usize,
    pub content: String,
    pub context: Vec<Turn>,
}

impl ScoringItem {
    /// Select turns spoken by `scored_role` and attach up to `window`
    /// immediately preceding turns as context.
    ///
    /// Context is taken from the transcript itself, never from other
    /// scoring results, so items can be scored in any order.
    pub fn from_turns(turns: &[Turn], scored_role: &str, window: usize) -> Vec<ScoringItem> {
        let mut items = Vec::new();
        for (pos, turn) in turns.iter().enumerate() {
            if !turn.role.eq_ignore_ascii_case(scored_role) {
                continue;
            }
            if turn.content.trim().is_empty() {
                continue;
            }
            let start = pos.saturating_sub(window);
            items.push(ScoringItem {
                index: items.len() + 1,
                content: turn.content.clone(),
                context: turns[start..pos].to_vec(),
            });
        }
        items
    }

    /// Render the context window as `role: content` lines.
    pub fn context_text(&self) -> String {
        self.context
            .iter()
            .map(|turn| format!("{}: {}", turn.role, turn.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_turns() -> Vec<Turn> {
        vec![
            Turn::new("assistant", "Tell me about yourself."),
            Turn::new("user", "I build compilers."),
            Turn::new("assistant", "Why compilers?"),
            Turn::new("user", "I like parsers."),
            Turn::new("user", "   "),
        ]
    }

    #[test]
    fn test_items_are_one_indexed_and_skip_blank_turns() {
        let items = ScoringItem::from_turns(&sample_turns(), "user", 1);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].index, 1);
        assert_eq!(items[1].index, 2);
        assert_eq!(items[1].content, "I like parsers.");
    }

    #[test]
    fn test_context_window_is_bounded() {
        let items = ScoringItem::from_turns(&sample_turns(), "user", 1);
        assert_eq!(items[1].context, vec![Turn::new("assistant", "Why compilers?")]);

        let wide = ScoringItem::from_turns(&sample_turns(), "user", 10);
        assert_eq!(wide[0].context.len(), 1);
        assert_eq!(wide[1].context.len(), 3);
    }

    #[test]
    fn test_zero_window_has_no_context() {
        let items = ScoringItem::from_turns(&sample_turns(), "USER", 0);
        assert!(items.iter().all(|item| item.context.is_empty()));
        assert_eq!(items[0].context_text(), "");
    }

    #[test]
    fn test_transcript_accepts_both_shapes() {
        let wrapped = r#"{"turns":[{"role":"user","content":"hi"}]}"#;
        let bare = r#"[{"role":"user","content":"hi"}]"#;
        assert_eq!(
            Transcript::from_json(wrapped).unwrap(),
            Transcript::from_json(bare).unwrap()
        );
        assert!(Transcript::from_json("{\"nope\":1}").is_err());
    }
}
