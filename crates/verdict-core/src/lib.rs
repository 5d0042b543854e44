//! Core domain model and contracts for verdict.

pub mod prompts;
pub mod protocol;
pub mod record;
pub mod transcript;
pub mod util;

pub use prompts::{default_categories, ScoringPrompts};
pub use protocol::*;
pub use record::{AggregateReport, CategoryScores, ScoreRecord};
pub use transcript::{ScoringItem, Transcript, Turn};
