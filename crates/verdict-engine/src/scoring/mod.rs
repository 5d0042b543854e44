//! Per-item scoring and aggregation.
//!
//! [`ItemScorer`] walks the items in order through the [`Dispatcher`], and
//! [`Evaluator`] adds the optional synthesis call and builds the report.
//!
//! [`Dispatcher`]: crate::llm::Dispatcher

pub mod aggregate;
mod engine;
pub mod extract;
mod scorer;

pub use aggregate::{aggregate, correct_holistic, pattern_summary, CONSISTENCY_TIERS};
pub use engine::{EvaluationOutcome, EvaluationSettings, Evaluator};
pub use extract::{PayloadError, SynthesisResult};
pub use scorer::{item_request, ItemScorer, ScoredItem, ScoringRun};

use crate::llm::{DispatchError, MalformedResponseError};

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error(transparent)]
    Dispatch(DispatchError),
    #[error(transparent)]
    Malformed(#[from] MalformedResponseError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("evaluation cancelled")]
    Cancelled,
    #[error("nothing to evaluate: no scorable items")]
    NoItems,
}

impl From<DispatchError> for ScoringError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Cancelled => ScoringError::Cancelled,
            other => ScoringError::Dispatch(other),
        }
    }
}
