//! Orchestration for verdict: candidate resolution, resilient dispatch,
//! tolerant decoding, per-item scoring, and aggregation.

pub mod llm;
pub mod scoring;

#[cfg(test)]
pub(crate) mod testing;

pub use llm::{Dispatcher, ModelSources};
pub use scoring::{EvaluationOutcome, EvaluationSettings, Evaluator, ScoringError};
