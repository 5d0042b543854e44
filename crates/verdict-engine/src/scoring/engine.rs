use super::aggregate::aggregate;
use super::extract::{synthesis_result, SynthesisResult};
use super::scorer::ItemScorer;
use super::ScoringError;
use crate::llm::{decode_object, DispatchDiagnostics, Dispatcher};
use tracing::Instrument;
use uuid::Uuid;
use verdict_core::util::{sanitize_api_response, truncate_str};
use verdict_core::{
    default_categories, AggregateReport, ChatMessage, GenerateOptions, GenerateRequest, Provider,
    ResponseFormatHint, ScoringItem, ScoringPrompts,
};

const SYNTHESIS_FAILURE_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSettings {
    /// Category keys every record is expected to carry.
    pub categories: Vec<String>,
    pub prompts: ScoringPrompts,
    /// Whether to make the whole-sequence synthesis call.
    pub synthesis: bool,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        let categories = default_categories();
        Self {
            prompts: ScoringPrompts::for_categories(&categories),
            categories,
            synthesis: true,
        }
    }
}

/// Finished evaluation: the report plus what happened on the way.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub report: AggregateReport,
    pub degraded_items: usize,
    /// One entry per item, in item order.
    pub item_diagnostics: Vec<DispatchDiagnostics>,
    /// Why the synthesis call produced nothing, when it was attempted and failed.
    pub synthesis_failure: Option<String>,
}

pub struct Evaluator<P> {
    dispatcher: Dispatcher<P>,
    settings: EvaluationSettings,
}

impl<P: Provider> Evaluator<P> {
    pub fn new(dispatcher: Dispatcher<P>, settings: EvaluationSettings) -> Self {
        Self {
            dispatcher,
            settings,
        }
    }

    /// Score `items` in order, optionally synthesize, and aggregate.
    ///
    /// Fails only when there is nothing to score or the run is cancelled;
    /// provider and decode failures degrade individual items or drop the
    /// synthesis fields instead.
    pub async fn evaluate(&self, items: &[ScoringItem]) -> Result<EvaluationOutcome, ScoringError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("evaluation", run_id = %run_id);
        self.evaluate_run(run_id, items).instrument(span).await
    }

    async fn evaluate_run(
        &self,
        run_id: Uuid,
        items: &[ScoringItem],
    ) -> Result<EvaluationOutcome, ScoringError> {
        if items.is_empty() {
            return Err(ScoringError::NoItems);
        }
        tracing::info!(items = items.len(), synthesis = self.settings.synthesis, "evaluation started");

        let scorer = ItemScorer::new(
            &self.dispatcher,
            &self.settings.prompts,
            &self.settings.categories,
        );
        let run = scorer.score_all(items).await?;
        let degraded_items = run.degraded_count();
        let records = run.records();

        let mut synthesis_failure = None;
        let synthesis = if self.settings.synthesis {
            match self.synthesize(items, run.last_credential).await {
                Ok(result) => Some(result),
                Err(ScoringError::Cancelled) => return Err(ScoringError::Cancelled),
                Err(err) => {
                    let reason = sanitize_api_response(&err.to_string());
                    let reason = truncate_str(&reason, SYNTHESIS_FAILURE_CHARS).to_string();
                    tracing::warn!(reason = %reason, "synthesis failed, reporting per-item fields only");
                    synthesis_failure = Some(reason);
                    None
                }
            }
        } else {
            None
        };

        let report = aggregate(run_id, records, synthesis.as_ref());
        tracing::info!(
            holistic_average = report.holistic_average,
            corrected_holistic = report.corrected_holistic,
            degraded_items,
            "evaluation finished"
        );

        Ok(EvaluationOutcome {
            report,
            degraded_items,
            item_diagnostics: run.items.into_iter().map(|item| item.diagnostics).collect(),
            synthesis_failure,
        })
    }

    /// One call over the whole sequence. The reported score is advisory.
    pub async fn synthesize(
        &self,
        items: &[ScoringItem],
        preferred_key: Option<usize>,
    ) -> Result<SynthesisResult, ScoringError> {
        let request = synthesis_request(items, &self.settings.prompts);
        let dispatched = self.dispatcher.generate(&request, preferred_key).await?;
        let payload = decode_object(&dispatched.value)?;
        Ok(synthesis_result(&payload))
    }
}

fn synthesis_request(items: &[ScoringItem], prompts: &ScoringPrompts) -> GenerateRequest {
    let body = items
        .iter()
        .map(|item| format!("Item {}:\n{}", item.index, item.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    GenerateRequest {
        model: String::new(),
        messages: vec![
            ChatMessage::system(prompts.synthesis_instructions.clone()),
            ChatMessage::user(format!(
                "Review the whole sequence of {} items.\n\n{}",
                items.len(),
                body
            )),
        ],
        options: GenerateOptions {
            temperature: prompts.temperature,
            max_output_tokens: prompts.max_output_tokens,
            response_format_hint: ResponseFormatHint::JsonObject,
        },
    }
}
