use super::extract::score_record;
use super::ScoringError;
use crate::llm::{decode_object, DispatchDiagnostics, DispatchError, Dispatcher};
use verdict_core::util::{sanitize_api_response, truncate_str};
use verdict_core::{
    ChatMessage, GenerateOptions, GenerateRequest, Provider, ResponseFormatHint, ScoreRecord,
    ScoringItem, ScoringPrompts,
};

const DEGRADED_REASON_CHARS: usize = 160;

/// Request asking for a score payload for `item` alone.
///
/// The model field is left blank; the dispatcher fills it per candidate.
pub fn item_request(item: &ScoringItem, total: usize, prompts: &ScoringPrompts) -> GenerateRequest {
    let context = item.context_text();
    let body = format!(
        "Item {} of {}.\n\nPreceding context:\n{}\n\nItem to evaluate:\n{}\n\nScore this item only.",
        item.index,
        total,
        if context.is_empty() { "(none)" } else { context.as_str() },
        item.content
    );
    GenerateRequest {
        model: String::new(),
        messages: vec![
            ChatMessage::system(prompts.item_instructions.clone()),
            ChatMessage::user(body),
        ],
        options: GenerateOptions {
            temperature: prompts.temperature,
            max_output_tokens: prompts.max_output_tokens,
            response_format_hint: ResponseFormatHint::JsonObject,
        },
    }
}

/// Outcome for one item. `failure` is set when `record` is degraded.
#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub record: ScoreRecord,
    pub diagnostics: DispatchDiagnostics,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScoringRun {
    pub items: Vec<ScoredItem>,
    /// Credential slot that last succeeded, carried into later calls.
    pub last_credential: Option<usize>,
}

impl ScoringRun {
    pub fn records(&self) -> Vec<ScoreRecord> {
        self.items.iter().map(|item| item.record.clone()).collect()
    }

    pub fn degraded_count(&self) -> usize {
        self.items.iter().filter(|item| item.record.degraded).count()
    }
}

/// Scores items strictly in order, one dispatch per item.
pub struct ItemScorer<'a, P> {
    dispatcher: &'a Dispatcher<P>,
    prompts: &'a ScoringPrompts,
    categories: &'a [String],
}

impl<'a, P: Provider> ItemScorer<'a, P> {
    pub fn new(
        dispatcher: &'a Dispatcher<P>,
        prompts: &'a ScoringPrompts,
        categories: &'a [String],
    ) -> Self {
        Self {
            dispatcher,
            prompts,
            categories,
        }
    }

    /// Decode raw provider text into a record for `item`.
    pub fn decode_record(&self, item: &ScoringItem, raw: &str) -> Result<ScoreRecord, ScoringError> {
        let payload = decode_object(raw)?;
        Ok(score_record(item, &payload, self.categories)?)
    }

    /// Score every item. A failed item becomes a degraded record; only
    /// cancellation stops the run early.
    pub async fn score_all(&self, items: &[ScoringItem]) -> Result<ScoringRun, ScoringError> {
        let mut run = ScoringRun::default();
        let total = items.len();

        for item in items {
            if self.dispatcher.cancel_token().is_cancelled() {
                return Err(ScoringError::Cancelled);
            }
            let request = item_request(item, total, self.prompts);
            let dispatched = match self.dispatcher.generate(&request, run.last_credential).await {
                Ok(dispatched) => dispatched,
                Err(DispatchError::Cancelled) => return Err(ScoringError::Cancelled),
                Err(err) => {
                    let diagnostics = match &err {
                        DispatchError::Exhausted { diagnostics, .. } => (**diagnostics).clone(),
                        _ => DispatchDiagnostics::default(),
                    };
                    run.items.push(self.degrade(item, &err.to_string(), diagnostics));
                    continue;
                }
            };

            if dispatched.diagnostics.selected_credential.is_some() {
                run.last_credential = dispatched.diagnostics.selected_credential;
            }

            match self.decode_record(item, &dispatched.value) {
                Ok(record) => {
                    tracing::debug!(
                        index = item.index,
                        holistic = record.holistic_score,
                        model = dispatched.diagnostics.selected_model.as_deref().unwrap_or(""),
                        "item scored"
                    );
                    run.items.push(ScoredItem {
                        record,
                        diagnostics: dispatched.diagnostics,
                        failure: None,
                    });
                }
                Err(err) => {
                    let scored = self.degrade(item, &err.to_string(), dispatched.diagnostics);
                    run.items.push(scored);
                }
            }
        }

        Ok(run)
    }

    fn degrade(
        &self,
        item: &ScoringItem,
        cause: &str,
        diagnostics: DispatchDiagnostics,
    ) -> ScoredItem {
        let reason = sanitize_api_response(cause);
        let reason = truncate_str(&reason, DEGRADED_REASON_CHARS).to_string();
        tracing::warn!(index = item.index, reason = %reason, "item degraded");
        ScoredItem {
            record: ScoreRecord::degraded(item.index, item.content.clone(), self.categories, &reason),
            diagnostics,
            failure: Some(reason),
        }
    }
}
