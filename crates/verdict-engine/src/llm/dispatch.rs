//! Request dispatch with retry, backoff, per-attempt timeouts, and fallback.
//!
//! Two loops share one attempt runner:
//! - model fallback walks a [`CandidateList`], retrying transient failures on
//!   the same model with doubling backoff and moving on after fatal ones;
//! - key fallback walks a [`CredentialSet`], issuing one request per key and
//!   advancing on any failure.
//!
//! [`Dispatcher`] nests the two (keys outside, models inside) for the scorer.

use super::candidates::{resolve_candidates, CandidateList, CredentialSet};
use super::classify::{classify, credential_failure_label, FailureKind};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use verdict_core::util::{sanitize_api_response, truncate_str};
use verdict_core::{CallOptions, GenerateRequest, Provider, ProviderError};

const ERROR_TAIL_CHARS: usize = 240;

/// Result of a single attempt.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    TransientFailure(ProviderError),
    FatalFailure(ProviderError),
}

impl<T> AttemptOutcome<T> {
    fn from_result(result: Result<T, ProviderError>) -> Self {
        match result {
            Ok(value) => AttemptOutcome::Success(value),
            Err(err) => match classify(&err) {
                FailureKind::Transient => AttemptOutcome::TransientFailure(err),
                FailureKind::Unauthorized | FailureKind::Fatal => AttemptOutcome::FatalFailure(err),
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("all {tried} candidates exhausted; last error: {last_cause}")]
    Exhausted {
        tried: usize,
        last_cause: ProviderError,
        diagnostics: Box<DispatchDiagnostics>,
    },
    #[error("dispatch cancelled")]
    Cancelled,
    #[error("no candidates to dispatch to")]
    EmptyCandidates,
}

/// Per-attempt record kept for transparency when something fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptDiagnostics {
    pub identifier: String,
    #[serde(default)]
    pub credential_slot: Option<usize>,
    pub attempt: u32,
    pub outcome_kind: String,
    pub elapsed_ms: u64,
    /// Backoff slept after this attempt before retrying the same model.
    #[serde(default)]
    pub backoff_ms: Option<u64>,
    #[serde(default)]
    pub error_tail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchDiagnostics {
    #[serde(default)]
    pub attempts: Vec<AttemptDiagnostics>,
    #[serde(default)]
    pub selected_model: Option<String>,
    #[serde(default)]
    pub selected_credential: Option<usize>,
}

impl DispatchDiagnostics {
    /// Backoff sleeps in the order they happened.
    pub fn backoffs(&self) -> Vec<u64> {
        self.attempts.iter().filter_map(|a| a.backoff_ms).collect()
    }
}

/// A successful dispatch plus how it got there.
#[derive(Debug)]
pub struct Dispatched<T> {
    pub value: T,
    pub diagnostics: DispatchDiagnostics,
}

fn error_tail(err: &ProviderError) -> String {
    truncate_str(&sanitize_api_response(&err.to_string()), ERROR_TAIL_CHARS).to_string()
}

/// Race one attempt against its timeout and the cancellation token.
/// Returns `None` when cancelled.
async fn run_attempt<T, Fut>(
    fut: Fut,
    timeout_ms: u64,
    cancel: &CancellationToken,
) -> Option<AttemptOutcome<T>>
where
    Fut: Future<Output = Result<T, ProviderError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = tokio::time::timeout(Duration::from_millis(timeout_ms), fut) => {
            Some(match result {
                Ok(inner) => AttemptOutcome::from_result(inner),
                Err(_) => AttemptOutcome::TransientFailure(ProviderError::timeout(timeout_ms)),
            })
        }
    }
}

/// Sleep for `delay_ms` unless cancelled first. Returns `false` when cancelled.
async fn backoff(delay_ms: u64, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}

/// Whether a failure condemns the credential rather than the model.
///
/// Only meaningful when the loop runs under a credential slot: a rejected or
/// throttled key fails the same way for every model behind it.
fn rejects_credential(kind: FailureKind, err: &ProviderError) -> bool {
    kind == FailureKind::Unauthorized || err.status == Some(429)
}

/// Outcome of the inner model loop when nothing succeeded.
struct ModelsExhausted {
    tried: usize,
    last_cause: ProviderError,
    credential_rejected: bool,
}

enum ModelLoopError {
    Exhausted(ModelsExhausted),
    Cancelled,
}

async fn run_model_loop<T, F, Fut>(
    candidates: &CandidateList,
    options: &CallOptions,
    cancel: &CancellationToken,
    credential_slot: Option<usize>,
    diagnostics: &mut DispatchDiagnostics,
    make_request: &mut F,
) -> Result<T, ModelLoopError>
where
    F: FnMut(&str) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut tried = 0usize;
    let mut last_cause: Option<ProviderError> = None;
    let mut credential_rejected = false;
    let max_attempts = options.retries.saturating_add(1);

    'models: for model in candidates {
        tried += 1;
        let mut delay_ms = options.initial_delay_ms;

        for attempt in 1..=max_attempts {
            let start = Instant::now();
            let outcome = run_attempt(
                make_request(model.as_str()),
                options.per_attempt_timeout_ms,
                cancel,
            )
            .await
            .ok_or(ModelLoopError::Cancelled)?;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match outcome {
                AttemptOutcome::Success(value) => {
                    tracing::debug!(model = %model, attempt, elapsed_ms, "attempt succeeded");
                    diagnostics.attempts.push(AttemptDiagnostics {
                        identifier: model.clone(),
                        credential_slot,
                        attempt,
                        outcome_kind: "success".to_string(),
                        elapsed_ms,
                        backoff_ms: None,
                        error_tail: None,
                    });
                    diagnostics.selected_model = Some(model.clone());
                    diagnostics.selected_credential = credential_slot;
                    return Ok(value);
                }
                AttemptOutcome::TransientFailure(err) => {
                    let retry = attempt < max_attempts;
                    tracing::warn!(
                        model = %model,
                        attempt,
                        retry,
                        error = %error_tail(&err),
                        "transient provider failure"
                    );
                    diagnostics.attempts.push(AttemptDiagnostics {
                        identifier: model.clone(),
                        credential_slot,
                        attempt,
                        outcome_kind: (if err.timed_out { "timeout" } else { "transient" })
                            .to_string(),
                        elapsed_ms,
                        backoff_ms: retry.then_some(delay_ms),
                        error_tail: Some(error_tail(&err)),
                    });
                    last_cause = Some(err);
                    if !retry {
                        break;
                    }
                    if !backoff(delay_ms, cancel).await {
                        return Err(ModelLoopError::Cancelled);
                    }
                    delay_ms = delay_ms.saturating_mul(2);
                }
                AttemptOutcome::FatalFailure(err) => {
                    let kind = classify(&err);
                    tracing::warn!(
                        model = %model,
                        attempt,
                        kind = kind.as_str(),
                        error = %error_tail(&err),
                        "provider failure, moving to next candidate"
                    );
                    diagnostics.attempts.push(AttemptDiagnostics {
                        identifier: model.clone(),
                        credential_slot,
                        attempt,
                        outcome_kind: kind.as_str().to_string(),
                        elapsed_ms,
                        backoff_ms: None,
                        error_tail: Some(error_tail(&err)),
                    });
                    let rejected = credential_slot.is_some() && rejects_credential(kind, &err);
                    last_cause = Some(err);
                    if rejected {
                        credential_rejected = true;
                        break 'models;
                    }
                    break;
                }
            }
        }
    }

    Err(ModelLoopError::Exhausted(ModelsExhausted {
        tried,
        last_cause: last_cause.unwrap_or_else(|| ProviderError::new("no attempts were made")),
        credential_rejected,
    }))
}

/// Model-fallback dispatch over `candidates`.
///
/// Each model gets up to `retries + 1` attempts. Transient failures sleep and
/// retry the same model with a doubling delay; any other failure abandons the
/// model at once. The first success short-circuits the remaining models.
pub async fn dispatch_models<T, F, Fut>(
    candidates: &CandidateList,
    options: &CallOptions,
    cancel: &CancellationToken,
    mut make_request: F,
) -> Result<Dispatched<T>, DispatchError>
where
    F: FnMut(&str) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    if candidates.is_empty() {
        return Err(DispatchError::EmptyCandidates);
    }
    let mut diagnostics = DispatchDiagnostics::default();
    match run_model_loop(
        candidates,
        options,
        cancel,
        None,
        &mut diagnostics,
        &mut make_request,
    )
    .await
    {
        Ok(value) => Ok(Dispatched { value, diagnostics }),
        Err(ModelLoopError::Cancelled) => Err(DispatchError::Cancelled),
        Err(ModelLoopError::Exhausted(exhausted)) => Err(DispatchError::Exhausted {
            tried: exhausted.tried,
            last_cause: exhausted.last_cause,
            diagnostics: Box::new(diagnostics),
        }),
    }
}

/// Key-fallback dispatch over `credentials`, starting from `preferred`.
///
/// One request per key; rate limits, server errors, auth failures, timeouts,
/// and any other non-success all advance to the next key.
pub async fn dispatch_keys<T, F, Fut>(
    credentials: &CredentialSet,
    preferred: Option<usize>,
    options: &CallOptions,
    cancel: &CancellationToken,
    mut make_request: F,
) -> Result<Dispatched<T>, DispatchError>
where
    F: FnMut(&str) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut diagnostics = DispatchDiagnostics::default();
    let mut last_cause: Option<ProviderError> = None;
    let mut tried = 0usize;

    for slot in credentials.prioritized(preferred) {
        let Some(key) = credentials.get(slot) else {
            continue;
        };
        tried += 1;
        let start = Instant::now();
        let outcome = run_attempt(make_request(key), options.per_attempt_timeout_ms, cancel)
            .await
            .ok_or(DispatchError::Cancelled)?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            AttemptOutcome::Success(value) => {
                diagnostics.attempts.push(AttemptDiagnostics {
                    identifier: format!("key#{}", slot),
                    credential_slot: Some(slot),
                    attempt: 1,
                    outcome_kind: "success".to_string(),
                    elapsed_ms,
                    backoff_ms: None,
                    error_tail: None,
                });
                diagnostics.selected_credential = Some(slot);
                return Ok(Dispatched { value, diagnostics });
            }
            AttemptOutcome::TransientFailure(err) | AttemptOutcome::FatalFailure(err) => {
                let label = credential_failure_label(&err);
                tracing::warn!(slot, reason = label, "credential failed, advancing to next key");
                diagnostics.attempts.push(AttemptDiagnostics {
                    identifier: format!("key#{}", slot),
                    credential_slot: Some(slot),
                    attempt: 1,
                    outcome_kind: label.to_string(),
                    elapsed_ms,
                    backoff_ms: None,
                    error_tail: Some(error_tail(&err)),
                });
                last_cause = Some(err);
            }
        }
    }

    Err(DispatchError::Exhausted {
        tried,
        last_cause: last_cause.unwrap_or_else(|| ProviderError::new("no credentials were tried")),
        diagnostics: Box::new(diagnostics),
    })
}

/// Model identifiers a dispatcher resolves its candidate list from.
#[derive(Debug, Clone, Default)]
pub struct ModelSources {
    pub runtime_override: Option<String>,
    pub env_default: Option<String>,
    pub builtins: Vec<String>,
}

/// Keys outside, models inside: the composite dispatch used for scoring.
///
/// Holds only immutable configuration; per-call iteration state lives on the
/// stack of each `generate` call.
pub struct Dispatcher<P> {
    provider: P,
    credentials: CredentialSet,
    models: ModelSources,
    options: CallOptions,
    cancel: CancellationToken,
}

impl<P: Provider> Dispatcher<P> {
    pub fn new(
        provider: P,
        credentials: CredentialSet,
        models: ModelSources,
        options: CallOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            credentials,
            models,
            options,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Candidate list for one call, rebuilt every time.
    pub fn candidates(&self) -> CandidateList {
        resolve_candidates(
            self.options.preferred_model.as_deref(),
            self.models.runtime_override.as_deref(),
            self.models.env_default.as_deref(),
            &self.models.builtins,
        )
    }

    /// Run `request` (its `model` is replaced per candidate) until one
    /// key/model pair succeeds. `preferred_key` is tried first when set.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
        preferred_key: Option<usize>,
    ) -> Result<Dispatched<String>, DispatchError> {
        let candidates = self.candidates();
        if candidates.is_empty() {
            return Err(DispatchError::EmptyCandidates);
        }

        let mut diagnostics = DispatchDiagnostics::default();
        let mut tried = 0usize;
        let mut last_cause: Option<ProviderError> = None;

        for slot in self.credentials.prioritized(preferred_key) {
            let Some(key) = self.credentials.get(slot) else {
                continue;
            };
            let provider = &self.provider;
            let mut make_request = |model: &str| {
                let request = request.for_model(model);
                async move { provider.generate(key, &request).await }
            };
            match run_model_loop(
                &candidates,
                &self.options,
                &self.cancel,
                Some(slot),
                &mut diagnostics,
                &mut make_request,
            )
            .await
            {
                Ok(value) => return Ok(Dispatched { value, diagnostics }),
                Err(ModelLoopError::Cancelled) => return Err(DispatchError::Cancelled),
                Err(ModelLoopError::Exhausted(exhausted)) => {
                    tracing::warn!(
                        slot,
                        credential_rejected = exhausted.credential_rejected,
                        "all models failed for credential, advancing to next key"
                    );
                    tried += exhausted.tried;
                    last_cause = Some(exhausted.last_cause);
                }
            }
        }

        Err(DispatchError::Exhausted {
            tried,
            last_cause: last_cause.unwrap_or_else(|| ProviderError::new("no credentials were tried")),
            diagnostics: Box::new(diagnostics),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedProvider, Step};
    use std::cell::RefCell;
    use verdict_core::{ChatMessage, GenerateOptions};

    fn candidates(ids: &[&str]) -> CandidateList {
        let builtins: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        resolve_candidates(None, None, None, &builtins)
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            model: String::new(),
            messages: vec![ChatMessage::user("score this")],
            options: GenerateOptions::default(),
        }
    }

    /// Closure-driven fake: pops one scripted result per call and logs the model.
    fn scripted(
        script: Vec<Result<&'static str, ProviderError>>,
    ) -> (
        RefCell<std::collections::VecDeque<Result<&'static str, ProviderError>>>,
        RefCell<Vec<String>>,
    ) {
        (RefCell::new(script.into()), RefCell::new(Vec::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retry_same_model_with_doubling_backoff() {
        let (script, calls) = scripted(vec![
            Err(ProviderError::with_status(503, "overloaded")),
            Err(ProviderError::with_status(503, "overloaded")),
            Ok("done"),
        ]);
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        let result = dispatch_models(
            &candidates(&["A", "B"]),
            &CallOptions::default(),
            &cancel,
            |model| {
                calls.borrow_mut().push(model.to_string());
                let next = script.borrow_mut().pop_front().unwrap();
                async move { next }
            },
        )
        .await
        .unwrap();

        assert_eq!(result.value, "done");
        assert_eq!(*calls.borrow(), vec!["A", "A", "A"]);
        let backoffs = result.diagnostics.backoffs();
        assert_eq!(backoffs.len(), 2);
        assert!(backoffs[1] >= backoffs[0] * 2);
        assert!(start.elapsed() >= Duration::from_millis(400 + 800));
        assert_eq!(result.diagnostics.selected_model.as_deref(), Some("A"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_skips_remaining_retries() {
        let (script, calls) = scripted(vec![
            Err(ProviderError::with_status(400, "bad request")),
            Ok("from B"),
        ]);
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        let result = dispatch_models(
            &candidates(&["A", "B"]),
            &CallOptions::default(),
            &cancel,
            |model| {
                calls.borrow_mut().push(model.to_string());
                let next = script.borrow_mut().pop_front().unwrap();
                async move { next }
            },
        )
        .await
        .unwrap();

        assert_eq!(result.value, "from B");
        assert_eq!(*calls.borrow(), vec!["A", "B"]);
        assert!(result.diagnostics.backoffs().is_empty());
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_tried_count_and_last_cause() {
        let (script, _calls) = scripted(vec![
            Err(ProviderError::with_status(400, "first")),
            Err(ProviderError::with_status(404, "second")),
        ]);
        let cancel = CancellationToken::new();

        let err = dispatch_models(
            &candidates(&["A", "B"]),
            &CallOptions::default(),
            &cancel,
            |_model| {
                let next = script.borrow_mut().pop_front().unwrap();
                async move { next.map(|s| s.to_string()) }
            },
        )
        .await
        .unwrap_err();

        match err {
            DispatchError::Exhausted {
                tried, last_cause, ..
            } => {
                assert_eq!(tried, 2);
                assert_eq!(last_cause.status, Some(404));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_attempt_timeout_is_transient() {
        let calls = RefCell::new(0u32);
        let cancel = CancellationToken::new();
        let options = CallOptions {
            retries: 1,
            per_attempt_timeout_ms: 6_000,
            ..CallOptions::default()
        };

        let result = dispatch_models(&candidates(&["slow"]), &options, &cancel, |_model| {
            *calls.borrow_mut() += 1;
            let first = *calls.borrow() == 1;
            async move {
                if first {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok::<_, ProviderError>("late but fine")
            }
        })
        .await
        .unwrap();

        assert_eq!(result.value, "late but fine");
        assert_eq!(result.diagnostics.attempts[0].outcome_kind, "timeout");
        assert_eq!(*calls.borrow(), 2);
    }

    #[tokio::test]
    async fn test_empty_candidate_list_is_rejected() {
        let cancel = CancellationToken::new();
        let err = dispatch_models(
            &candidates(&[]),
            &CallOptions::default(),
            &cancel,
            |_model| async { Ok::<_, ProviderError>(()) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DispatchError::EmptyCandidates));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let options = CallOptions {
            initial_delay_ms: 10_000,
            ..CallOptions::default()
        };
        let start = tokio::time::Instant::now();

        let err = dispatch_models(&candidates(&["A"]), &options, &cancel, |_model| async {
            Err::<(), _>(ProviderError::with_status(503, "overloaded"))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, DispatchError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = dispatch_models(&candidates(&["A"]), &CallOptions::default(), &cancel, |_m| async {
            Ok::<_, ProviderError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_fallback_advances_on_any_failure() {
        let (script, calls) = scripted(vec![
            Err(ProviderError::with_status(429, "rate limited")),
            Err(ProviderError::with_status(401, "bad key")),
            Err(ProviderError::with_status(500, "internal")),
            Err(ProviderError::new("connection reset by peer")),
            Err(ProviderError::with_status(418, "teapot")),
            Ok("k6 works"),
        ]);
        let keys = CredentialSet::new(["k1", "k2", "k3", "k4", "k5", "k6"]).unwrap();
        let cancel = CancellationToken::new();

        let result = dispatch_keys(&keys, None, &CallOptions::default(), &cancel, |key| {
            calls.borrow_mut().push(key.to_string());
            let next = script.borrow_mut().pop_front().unwrap();
            async move { next }
        })
        .await
        .unwrap();

        assert_eq!(result.value, "k6 works");
        assert_eq!(*calls.borrow(), vec!["k1", "k2", "k3", "k4", "k5", "k6"]);
        assert_eq!(result.diagnostics.selected_credential, Some(5));
        assert!(result.diagnostics.backoffs().is_empty());
        let labels: Vec<&str> = result
            .diagnostics
            .attempts
            .iter()
            .map(|a| a.outcome_kind.as_str())
            .collect();
        assert_eq!(
            labels,
            vec![
                "rate_limited",
                "unauthorized",
                "server_error",
                "network_error",
                "rejected",
                "success"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_fallback_starts_from_preferred_slot() {
        let keys = CredentialSet::new(["k1", "k2"]).unwrap();
        let cancel = CancellationToken::new();
        let calls = RefCell::new(Vec::new());

        let result = dispatch_keys(&keys, Some(1), &CallOptions::default(), &cancel, |key| {
            calls.borrow_mut().push(key.to_string());
            async { Ok::<_, ProviderError>("ok") }
        })
        .await
        .unwrap();

        assert_eq!(result.value, "ok");
        assert_eq!(*calls.borrow(), vec!["k2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatcher_abandons_key_after_unauthorized() {
        let provider = ScriptedProvider::new(vec![
            Step::fail(ProviderError::with_status(401, "invalid key")),
            Step::ok("{\"ok\":true}"),
        ]);
        let keys = CredentialSet::new(["bad", "good"]).unwrap();
        let dispatcher = Dispatcher::new(
            provider.clone(),
            keys,
            ModelSources {
                builtins: vec!["m1".to_string(), "m2".to_string()],
                ..ModelSources::default()
            },
            CallOptions::default(),
            CancellationToken::new(),
        );

        let result = dispatcher.generate(&request(), None).await.unwrap();

        assert_eq!(result.value, "{\"ok\":true}");
        assert_eq!(result.diagnostics.selected_credential, Some(1));
        assert_eq!(
            provider.calls(),
            vec![
                ("bad".to_string(), "m1".to_string()),
                ("good".to_string(), "m1".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatcher_prefers_explicit_model() {
        let provider = ScriptedProvider::new(vec![Step::ok("{}")]);
        let dispatcher = Dispatcher::new(
            provider.clone(),
            CredentialSet::new(["k"]).unwrap(),
            ModelSources {
                runtime_override: Some("override".to_string()),
                env_default: Some("env".to_string()),
                builtins: vec!["builtin".to_string()],
            },
            CallOptions::default().with_preferred_model("preferred"),
            CancellationToken::new(),
        );

        assert_eq!(
            dispatcher.candidates().as_slice(),
            &["preferred", "override", "env", "builtin"]
        );
        dispatcher.generate(&request(), None).await.unwrap();
        assert_eq!(provider.calls()[0].1, "preferred");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatcher_abandons_throttled_key() {
        let provider = ScriptedProvider::new(vec![
            Step::fail(ProviderError::with_status(429, "rate limit exceeded")),
            Step::ok("{\"ok\":true}"),
        ]);
        let dispatcher = Dispatcher::new(
            provider.clone(),
            CredentialSet::new(["k1", "k2"]).unwrap(),
            ModelSources {
                builtins: vec!["m1".to_string(), "m2".to_string(), "m3".to_string()],
                ..ModelSources::default()
            },
            CallOptions::default(),
            CancellationToken::new(),
        );

        let result = dispatcher.generate(&request(), None).await.unwrap();

        assert_eq!(result.diagnostics.selected_credential, Some(1));
        assert_eq!(
            provider.calls(),
            vec![
                ("k1".to_string(), "m1".to_string()),
                ("k2".to_string(), "m1".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_model_is_skipped_without_credential_loop() {
        let (script, calls) = scripted(vec![
            Err(ProviderError::with_status(429, "quota")),
            Ok("from B"),
        ]);
        let cancel = CancellationToken::new();

        let result = dispatch_models(
            &candidates(&["A", "B"]),
            &CallOptions::default(),
            &cancel,
            |model| {
                calls.borrow_mut().push(model.to_string());
                let next = script.borrow_mut().pop_front().unwrap();
                async move { next }
            },
        )
        .await
        .unwrap();

        assert_eq!(result.value, "from B");
        assert_eq!(*calls.borrow(), vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatcher_retries_slow_model_after_timeout() {
        let provider = ScriptedProvider::new(vec![
            Step::ok("{\"late\":true}").after(Duration::from_secs(30)),
            Step::ok("{\"ok\":true}"),
        ]);
        let dispatcher = Dispatcher::new(
            provider.clone(),
            CredentialSet::new(["k1"]).unwrap(),
            ModelSources {
                builtins: vec!["m1".to_string(), "m2".to_string()],
                ..ModelSources::default()
            },
            CallOptions::default(),
            CancellationToken::new(),
        );
        let start = tokio::time::Instant::now();

        let result = dispatcher.generate(&request(), None).await.unwrap();

        assert_eq!(result.value, "{\"ok\":true}");
        assert_eq!(result.diagnostics.attempts[0].outcome_kind, "timeout");
        assert_eq!(result.diagnostics.selected_model.as_deref(), Some("m1"));
        assert_eq!(
            provider.calls(),
            vec![
                ("k1".to_string(), "m1".to_string()),
                ("k1".to_string(), "m1".to_string()),
            ]
        );
        assert!(start.elapsed() < Duration::from_secs(30));
    }
}
