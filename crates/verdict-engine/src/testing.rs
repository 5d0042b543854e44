//! Deterministic fake provider for tests.

use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use verdict_core::{GenerateRequest, Provider, ProviderError};

/// One scripted provider response.
#[derive(Debug, Clone)]
pub struct Step {
    pub result: Result<String, ProviderError>,
    pub delay: Option<Duration>,
}

impl Step {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            result: Ok(content.into()),
            delay: None,
        }
    }

    pub fn fail(err: ProviderError) -> Self {
        Self {
            result: Err(err),
            delay: None,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Default)]
struct ScriptState {
    steps: VecDeque<Step>,
    fallback: Option<Step>,
    calls: Vec<(String, String)>,
    requests: Vec<GenerateRequest>,
}

/// Replays a fixed script of responses, one per call, and records every
/// `(credential, model)` pair it was asked for.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                steps: steps.into(),
                ..ScriptState::default()
            })),
        }
    }

    /// Response used once the script runs out.
    pub fn with_fallback(self, step: Step) -> Self {
        self.lock().fallback = Some(step);
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.lock().calls.clone()
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_step(&self, credential: &str, request: &GenerateRequest) -> Step {
        let mut state = self.lock();
        state
            .calls
            .push((credential.to_string(), request.model.clone()));
        state.requests.push(request.clone());
        match state.steps.pop_front() {
            Some(step) => step,
            None => state
                .fallback
                .clone()
                .unwrap_or_else(|| Step::fail(ProviderError::with_status(400, "script exhausted"))),
        }
    }
}

impl Provider for ScriptedProvider {
    fn generate<'a>(
        &'a self,
        credential: &'a str,
        request: &'a GenerateRequest,
    ) -> BoxFuture<'a, Result<String, ProviderError>> {
        let step = self.next_step(credential, request);
        Box::pin(async move {
            if let Some(delay) = step.delay {
                tokio::time::sleep(delay).await;
            }
            step.result
        })
    }
}
