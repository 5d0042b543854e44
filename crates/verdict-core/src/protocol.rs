use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// One chat message sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Hint about the shape the provider should answer in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormatHint {
    #[default]
    Text,
    JsonObject,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub response_format_hint: ResponseFormatHint,
}

/// A single generation request against one model identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub options: GenerateOptions,
}

impl GenerateRequest {
    /// Same request re-targeted at another model.
    pub fn for_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            messages: self.messages.clone(),
            options: self.options.clone(),
        }
    }
}

pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 400;
pub const DEFAULT_PER_ATTEMPT_TIMEOUT_MS: u64 = 7_000;

/// Retry and timeout policy for one logical call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallOptions {
    /// Extra attempts per model after the first one.
    pub retries: u32,
    /// First backoff sleep; doubles after every transient failure.
    pub initial_delay_ms: u64,
    pub per_attempt_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_model: Option<String>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            per_attempt_timeout_ms: DEFAULT_PER_ATTEMPT_TIMEOUT_MS,
            preferred_model: None,
        }
    }
}

impl CallOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_delay_ms == 0 {
            return Err("initial_delay_ms must be greater than zero".to_string());
        }
        if self.per_attempt_timeout_ms == 0 {
            return Err("per_attempt_timeout_ms must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn with_preferred_model(mut self, model: impl Into<String>) -> Self {
        self.preferred_model = Some(model.into());
        self
    }
}

/// Failure reported by a provider for one call.
///
/// This is the only error shape the dispatcher classifies, so providers must
/// put HTTP status codes in `status` rather than only in `message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
    pub timed_out: bool,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            ..Self::new(message)
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn timeout(after_ms: u64) -> Self {
        Self {
            timed_out: true,
            ..Self::new(format!("Timed out after {}ms.", after_ms))
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.status, &self.code) {
            (Some(status), _) => write!(f, "provider error {}: {}", status, self.message),
            (None, Some(code)) => write!(f, "provider error [{}]: {}", code, self.message),
            (None, None) => write!(f, "provider error: {}", self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Capability interface over a generative-model service.
///
/// `credential` is the key for this call; the dispatcher owns key and model
/// rotation, so implementations must not retry internally.
pub trait Provider: Send + Sync {
    fn generate<'a>(
        &'a self,
        credential: &'a str,
        request: &'a GenerateRequest,
    ) -> BoxFuture<'a, Result<String, ProviderError>>;
}

impl<P: Provider + ?Sized> Provider for std::sync::Arc<P> {
    fn generate<'a>(
        &'a self,
        credential: &'a str,
        request: &'a GenerateRequest,
    ) -> BoxFuture<'a, Result<String, ProviderError>> {
        (**self).generate(credential, request)
    }
}
