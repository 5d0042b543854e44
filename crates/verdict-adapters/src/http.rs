//! OpenAI-compatible chat-completions provider.
//!
//! One HTTP request per `generate` call. Retry, backoff, and fallback belong
//! to the dispatcher, so every failure is returned as-is with whatever status
//! and code the service reported.

use anyhow::Context;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;
use verdict_core::util::{sanitize_api_response, truncate_str, MAX_ERROR_CONTENT_LEN};
use verdict_core::{
    ChatMessage, GenerateRequest, Provider, ProviderError, ResponseFormatHint,
};

/// Upper bound for one HTTP exchange; the dispatcher's per-attempt timeout
/// is normally much shorter.
const CLIENT_TIMEOUT_SECS: u64 = 60;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

impl<'a> From<&'a GenerateRequest> for ChatRequest<'a> {
    fn from(request: &'a GenerateRequest) -> Self {
        let response_format = match request.options.response_format_hint {
            ResponseFormatHint::JsonObject => Some(ResponseFormat {
                format_type: "json_object",
            }),
            ResponseFormatHint::Text => None,
        };
        Self {
            model: &request.model,
            messages: &request.messages,
            stream: false,
            temperature: request.options.temperature,
            max_tokens: request.options.max_output_tokens,
            response_format,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    /// Null when the provider refused or failed upstream.
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    /// Numeric on OpenRouter, a string on some gateways.
    #[serde(default)]
    code: Option<serde_json::Value>,
    /// Gemini-style status name such as `UNAVAILABLE`.
    #[serde(default)]
    status: Option<String>,
}

impl ApiError {
    fn into_provider_error(self, http_status: Option<u16>) -> ProviderError {
        let code = match self.code {
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            Some(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
        .or(self.status);
        let embedded_status = code
            .as_deref()
            .and_then(|c| c.parse::<u16>().ok())
            .filter(|c| (100..600).contains(c));
        ProviderError {
            status: http_status.or(embedded_status),
            code,
            message: sanitize_api_response(&self.message),
            timed_out: false,
        }
    }
}

/// Turn a response body into content or a provider error.
///
/// Some gateways report upstream failures inside a 2xx body, so the error
/// shape is checked before the success shape.
pub(crate) fn parse_chat_body(text: &str) -> Result<String, ProviderError> {
    if let Ok(body) = serde_json::from_str::<ApiErrorBody>(text) {
        return Err(body.error.into_provider_error(None));
    }
    let parsed: ChatResponse = serde_json::from_str(text).map_err(|e| {
        ProviderError::new(format!(
            "Failed to parse provider response: {} ({})",
            e,
            sanitize_api_response(text)
        ))
    })?;
    let choice = parsed.choices.into_iter().next();
    if let Some(refusal) = choice.as_ref().and_then(|c| c.message.refusal.as_deref()) {
        return Err(ProviderError::new(format!(
            "Request was refused: {}",
            truncate_str(refusal, MAX_ERROR_CONTENT_LEN)
        )));
    }
    let content = choice
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(ProviderError::new("Provider returned an empty response"));
    }
    Ok(content)
}

fn status_error(status: u16, text: &str) -> ProviderError {
    match serde_json::from_str::<ApiErrorBody>(text) {
        Ok(body) => body.error.into_provider_error(Some(status)),
        Err(_) => ProviderError::with_status(status, sanitize_api_response(text)),
    }
}

fn map_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        let mut mapped = ProviderError::new("Provider request timed out");
        mapped.timed_out = true;
        return mapped;
    }
    if err.is_connect() {
        return ProviderError::new("Could not connect to the provider. Check your network.");
    }
    ProviderError {
        status: err.status().map(|s| s.as_u16()),
        code: None,
        message: sanitize_api_response(&err.to_string()),
        timed_out: false,
    }
}

/// Chat-completions client for any OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpProvider {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            endpoint: completions_endpoint(base_url)?,
        })
    }

    async fn send(&self, credential: &str, request: &GenerateRequest) -> Result<String, ProviderError> {
        let body = ChatRequest::from(request);
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(credential)
            .header("X-Title", "verdict")
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), &text));
        }
        parse_chat_body(&text)
    }
}

impl Provider for HttpProvider {
    fn generate<'a>(
        &'a self,
        credential: &'a str,
        request: &'a GenerateRequest,
    ) -> BoxFuture<'a, Result<String, ProviderError>> {
        Box::pin(self.send(credential, request))
    }
}

/// `base_url` joined with `chat/completions`, keeping any path prefix.
pub fn completions_endpoint(base_url: &str) -> anyhow::Result<Url> {
    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let base = Url::parse(&base).with_context(|| format!("Invalid base URL '{}'", base_url))?;
    base.join("chat/completions")
        .with_context(|| format!("Invalid base URL '{}'", base_url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdict_core::GenerateOptions;

    #[test]
    fn test_endpoint_keeps_path_prefix() {
        let url = completions_endpoint("https://openrouter.ai/api/v1").unwrap();
        assert_eq!(url.as_str(), "https://openrouter.ai/api/v1/chat/completions");
        let url = completions_endpoint("http://localhost:8080/v1/").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/v1/chat/completions");
        assert!(completions_endpoint("not a url").is_err());
    }

    #[test]
    fn test_success_body_returns_content() {
        let body = r#"{"choices":[{"message":{"content":"{\"a\":1}"}}]}"#;
        assert_eq!(parse_chat_body(body).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn test_error_inside_success_body_keeps_code() {
        let body = r#"{"error":{"message":"Upstream overloaded","code":503}}"#;
        let err = parse_chat_body(body).unwrap_err();
        assert_eq!(err.code.as_deref(), Some("503"));
        assert_eq!(err.status, Some(503));
    }

    #[test]
    fn test_string_status_code_is_kept() {
        let body = r#"{"error":{"message":"try later","status":"UNAVAILABLE"}}"#;
        let err = parse_chat_body(body).unwrap_err();
        assert_eq!(err.code.as_deref(), Some("UNAVAILABLE"));
        assert_eq!(err.status, None);
    }

    #[test]
    fn test_refusal_and_empty_content_are_errors() {
        let refused = r#"{"choices":[{"message":{"content":null,"refusal":"policy"}}]}"#;
        let err = parse_chat_body(refused).unwrap_err();
        assert!(err.message.contains("refused"));
        assert_eq!(err.status, None);

        let empty = r#"{"choices":[{"message":{"content":"   "}}]}"#;
        assert!(parse_chat_body(empty).is_err());
        assert!(parse_chat_body(r#"{"choices":[]}"#).is_err());
    }

    #[test]
    fn test_non_success_status_is_preserved() {
        let err = status_error(429, r#"{"error":{"message":"Rate limit exceeded","code":429}}"#);
        assert_eq!(err.status, Some(429));
        assert_eq!(err.message, "Rate limit exceeded");

        let err = status_error(502, "<html>bad gateway</html>");
        assert_eq!(err.status, Some(502));
        assert!(err.code.is_none());
    }

    #[test]
    fn test_request_body_shape() {
        let request = GenerateRequest {
            model: "m1".to_string(),
            messages: vec![ChatMessage::system("rules"), ChatMessage::user("item")],
            options: GenerateOptions {
                temperature: Some(0.5),
                max_output_tokens: None,
                response_format_hint: ResponseFormatHint::JsonObject,
            },
        };
        let value = serde_json::to_value(ChatRequest::from(&request)).unwrap();
        assert_eq!(value["model"], "m1");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["temperature"], 0.5);
        assert!(value.get("max_tokens").is_none());
    }
}
