use verdict_core::ProviderError;

/// How the dispatcher treats one failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Expected to clear after a short wait: retry the same model.
    Transient,
    /// The credential itself was rejected; every model behind it will fail too.
    Unauthorized,
    /// Specific to this model: move on without spending backoff.
    Fatal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::Fatal => "fatal",
        }
    }
}

const TRANSIENT_MARKERS: [&str; 2] = ["overloaded", "unavailable"];

/// Classify a provider failure into a closed set of kinds.
///
/// Transient: timeouts, status 503, or an "overloaded"/"UNAVAILABLE" marker in
/// the message or error code. Unauthorized: 401 or 403. Everything else is fatal
/// for the model that produced it.
pub fn classify(err: &ProviderError) -> FailureKind {
    if err.timed_out || err.status == Some(503) {
        return FailureKind::Transient;
    }
    let lower = err.message.to_ascii_lowercase();
    let code = err
        .code
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if code == "503"
        || TRANSIENT_MARKERS
            .iter()
            .any(|marker| lower.contains(marker) || code.contains(marker))
    {
        return FailureKind::Transient;
    }
    if matches!(err.status, Some(401) | Some(403)) {
        return FailureKind::Unauthorized;
    }
    FailureKind::Fatal
}

/// Short label for why a credential was skipped, used in diagnostics only.
/// Every failure advances to the next key regardless of label.
pub fn credential_failure_label(err: &ProviderError) -> &'static str {
    if err.timed_out {
        return "timeout";
    }
    match err.status {
        Some(429) => "rate_limited",
        Some(401) | Some(403) => "unauthorized",
        Some(status) if status >= 500 => "server_error",
        Some(_) => "rejected",
        None => "network_error",
    }
}
