//! Shared disposition of external-call failures.
//!
//! Both the prover client and the settlement paths funnel their HTTP
//! results through [`classify_response`], so the retry/fatal decision is a
//! pure function of the response and can be tested as a matrix.

use serde::Deserialize;

/// Disposition of one external call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    /// Transient; bounded retry with backoff.
    Retry { reason: String },
    /// Well-formed rejection that cannot succeed on retry.
    Fatal { reason: String },
}

/// A failed external call, carrying the retry decision with it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct CallFailure {
    pub reason: String,
    pub retryable: bool,
}

impl CallFailure {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: true,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: false,
        }
    }
}

impl CallOutcome {
    pub fn into_failure(self) -> Option<CallFailure> {
        match self {
            Self::Success => None,
            Self::Retry { reason } => Some(CallFailure::retryable(reason)),
            Self::Fatal { reason } => Some(CallFailure::fatal(reason)),
        }
    }
}

/// Error envelope used by both the prover API and the relay.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    retryable: Option<bool>,
}

/// Classify an HTTP response. 2xx is success; 429 and 5xx are transient, as
/// is any body carrying `retryable: true`; every other 4xx is fatal with the
/// body's error message passed through [`describe_failure`].
pub fn classify_response(status: u16, body: &str) -> CallOutcome {
    if (200..300).contains(&status) {
        return CallOutcome::Success;
    }

    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed.error.unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            format!("HTTP {status}")
        } else {
            trimmed.to_string()
        }
    });

    if status == 429 || status >= 500 || parsed.retryable == Some(true) {
        return CallOutcome::Retry { reason: message };
    }

    CallOutcome::Fatal {
        reason: describe_failure(&message),
    }
}

/// Transport-level failures (no HTTP status at all) are always retryable.
pub fn classify_transport(err: &reqwest::Error) -> CallFailure {
    if err.is_timeout() {
        return CallFailure::retryable("request timed out");
    }
    if err.is_connect() {
        return CallFailure::retryable(CONNECTIVITY_HINT);
    }
    CallFailure::retryable(err.to_string())
}

pub const CONNECTIVITY_HINT: &str =
    "network request failed: check connectivity and the configured endpoint URL";

/// Operator-facing text for the score contract's rejection codes.
pub fn contract_error_text(code: u32) -> Option<&'static str> {
    match code {
        1 => Some("journal payload length is invalid for the current encoding"),
        2 => Some("rules digest mismatch: the proof was built against a different ruleset than the on-chain policy"),
        3 => Some("this journal has already been claimed"),
        4 => Some("zero-score proofs are not eligible for minting"),
        5 => Some("score did not improve over the claimant's existing best"),
        _ => None,
    }
}

/// Map a raw rejection message to actionable text: decoded contract error
/// codes get the table above, network-layer phrasing gets a connectivity
/// hint, anything else passes through unmodified.
pub fn describe_failure(message: &str) -> String {
    if let Some(code) = contract_error_code(message) {
        return contract_error_text(code)
            .map(str::to_string)
            .unwrap_or_else(|| format!("contract rejected the claim (code #{code})"));
    }
    if is_network_failure(message) {
        return CONNECTIVITY_HINT.to_string();
    }
    message.to_string()
}

/// Extract `N` from messages shaped like `Error(Contract, #N)`.
fn contract_error_code(message: &str) -> Option<u32> {
    let idx = message.find("Error(Contract, #")?;
    let digits: String = message[idx + "Error(Contract, #".len()..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

fn is_network_failure(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("failed to fetch")
        || lowered.contains("error sending request")
        || lowered.contains("connection refused")
        || lowered.contains("dns error")
}
