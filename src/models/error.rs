//! Error types for datagenius.
//!
//! Failure taxonomy as seen by the generation loop:
//! - Validation: preconditions of `start`/`modify` not met, nothing happens
//! - Credential-class: the active key was rejected or throttled, rotate
//! - Transient: anything else, back off and resume automatically

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Top-level error type for datagenius.
#[derive(Debug, Error)]
pub enum DatagenError {
    // ═══════════════════════════════════════════════════════════════════
    // Caller mistakes (surfaced immediately, no state change)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No valid API keys available")]
    NoValidCredentials,

    #[error("Parse error: {0}")]
    ParseError(String),

    // ═══════════════════════════════════════════════════════════════════
    // Remote failures (classified by the loop controller)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("All provided API keys seem to be failing. Stopping generation.")]
    Exhausted { failing: usize, valid: usize },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Provider-specific errors (Gemini and OpenRouter).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Rate limited (429): {message}")]
    RateLimited { message: String },

    #[error("Skipping empty API key in slot {slot}")]
    EmptyCredential { slot: usize },

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Entry violates shape rules: {0}")]
    InvalidEntry(String),

    #[error("Request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

/// How the loop controller reacts to a failed generation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Key rejected, throttled or empty: rotate to the next valid slot.
    Credential,
    /// Anything else: pause with a countdown, then resume.
    Transient,
}

static CREDENTIAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)api[ _-]?key|invalid key|\b429\b|rate[ -]?limit|permission denied|quota")
        .expect("credential pattern is a valid regex")
});

/// Message-based fallback for errors that arrive untyped.
pub fn mentions_credential_problem(message: &str) -> bool {
    CREDENTIAL_PATTERN.is_match(message)
}

impl DatagenError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Classify a generation failure.
    ///
    /// Typed variants decide first; the rendered message is only consulted
    /// for errors that carry no status (free-form provider text). Errors
    /// about the model's own output never reach the message check, since
    /// they quote generated text.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::ParseError(_)
            | Self::Provider(ProviderError::InvalidEntry(_) | ProviderError::InvalidResponse(_)) => {
                FailureClass::Transient
            }
            Self::NoValidCredentials
            | Self::Provider(
                ProviderError::AuthenticationFailed
                | ProviderError::PermissionDenied(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::EmptyCredential { .. },
            )
            | Self::Provider(ProviderError::ApiError {
                status: 401 | 403 | 429,
                ..
            }) => FailureClass::Credential,
            other if mentions_credential_problem(&other.to_string()) => FailureClass::Credential,
            _ => FailureClass::Transient,
        }
    }

    /// Check if the HTTP layer should retry this error on the same key.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) => true,
            Self::Provider(ProviderError::ApiError { status, .. }) => *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for datagenius.
pub type Result<T> = std::result::Result<T, DatagenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_credential_failures_rotate() {
        let cases = [
            DatagenError::Provider(ProviderError::AuthenticationFailed),
            DatagenError::Provider(ProviderError::PermissionDenied("nope".into())),
            DatagenError::Provider(ProviderError::RateLimited {
                message: "slow down".into(),
            }),
            DatagenError::Provider(ProviderError::EmptyCredential { slot: 2 }),
            DatagenError::Provider(ProviderError::ApiError {
                status: 403,
                message: "forbidden".into(),
            }),
        ];
        for err in cases {
            assert_eq!(err.failure_class(), FailureClass::Credential, "{err}");
        }
    }

    #[test]
    fn message_patterns_rotate() {
        for msg in [
            "429 rate limit",
            "API key not valid. Please pass a valid API key.",
            "Permission denied on resource",
            "Resource has been exhausted (e.g. check quota).",
        ] {
            let err = DatagenError::Provider(ProviderError::ApiError {
                status: 400,
                message: msg.into(),
            });
            assert_eq!(err.failure_class(), FailureClass::Credential, "{msg}");
        }
    }

    #[test]
    fn other_failures_back_off() {
        let err = DatagenError::Provider(ProviderError::ApiError {
            status: 500,
            message: "upstream exploded".into(),
        });
        assert_eq!(err.failure_class(), FailureClass::Transient);
        assert!(err.is_retryable());

        let err = DatagenError::Provider(ProviderError::InvalidEntry("missing marker".into()));
        assert_eq!(err.failure_class(), FailureClass::Transient);
        assert!(!err.is_retryable());
    }

    #[test]
    fn bad_model_output_backs_off_whatever_it_says() {
        let quoted = "You have used 80% of your quota. Check the API key page, 429 rate limit.";
        let cases = [
            DatagenError::Provider(ProviderError::InvalidEntry(format!(
                "output must address the user as 'boss': {quoted:?}"
            ))),
            DatagenError::Provider(ProviderError::InvalidResponse(quoted.to_string())),
            DatagenError::ParseError(quoted.to_string()),
        ];
        for err in cases {
            assert!(mentions_credential_problem(&err.to_string()));
            assert_eq!(err.failure_class(), FailureClass::Transient, "{err}");
        }
    }

    #[test]
    fn unrelated_numbers_are_not_rate_limits() {
        assert!(!mentions_credential_problem("expected 4290 tokens"));
        assert!(mentions_credential_problem("HTTP 429 Too Many Requests"));
    }
}
