//! Shared HTTP plumbing for the provider adapters.
//!
//! Only network errors and 5xx responses are retried here. 4xx responses
//! (bad key, throttling, permission) are returned at once so the loop
//! controller can rotate to another key instead of hammering this one.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::models::{DatagenError, ProviderError, Result};

/// Error envelope shared by Gemini and OpenAI-compatible APIs.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    #[serde(default)]
    pub status: Option<String>,
}

impl ApiErrorDetail {
    /// Numeric code if the provider sent one (OpenRouter embeds it in 200 bodies).
    pub fn status_code(&self) -> Option<u16> {
        match &self.code {
            Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            Some(serde_json::Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Pull a human-readable message out of an error body.
pub(crate) fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(parsed) if !parsed.error.message.is_empty() => match parsed.error.status {
            Some(status) => format!("{status}: {}", parsed.error.message),
            None => parsed.error.message,
        },
        _ => body.trim().to_string(),
    }
}

/// Map a non-success status to a typed provider error.
pub(crate) fn map_status(status: u16, body: &str) -> ProviderError {
    let message = error_message(body);
    match status {
        401 => ProviderError::AuthenticationFailed,
        403 => ProviderError::PermissionDenied(message),
        429 => ProviderError::RateLimited { message },
        // Gemini answers a malformed key with 400 INVALID_ARGUMENT
        400 if message.to_lowercase().contains("api key") => ProviderError::AuthenticationFailed,
        _ => ProviderError::ApiError { status, message },
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(2u64.pow(attempt.min(5)))
}

/// Send a request, retrying network errors and 5xx responses.
///
/// Returns the body of the first successful response.
pub(crate) async fn send_with_retries<F, Fut>(
    endpoint: &str,
    max_retries: u32,
    timeout: Duration,
    mut send: F,
) -> Result<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = reqwest::Result<reqwest::Response>>,
{
    let attempts = max_retries.max(1);
    let mut last_error: Option<DatagenError> = None;

    for attempt in 0..attempts {
        let error = match send().await {
            Ok(response) if response.status().is_success() => {
                return response.text().await.map_err(DatagenError::Network);
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                DatagenError::Provider(map_status(status, &body))
            }
            Err(e) if e.is_timeout() => DatagenError::Timeout(timeout),
            Err(e) => DatagenError::Network(e.without_url()),
        };

        if !error.is_retryable() {
            return Err(error);
        }

        if attempt + 1 < attempts {
            let wait = backoff(attempt);
            debug!(
                endpoint = endpoint,
                attempt = attempt,
                backoff_secs = wait.as_secs(),
                error = %error,
                "Retrying request"
            );
            tokio::time::sleep(wait).await;
        }
        last_error = Some(error);
    }

    Err(last_error.unwrap_or_else(|| {
        DatagenError::Provider(ProviderError::MaxRetriesExceeded {
            attempts,
            last_error: "Unknown error".to_string(),
        })
    }))
}
