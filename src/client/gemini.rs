//! Google Generative Language (Gemini) client.
//!
//! Uses `generateContent` with `responseMimeType: application/json`. The key
//! travels in the `x-goog-api-key` header so it never ends up in a logged URL.

use std::time::{Duration, Instant};

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::send_with_retries;
use super::llm_client::CompletionResponse;
use crate::models::{DatagenError, GeminiConfig, ProviderError, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationSettings,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DatagenError::Network)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
            max_retries: config.max_retries,
        })
    }

    pub fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{model}:generateContent", self.base_url)
    }

    /// Send a single-turn prompt and return the first candidate's text.
    pub async fn generate_content(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
        temperature: Option<f64>,
    ) -> Result<CompletionResponse> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::AuthenticationFailed.into());
        }

        let start = Instant::now();
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationSettings {
                temperature,
                response_mime_type: "application/json",
            },
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let key = HeaderValue::from_str(api_key)
            .map_err(|_| DatagenError::Provider(ProviderError::AuthenticationFailed))?;
        headers.insert("x-goog-api-key", key);

        let url = self.endpoint(model);
        let body = send_with_retries("gemini", self.max_retries, self.timeout, || {
            self.client
                .post(&url)
                .headers(headers.clone())
                .json(&request)
                .send()
        })
        .await?;

        let response = parse_generate_response(&body, model)?;
        debug!(
            model = %response.model,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Gemini completion received"
        );
        Ok(CompletionResponse {
            duration: start.elapsed(),
            ..response
        })
    }
}

fn parse_generate_response(body: &str, requested_model: &str) -> Result<CompletionResponse> {
    let parsed: GenerateContentResponse = serde_json::from_str(body).map_err(|e| {
        ProviderError::InvalidResponse(format!("Failed to parse response: {e}"))
    })?;

    if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ProviderError::InvalidResponse(format!("Prompt blocked: {reason}")).into());
    }

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidResponse("No candidates in response".to_string()))?;

    let finish_reason = candidate.finish_reason.clone();
    let content = candidate
        .content
        .and_then(|c| c.parts.into_iter().next())
        .and_then(|p| p.text)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| {
            ProviderError::InvalidResponse(format!(
                "Empty candidate (finish reason: {})",
                finish_reason.as_deref().unwrap_or("unknown")
            ))
        })?;

    let usage = parsed.usage_metadata.unwrap_or_default();

    Ok(CompletionResponse {
        content,
        model: parsed
            .model_version
            .unwrap_or_else(|| requested_model.to_string()),
        input_tokens: usage.prompt_token_count,
        output_tokens: usage.candidates_token_count,
        duration: Duration::ZERO,
    })
}
