//! OpenRouter client (OpenAI-compatible chat completions).
//!
//! The key is supplied per call rather than per client: the loop controller
//! rotates keys and a single client serves every OpenRouter slot.

use std::time::{Duration, Instant};

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::{ApiErrorDetail, map_status, send_with_retries};
use crate::models::{DatagenError, OpenRouterConfig, ProviderError, Result};

/// Message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
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

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    response_format: ResponseFormat,
}

/// Chat completion response.
///
/// OpenRouter sometimes answers 200 with only an `error` object when an
/// upstream provider fails, so every field is optional.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Response from a completion request, shared by both provider clients.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated text
    pub content: String,
    /// Model used (may differ from requested)
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub duration: Duration,
}

/// Client for the OpenRouter chat completions endpoint.
pub struct LLMClient {
    client: reqwest::Client,
    base_url: String,
    referer: String,
    title: String,
    timeout: Duration,
    max_retries: u32,
}

impl LLMClient {
    pub fn new(config: &OpenRouterConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DatagenError::Network)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            referer: config.referer.clone(),
            title: config.title.clone(),
            timeout,
            max_retries: config.max_retries,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self, api_key: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
            DatagenError::Provider(ProviderError::AuthenticationFailed)
        })?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Ok(referer) = HeaderValue::from_str(&self.referer) {
            headers.insert("HTTP-Referer", referer);
        }
        if let Ok(title) = HeaderValue::from_str(&self.title) {
            headers.insert("X-Title", title);
        }

        Ok(headers)
    }

    /// Complete a chat request in JSON-object mode.
    pub async fn complete(
        &self,
        api_key: &str,
        model: &str,
        messages: Vec<Message>,
        temperature: Option<f64>,
    ) -> Result<CompletionResponse> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::AuthenticationFailed.into());
        }

        let start = Instant::now();
        let request = ChatCompletionRequest {
            model,
            messages,
            temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };
        let url = format!("{}/chat/completions", self.base_url);
        let headers = self.headers(api_key)?;

        let body = send_with_retries("openrouter", self.max_retries, self.timeout, || {
            self.client
                .post(&url)
                .headers(headers.clone())
                .json(&request)
                .send()
        })
        .await?;

        let response = parse_chat_response(&body, model)?;
        debug!(
            model = %response.model,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "OpenRouter completion received"
        );
        Ok(CompletionResponse {
            duration: start.elapsed(),
            ..response
        })
    }

    /// Complete with system and user prompts.
    pub async fn complete_with_system(
        &self,
        api_key: &str,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: Option<f64>,
    ) -> Result<CompletionResponse> {
        let messages = vec![Message::system(system_prompt), Message::user(user_prompt)];
        self.complete(api_key, model, messages, temperature).await
    }
}

fn parse_chat_response(body: &str, requested_model: &str) -> Result<CompletionResponse> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body).map_err(|e| {
        ProviderError::InvalidResponse(format!("Failed to parse response: {e}"))
    })?;

    if let Some(error) = parsed.error {
        let status = error.status_code().unwrap_or(502);
        let body = serde_json::json!({ "error": { "message": error.message } }).to_string();
        return Err(map_status(status, &body).into());
    }

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ProviderError::InvalidResponse("No content in response".to_string()))?;

    let usage = parsed.usage.unwrap_or_default();

    Ok(CompletionResponse {
        content,
        model: parsed.model.unwrap_or_else(|| requested_model.to_string()),
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        duration: Duration::ZERO,
    })
}
