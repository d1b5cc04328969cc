//! Provider router: dispatches each call to the client matching the
//! credential's provider class.
//!
//! One `ProviderRouter` holds one client per provider and is shared by the
//! generation loop and batch modification. Keys are passed per call.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{debug, info};

use super::gemini::GeminiClient;
use super::llm_client::{CompletionResponse, LLMClient};
use super::prompt::{self, Prompt, TemperatureSuggestion};
use super::provider::{EntryGenerator, EntryModifier, GenerationRequest, ModificationRequest};
use crate::models::{
    Config, Credential, DatagenError, Entry, EntryDraft, ProviderClass, ProviderError, Result,
};

/// Routes requests to Gemini or OpenRouter by credential.
pub struct ProviderRouter {
    gemini: GeminiClient,
    openrouter: LLMClient,
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
}

impl ProviderRouter {
    /// Build both provider clients from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let gemini = GeminiClient::new(&config.providers.gemini)?;
        let openrouter = LLMClient::new(&config.providers.openrouter)?;

        info!(
            gemini = %config.providers.gemini.base_url,
            openrouter = %openrouter.base_url(),
            "Provider clients ready"
        );

        Ok(Self {
            gemini,
            openrouter,
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
        })
    }

    async fn complete(
        &self,
        credential: &Credential,
        prompt: &Prompt,
        temperature: Option<f64>,
    ) -> Result<CompletionResponse> {
        if !credential.is_valid() {
            return Err(ProviderError::EmptyCredential {
                slot: credential.index,
            }
            .into());
        }

        let response = match &credential.provider {
            ProviderClass::Gemini { model } => {
                self.gemini
                    .generate_content(credential.key(), model, &prompt.combined(), temperature)
                    .await?
            }
            ProviderClass::OpenRouter { model } => {
                self.openrouter
                    .complete_with_system(
                        credential.key(),
                        model,
                        &prompt.system,
                        &prompt.user,
                        temperature,
                    )
                    .await?
            }
        };

        self.total_input_tokens
            .fetch_add(response.input_tokens as u64, Ordering::Relaxed);
        self.total_output_tokens
            .fetch_add(response.output_tokens as u64, Ordering::Relaxed);

        debug!(
            slot = credential.index,
            model = %response.model,
            duration_ms = response.duration.as_millis() as u64,
            "Completion finished"
        );

        Ok(response)
    }

    /// Ask the model for a creativity temperature suited to the PRD.
    pub async fn suggest_temperature(
        &self,
        prd: &str,
        credential: &Credential,
    ) -> Result<TemperatureSuggestion> {
        if prd.trim().is_empty() {
            return Err(DatagenError::Validation(
                "Please provide a PRD to analyze".to_string(),
            ));
        }
        let response = self
            .complete(credential, &prompt::temperature_prompt(prd), None)
            .await?;
        Ok(prompt::parse_temperature(&response.content)?)
    }

    /// Get total tokens tracked as (input, output).
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }
}

#[async_trait]
impl EntryGenerator for ProviderRouter {
    async fn generate(&self, request: GenerationRequest) -> Result<EntryDraft> {
        let response = self
            .complete(
                &request.credential,
                &prompt::generation_prompt(&request.prd),
                Some(request.temperature),
            )
            .await?;
        Ok(prompt::parse_entry_draft(&response.content)?)
    }
}

#[async_trait]
impl EntryModifier for ProviderRouter {
    async fn modify(&self, request: ModificationRequest) -> Result<Entry> {
        let response = self
            .complete(
                &request.credential,
                &prompt::modification_prompt(&request.entry, &request.instruction),
                None,
            )
            .await?;
        Ok(prompt::parse_modified_entry(
            &response.content,
            request.entry.id,
        )?)
    }
}
