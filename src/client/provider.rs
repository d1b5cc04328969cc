//! Provider seams used by the pipeline.
//!
//! The loop controller and the modification orchestrator only see these
//! traits, so tests drive them with scripted fakes instead of HTTP.

use async_trait::async_trait;

use crate::models::{Credential, Entry, EntryDraft, Result};

/// Input for one generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prd: String,
    pub temperature: f64,
    pub credential: Credential,
}

/// Input for one modification call.
#[derive(Debug, Clone)]
pub struct ModificationRequest {
    pub entry: Entry,
    pub instruction: String,
    pub credential: Credential,
}

/// Produces one new entry per call.
#[async_trait]
pub trait EntryGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<EntryDraft>;
}

/// Rewrites an existing entry according to an instruction.
///
/// Implementations should return the same id they were given; callers
/// discard results whose id differs.
#[async_trait]
pub trait EntryModifier: Send + Sync {
    async fn modify(&self, request: ModificationRequest) -> Result<Entry>;
}
