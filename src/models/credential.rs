//! Credential slots and the provider each one routes to.

use serde::{Deserialize, Serialize};

/// Number of slots in the default layout.
pub const DEFAULT_SLOT_COUNT: usize = 5;

/// Default Gemini model for native Google AI keys.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash-latest";

/// Default OpenRouter models for slots 3 and 4 of the default layout.
pub const DEFAULT_OPENROUTER_MODELS: [&str; 2] = [
    "google/gemini-2.0-flash-exp:free",
    "deepseek/deepseek-r1-distill-llama-70b:free",
];

/// Provider kind as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenRouter,
}

/// Provider routing attached to a credential when the pool is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderClass {
    /// Google Generative Language API, key sent as `x-goog-api-key`
    Gemini { model: String },
    /// OpenRouter chat completions, key passed as bearer token
    OpenRouter { model: String },
}

impl ProviderClass {
    /// Layout used when configuration does not name a provider:
    /// slots 0-2 Gemini, slot 3 and 4 OpenRouter with distinct models.
    pub fn default_for_slot(index: usize) -> Self {
        match index {
            0..=2 => Self::Gemini {
                model: DEFAULT_GEMINI_MODEL.to_string(),
            },
            3 => Self::OpenRouter {
                model: DEFAULT_OPENROUTER_MODELS[0].to_string(),
            },
            _ => Self::OpenRouter {
                model: DEFAULT_OPENROUTER_MODELS[1].to_string(),
            },
        }
    }

    /// Build a class for an explicit kind, falling back to its default model.
    pub fn for_kind(kind: ProviderKind, model: Option<String>) -> Self {
        match kind {
            ProviderKind::Gemini => Self::Gemini {
                model: model.unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            },
            ProviderKind::OpenRouter => Self::OpenRouter {
                model: model.unwrap_or_else(|| DEFAULT_OPENROUTER_MODELS[0].to_string()),
            },
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Gemini { .. } => ProviderKind::Gemini,
            Self::OpenRouter { .. } => ProviderKind::OpenRouter,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Gemini { model } | Self::OpenRouter { model } => model,
        }
    }

    /// Human-readable label, e.g. for the slot listing in `validate`.
    pub fn label(&self) -> String {
        match self {
            Self::Gemini { model } => format!("Google AI ({model})"),
            Self::OpenRouter { model } => format!("OpenRouter ({model})"),
        }
    }
}

/// One slot of the credential pool.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// 0-based slot position
    pub index: usize,
    /// API key, may be empty
    pub secret: String,
    /// Which provider this key belongs to
    pub provider: ProviderClass,
}

impl Credential {
    pub fn new(index: usize, secret: impl Into<String>, provider: ProviderClass) -> Self {
        Self {
            index,
            secret: secret.into(),
            provider,
        }
    }

    /// A slot is usable iff its secret is non-blank.
    pub fn is_valid(&self) -> bool {
        !self.secret.trim().is_empty()
    }

    /// The secret with surrounding whitespace removed, as sent on the wire.
    pub fn key(&self) -> &str {
        self.secret.trim()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("secret", &if self.is_valid() { "<redacted>" } else { "<empty>" })
            .field("provider", &self.provider)
            .finish()
    }
}
