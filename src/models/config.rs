//! Configuration models for datagenius.
//!
//! Everything the user can tune lives here and is read from a TOML file.
//! Secrets may be inlined (with `${VAR}` expansion) or pulled from the
//! environment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use super::{Credential, DEFAULT_SLOT_COUNT, ProviderClass, ProviderKind};
use crate::pool::CredentialPool;

/// Top-level configuration for datagenius.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Endpoint settings per provider
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Ordered credential slots; empty means "read DATAGENIUS_KEY_1..5"
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,

    /// Generation loop settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Batch modification settings
    #[serde(default)]
    pub modification: ModificationConfig,

    /// Export settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Endpoint settings for both providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub openrouter: OpenRouterConfig,
}

/// Google Generative Language API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Base URL, `/models/{model}:generateContent` is appended
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Attempts for network errors and 5xx responses
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_gemini_base_url(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

/// OpenRouter API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Base URL for the OpenAI-compatible API
    #[serde(default = "default_openrouter_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Attempts for network errors and 5xx responses
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Sent as `HTTP-Referer`, some free models require it
    #[serde(default = "default_referer")]
    pub referer: String,

    /// Sent as `X-Title`
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            base_url: default_openrouter_base_url(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            referer: default_referer(),
            title: default_title(),
        }
    }
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_referer() -> String {
    "http://localhost:9002".to_string()
}

fn default_title() -> String {
    "DataGenius".to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

/// One credential slot as written in configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Inline secret; `${VAR}` placeholders are expanded
    #[serde(default)]
    pub secret: Option<String>,

    /// Environment variable holding the secret
    #[serde(default)]
    pub secret_env: Option<String>,

    /// Provider; omitted means the default layout for this slot
    #[serde(default)]
    pub provider: Option<ProviderKind>,

    /// Model override
    #[serde(default)]
    pub model: Option<String>,
}

/// Generation loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Default creativity temperature (0.0 - 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Pause after rotating away from a failing key
    #[serde(default = "default_rotation_delay_ms")]
    pub rotation_delay_ms: u64,

    /// Countdown before resuming after a non-credential failure
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u32,

    /// Size of the newest-first preview window
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            rotation_delay_ms: default_rotation_delay_ms(),
            backoff_secs: default_backoff_secs(),
            preview_limit: default_preview_limit(),
        }
    }
}

impl GenerationConfig {
    pub fn rotation_delay(&self) -> Duration {
        Duration::from_millis(self.rotation_delay_ms)
    }
}

fn default_temperature() -> f64 {
    0.7
}

fn default_rotation_delay_ms() -> u64 {
    1000
}

fn default_backoff_secs() -> u32 {
    10
}

fn default_preview_limit() -> usize {
    100
}

/// Batch modification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModificationConfig {
    /// Max concurrent modification calls per batch
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for ModificationConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

/// Export file format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown export format '{other}' (expected csv or json)")),
        }
    }
}

/// Export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Where `generate` writes the dataset
    #[serde(default = "default_output_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub format: ExportFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            format: ExportFormat::default(),
        }
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from("datagenius_dataset.csv")
}

/// Environment variable read for slot `n` (1-based) when no slots are configured.
pub fn default_slot_env(n: usize) -> String {
    format!("DATAGENIUS_KEY_{n}")
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_owned(),
                source,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.generation.temperature) {
            return Err(ConfigError::Invalid(format!(
                "generation.temperature must be within [0, 1], got {}",
                self.generation.temperature
            )));
        }
        if self.modification.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "modification.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve every slot into a credential pool.
    ///
    /// Missing secrets yield empty (invalid) slots rather than errors: the
    /// pool tolerates gaps and the controller only refuses to start when
    /// no slot is usable.
    pub fn credential_pool(&self) -> CredentialPool {
        if self.credentials.is_empty() {
            let credentials = (0..DEFAULT_SLOT_COUNT)
                .map(|index| {
                    let secret = std::env::var(default_slot_env(index + 1)).unwrap_or_default();
                    Credential::new(index, secret, ProviderClass::default_for_slot(index))
                })
                .collect();
            return CredentialPool::new(credentials);
        }

        let credentials = self
            .credentials
            .iter()
            .enumerate()
            .map(|(index, slot)| {
                let provider = match slot.provider {
                    Some(kind) => ProviderClass::for_kind(kind, slot.model.clone()),
                    None => match (ProviderClass::default_for_slot(index), &slot.model) {
                        (class, None) => class,
                        (class, Some(model)) => ProviderClass::for_kind(class.kind(), Some(model.clone())),
                    },
                };
                Credential::new(index, slot.resolve_secret(), provider)
            })
            .collect();
        CredentialPool::new(credentials)
    }
}

impl CredentialConfig {
    /// Inline secret first, then the named environment variable, else empty.
    pub fn resolve_secret(&self) -> String {
        if let Some(secret) = &self.secret {
            return expand_env_vars(secret);
        }
        self.secret_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .unwrap_or_default()
    }
}

static ENV_PLACEHOLDER: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is a valid regex")
});

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in ENV_PLACEHOLDER.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
