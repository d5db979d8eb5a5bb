use crate::types::ModelBackend;
use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    180
}

fn default_max_tokens() -> u32 {
    8000
}

fn default_temperature() -> f32 {
    0.3
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Which provider answers extraction requests
    #[serde(default = "default_backend")]
    pub backend: ModelBackend,
    #[serde(default = "ProviderConfig::openai_defaults", deserialize_with = "openai_section")]
    pub openai: ProviderConfig,
    #[serde(default = "ProviderConfig::anthropic_defaults", deserialize_with = "anthropic_section")]
    pub anthropic: ProviderConfig,
    /// Whole-request timeout for one model call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// When set, stage intermediates are captured here for post-mortem inspection
    #[serde(default)]
    pub diagnostics_dir: Option<PathBuf>,
}

fn default_backend() -> ModelBackend {
    ModelBackend::OpenAi
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub model: String,
    /// Never written back out; supply through the file or `api_key_env`
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is unset
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ProviderConfig {
    pub fn openai_defaults() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key: None,
            api_key_env: Some("OPENAI_API_KEY".to_string()),
        }
    }

    pub fn anthropic_defaults() -> Self {
        Self {
            endpoint: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key: None,
            api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
        }
    }

    fn merged(mut self, file: ProviderSection) -> Self {
        if let Some(endpoint) = file.endpoint {
            self.endpoint = endpoint;
        }
        if let Some(model) = file.model {
            self.model = model;
        }
        if file.api_key.is_some() {
            self.api_key = file.api_key;
        }
        if file.api_key_env.is_some() {
            self.api_key_env = file.api_key_env;
        }
        self
    }

    /// Explicit key first, then the configured environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| self.api_key_env.as_deref().and_then(|var| std::env::var(var).ok()))
            .filter(|k| !k.trim().is_empty())
    }
}

/// A provider block as written in a config file; unset fields keep the
/// provider's own defaults
#[derive(Deserialize)]
struct ProviderSection {
    endpoint: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    api_key_env: Option<String>,
}

fn openai_section<'de, D>(deserializer: D) -> std::result::Result<ProviderConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let file = ProviderSection::deserialize(deserializer)?;
    Ok(ProviderConfig::openai_defaults().merged(file))
}

fn anthropic_section<'de, D>(deserializer: D) -> std::result::Result<ProviderConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let file = ProviderSection::deserialize(deserializer)?;
    Ok(ProviderConfig::anthropic_defaults().merged(file))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureConfig {
    #[serde(default = "default_true")]
    pub defect_detection: bool,
    #[serde(default = "default_true")]
    pub question_generation: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            defect_detection: true,
            question_generation: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PromptConfig {
    /// Outline text beyond this many chars is cut off
    pub max_content_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_content_chars: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    pub max_document_size_mb: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            max_document_size_mb: 50,
        }
    }
}

impl InputConfig {
    pub fn max_bytes(&self) -> u64 {
        self.max_document_size_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArchiveConfig {
    pub author: String,
    pub generator_name: String,
    pub generator_version: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            author: "TestForge".to_string(),
            generator_name: "testforge".to_string(),
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            openai: ProviderConfig::openai_defaults(),
            anthropic: ProviderConfig::anthropic_defaults(),
            request_timeout_secs: default_request_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            retry: RetrySettings::default(),
            features: FeatureConfig::default(),
            prompt: PromptConfig::default(),
            input: InputConfig::default(),
            archive: ArchiveConfig::default(),
            output_dir: default_output_dir(),
            diagnostics_dir: None,
        }
    }
}

impl GeneratorConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GeneratorConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn load_with_fallback(path: Option<&str>) -> Self {
        match path {
            Some(p) => Self::load_from_file(p).unwrap_or_else(|e| {
                tracing::warn!(path = p, error = %e, "failed to load config, using defaults");
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Layer process environment on top of file values
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Same as `apply_env_overrides` but with an injectable lookup, so tests
    /// never touch the real process environment.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(backend) = get("TESTFORGE_BACKEND") {
            match backend.parse() {
                Ok(b) => self.backend = b,
                Err(e) => tracing::warn!(error = %e, "ignoring TESTFORGE_BACKEND"),
            }
        }

        if let Some(key) = get("OPENAI_API_KEY") {
            self.openai.api_key = Some(key);
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            self.openai.endpoint = url;
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.openai.model = model;
        }

        if let Some(key) = get("ANTHROPIC_API_KEY").or_else(|| get("ANTHROPIC_AUTH_TOKEN")) {
            self.anthropic.api_key = Some(key);
        }
        if let Some(url) = get("ANTHROPIC_BASE_URL") {
            self.anthropic.endpoint = url;
        }
        if let Some(model) = get("CLAUDE_MODEL") {
            self.anthropic.model = model;
        }
    }

    pub fn provider(&self, backend: ModelBackend) -> &ProviderConfig {
        match backend {
            ModelBackend::OpenAi => &self.openai,
            ModelBackend::Anthropic => &self.anthropic,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// YAML rendering with credentials left out
    pub fn to_redacted_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
