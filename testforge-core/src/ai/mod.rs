//! Model backends
//!
//! Every backend exposes exactly one capability, [`CompletionBackend::complete`].
//! The concrete provider is picked from configuration through the closed
//! [`ModelBackendImpl`] enum; [`AiClient`] wraps any backend with retry/backoff.

pub mod anthropic;
pub mod openai;
pub mod retry;

pub use anthropic::AnthropicBackend;
pub use openai::OpenAiBackend;
pub use retry::RetryPolicy;

use crate::config::GeneratorConfig;
use crate::error::{snippet, BackendError};
use crate::types::ModelBackend;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub(crate) const SYSTEM_PROMPT: &str =
    "You are a senior software test engineer. You answer with strictly valid JSON.";

/// Turns one instruction payload into raw model text
pub trait CompletionBackend: Send + Sync {
    fn complete(&self, payload: &str) -> Result<String, BackendError>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Per-request HTTP settings shared by the concrete backends
#[derive(Debug, Clone, PartialEq)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let config = GeneratorConfig::default();
        Self::from(&config)
    }
}

impl From<&GeneratorConfig> for HttpSettings {
    fn from(config: &GeneratorConfig) -> Self {
        Self {
            timeout: config.request_timeout(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

impl HttpSettings {
    pub(crate) fn agent(&self) -> ureq::Agent {
        ureq::AgentBuilder::new().timeout(self.timeout).build()
    }
}

/// Map a ureq failure onto the backend error taxonomy.
/// Timeouts and connection failures surface as transport errors and are transient.
pub(crate) fn map_transport_error(err: ureq::Error) -> BackendError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            BackendError::from_status(code, &body)
        }
        ureq::Error::Transport(transport) => BackendError::Transient(transport.to_string()),
    }
}

/// Map a failure reading or decoding a 2xx response body.
/// An interrupted read is transient; a complete body that isn't JSON is not.
pub(crate) fn map_body_error(err: std::io::Error) -> BackendError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::TimedOut
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::UnexpectedEof => BackendError::Transient(format!("response body read failed: {err}")),
        _ => BackendError::InvalidResponse(format!("response is not JSON: {err}")),
    }
}

/// Backend enum for configuration-driven provider selection
pub enum ModelBackendImpl {
    OpenAi(OpenAiBackend),
    Anthropic(AnthropicBackend),
}

impl ModelBackendImpl {
    pub fn from_config(config: &GeneratorConfig, backend: ModelBackend) -> Self {
        let settings = HttpSettings::from(config);
        let provider = config.provider(backend);
        match backend {
            ModelBackend::OpenAi => Self::OpenAi(OpenAiBackend::new(provider, settings)),
            ModelBackend::Anthropic => Self::Anthropic(AnthropicBackend::new(provider, settings)),
        }
    }
}

impl CompletionBackend for ModelBackendImpl {
    fn complete(&self, payload: &str) -> Result<String, BackendError> {
        match self {
            ModelBackendImpl::OpenAi(backend) => backend.complete(payload),
            ModelBackendImpl::Anthropic(backend) => backend.complete(payload),
        }
    }

    fn name(&self) -> &str {
        match self {
            ModelBackendImpl::OpenAi(backend) => backend.name(),
            ModelBackendImpl::Anthropic(backend) => backend.name(),
        }
    }
}

/// A backend plus the retry policy applied to it.
/// Holds no state between calls.
pub struct AiClient {
    backend: Box<dyn CompletionBackend>,
    retry: RetryPolicy,
}

impl AiClient {
    pub fn new(backend: Box<dyn CompletionBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self::new(
            Box::new(ModelBackendImpl::from_config(config, config.backend)),
            RetryPolicy::from(&config.retry),
        )
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Send `payload`, retrying transient failures per the policy
    pub fn complete(&self, payload: &str) -> Result<String, BackendError> {
        let backend = self.backend.name();
        let start = Instant::now();
        let raw = self.retry.run(|attempt| {
            debug!(backend, attempt, payload_chars = payload.chars().count(), "sending completion request");
            self.backend.complete(payload)
        })?;
        info!(
            backend,
            elapsed_ms = start.elapsed().as_millis() as u64,
            response_chars = raw.chars().count(),
            "completion received"
        );
        debug!(preview = %snippet(&raw, 200), "raw completion");
        Ok(raw)
    }
}
