use super::{map_body_error, map_transport_error, CompletionBackend, HttpSettings, SYSTEM_PROMPT};
use crate::config::ProviderConfig;
use crate::error::BackendError;
use serde_json::{json, Value};
use tracing::warn;

/// OpenAI-compatible chat completions endpoint
pub struct OpenAiBackend {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    settings: HttpSettings,
}

impl OpenAiBackend {
    pub fn new(provider: &ProviderConfig, settings: HttpSettings) -> Self {
        Self {
            agent: settings.agent(),
            endpoint: provider.endpoint.trim_end_matches('/').to_string(),
            model: provider.model.clone(),
            api_key: provider.resolve_api_key(),
            settings,
        }
    }

    fn request_body(&self, payload: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": payload }
            ],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        })
    }
}

impl CompletionBackend for OpenAiBackend {
    fn complete(&self, payload: &str) -> Result<String, BackendError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::Auth("no OpenAI API key configured".to_string()))?;

        let url = format!("{}/chat/completions", self.endpoint);
        let response = self
            .agent
            .post(&url)
            .set("Authorization", &format!("Bearer {key}"))
            .send_json(self.request_body(payload))
            .map_err(map_transport_error)?;

        let body: Value = response.into_json().map_err(map_body_error)?;
        parse_chat_response(&body)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Pull the assistant text out of a chat completion body
pub fn parse_chat_response(body: &Value) -> Result<String, BackendError> {
    let choice = body
        .pointer("/choices/0")
        .ok_or_else(|| BackendError::InvalidResponse("no choices in completion".to_string()))?;

    if choice.get("finish_reason").and_then(Value::as_str) == Some("length") {
        warn!("completion hit the token limit, output may be truncated");
    }

    choice
        .pointer("/message/content")
        .and_then(Value::as_str)
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| BackendError::InvalidResponse("completion has no message content".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_message_content() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"modules\": []}" }, "finish_reason": "stop" }]
        });
        assert_eq!(parse_chat_response(&body).unwrap(), "{\"modules\": []}");
    }

    #[test]
    fn empty_choices_are_invalid() {
        let body = json!({ "choices": [] });
        assert!(matches!(parse_chat_response(&body), Err(BackendError::InvalidResponse(_))));
    }

    #[test]
    fn missing_key_is_an_auth_error() {
        let provider = ProviderConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            model: "m".to_string(),
            api_key: None,
            api_key_env: None,
        };
        let backend = OpenAiBackend::new(&provider, HttpSettings::default());
        assert!(matches!(backend.complete("hi"), Err(BackendError::Auth(_))));
    }

    #[test]
    fn request_carries_system_prompt_and_limits() {
        let provider = ProviderConfig {
            api_key: Some("k".into()),
            ..ProviderConfig::openai_defaults()
        };
        let backend = OpenAiBackend::new(&provider, HttpSettings::default());
        let body = backend.request_body("payload");
        assert_eq!(body["messages"][0]["content"], SYSTEM_PROMPT);
        assert_eq!(body["messages"][1]["content"], "payload");
        assert_eq!(body["max_tokens"], 8000);
    }
}
