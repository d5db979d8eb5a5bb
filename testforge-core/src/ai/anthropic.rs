use super::{map_body_error, map_transport_error, CompletionBackend, HttpSettings, SYSTEM_PROMPT};
use crate::config::ProviderConfig;
use crate::error::BackendError;
use serde_json::{json, Value};
use tracing::warn;

const API_VERSION: &str = "2023-06-01";

/// Anthropic messages API
pub struct AnthropicBackend {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    settings: HttpSettings,
}

impl AnthropicBackend {
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
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
            "system": SYSTEM_PROMPT,
            "messages": [{ "role": "user", "content": payload }],
        })
    }
}

impl CompletionBackend for AnthropicBackend {
    fn complete(&self, payload: &str) -> Result<String, BackendError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::Auth("no Anthropic API key configured".to_string()))?;

        let url = format!("{}/v1/messages", self.endpoint);
        let response = self
            .agent
            .post(&url)
            .set("x-api-key", key)
            .set("anthropic-version", API_VERSION)
            .send_json(self.request_body(payload))
            .map_err(map_transport_error)?;

        let body: Value = response.into_json().map_err(map_body_error)?;
        parse_messages_response(&body)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// Concatenate the text blocks of a messages response
pub fn parse_messages_response(body: &Value) -> Result<String, BackendError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::InvalidResponse("no content in message".to_string()))?;

    if body.get("stop_reason").and_then(Value::as_str) == Some("max_tokens") {
        warn!("message hit max_tokens, output may be truncated");
    }

    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() {
        return Err(BackendError::InvalidResponse("message has no text content".to_string()));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_text_blocks() {
        let body = json!({
            "content": [
                { "type": "text", "text": "{\"modules\":" },
                { "type": "text", "text": " []}" }
            ],
            "stop_reason": "end_turn"
        });
        assert_eq!(parse_messages_response(&body).unwrap(), "{\"modules\": []}");
    }

    #[test]
    fn non_text_only_is_invalid() {
        let body = json!({ "content": [{ "type": "tool_use", "id": "x" }] });
        assert!(matches!(parse_messages_response(&body), Err(BackendError::InvalidResponse(_))));
    }

    #[test]
    fn system_prompt_is_top_level() {
        let backend = AnthropicBackend::new(&ProviderConfig::anthropic_defaults(), HttpSettings::default());
        let body = backend.request_body("payload");
        assert_eq!(body["system"], SYSTEM_PROMPT);
        assert_eq!(body["messages"][0]["role"], "user");
    }
}
