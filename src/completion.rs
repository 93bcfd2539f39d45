//! Completion Engine Client
//!
//! The orchestrator talks to the completion engine through the
//! [`CompletionEngine`] trait. [`HttpCompletionEngine`] implements it against
//! any OpenAI-compatible `chat/completions` endpoint. Tests substitute
//! scripted engines.
//!
//! Calls are never retried here. A transport error, a timeout, a non-2xx
//! status, or a reply without a string `choices[0].message.content` is a
//! `CompletionEngine` error and ends the orchestration call.

use std::future::Future;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use crate::config::CompletionSettings;
use crate::error::{NlQueryError, Result};

/// Longest slice of an error body quoted back in error messages
const MAX_ERROR_BODY_CHARS: usize = 200;

/// One completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Text-completion backend
pub trait CompletionEngine: Send + Sync {
    /// Complete one request, returning the reply text
    fn complete(&self, request: &CompletionRequest) -> impl Future<Output = Result<String>> + Send;
}

/// Completion engine speaking the OpenAI-compatible chat API
#[derive(Debug, Clone)]
pub struct HttpCompletionEngine {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpCompletionEngine {
    /// Build a client from explicit settings
    pub fn new(settings: &CompletionSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| NlQueryError::config_error(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: chat_endpoint(&settings.base_url),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        })
    }

    /// Fully qualified `chat/completions` URL
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl CompletionEngine for HttpCompletionEngine {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let payload = build_payload(&self.model, request);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NlQueryError::completion("request timed out")
                } else {
                    NlQueryError::completion(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(NlQueryError::completion(format!("HTTP {status}: {excerpt}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| NlQueryError::completion(format!("invalid JSON reply: {e}")))?;

        let text = extract_text(&body)?;
        debug!(model = %self.model, chars = text.len(), "Completion received");
        Ok(text)
    }
}

/// `{base_url}/chat/completions`, tolerating a trailing slash
#[must_use]
pub fn chat_endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

/// Request body for one completion call
#[must_use]
pub fn build_payload(model: &str, request: &CompletionRequest) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": request.system_prompt },
            { "role": "user", "content": request.user_prompt }
        ],
        "temperature": request.temperature,
        "max_tokens": request.max_output_tokens
    })
}

/// Pull `choices[0].message.content` out of a reply body
pub fn extract_text(body: &Value) -> Result<String> {
    match body.pointer("/choices/0/message/content") {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Null) | None => Err(NlQueryError::completion("reply has no message content")),
        Some(_) => Err(NlQueryError::completion("reply content is not text")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system_prompt: "schema".to_string(),
            user_prompt: "Question: how many?".to_string(),
            temperature: 0.1,
            max_output_tokens: 2000,
        }
    }

    #[test]
    fn test_payload_shape() {
        let payload = build_payload("gpt-4o-mini", &request());

        assert_eq!(payload["model"], "gpt-4o-mini");
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["messages"][0]["content"], "schema");
        assert_eq!(payload["messages"][1]["role"], "user");
        assert_eq!(payload["messages"][1]["content"], "Question: how many?");
        assert_eq!(payload["max_tokens"], 2000);
        assert!((payload["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_extract_text() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "ACTION: ANSWER"}}]});
        assert_eq!(extract_text(&body).unwrap(), "ACTION: ANSWER");

        let empty = json!({"choices": [{"message": {"content": ""}}]});
        assert_eq!(extract_text(&empty).unwrap(), "");
    }

    #[test]
    fn test_extract_text_rejects_unusable_replies() {
        for body in [
            json!({}),
            json!({"choices": []}),
            json!({"choices": [{"message": {"content": null}}]}),
            json!({"choices": [{"message": {"content": 42}}]}),
        ] {
            let err = extract_text(&body).unwrap_err();
            assert_eq!(err.error_code(), "COMPLETION_ENGINE_FAILED");
        }
    }

    #[test]
    fn test_chat_endpoint() {
        assert_eq!(chat_endpoint("https://api.openai.com/v1"), "https://api.openai.com/v1/chat/completions");
        assert_eq!(chat_endpoint("http://localhost:11434/v1/"), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn test_engine_from_settings() {
        let settings = CompletionSettings::new("https://openrouter.ai/api/v1/", "sk-test", "test-model");
        let engine = HttpCompletionEngine::new(&settings).unwrap();
        assert_eq!(engine.endpoint(), "https://openrouter.ai/api/v1/chat/completions");
    }
}
