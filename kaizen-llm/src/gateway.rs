//! LLM gateway
//!
//! A single callable surface over OpenAI-compatible chat completion APIs.
//! The gateway negotiates two modes: schema-constrained when the configured
//! provider advertises response-format schema validation, free-text
//! otherwise (callers then post-process with [`crate::clean_llm_response`]).
//! Retries are the caller's responsibility; the gateway never retries.

use async_trait::async_trait;
use kaizen_core::{KaizenError, KaizenResult, LlmSettings};
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A single completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model id, optionally prefixed with a provider routing tag
    /// (`openai/gpt-4o`). The prefix is stripped before dispatch.
    pub model: String,
    pub prompt: String,
    /// JSON schema for constrained decoding. Ignored by providers that do
    /// not support it; callers should only set this when
    /// [`CompletionModel::supports_response_schema`] returns true.
    pub response_schema: Option<serde_json::Value>,
}

/// Async trait for completion providers.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Run one completion and return the raw message content.
    async fn complete(&self, request: CompletionRequest) -> KaizenResult<String>;

    /// Whether the provider validates a response schema for this model.
    fn supports_response_schema(&self, model: &str) -> bool;
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

/// Completion client for OpenAI-compatible endpoints.
pub struct HttpCompletionModel {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    provider: Option<String>,
}

impl HttpCompletionModel {
    pub fn new(settings: &LlmSettings) -> KaizenResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| KaizenError::store(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            provider: settings.custom_llm_provider.clone(),
        })
    }

    /// Strip a `provider/` routing prefix so the wire model id matches what
    /// the endpoint expects.
    fn wire_model(model: &str) -> &str {
        match model.split_once('/') {
            Some((_, rest)) if !rest.is_empty() => rest,
            _ => model,
        }
    }
}

#[async_trait]
impl CompletionModel for HttpCompletionModel {
    async fn complete(&self, request: CompletionRequest) -> KaizenResult<String> {
        let mut body = json!({
            "model": Self::wire_model(&request.model),
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Some(schema) = &request.response_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "response",
                    "schema": schema,
                    "strict": true,
                },
            });
        }

        let url = format!("{}/chat/completions", self.api_base);
        let mut req = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| KaizenError::store(format!("LLM request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(KaizenError::store(format!(
                "LLM request failed with status {status}: {message}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| KaizenError::store(format!("Failed to parse LLM response: {e}")))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }

    fn supports_response_schema(&self, model: &str) -> bool {
        // Mirrors the capability lookup of the upstream routing library:
        // OpenAI and Azure chat models validate json_schema response formats;
        // anything routed through an unknown provider tag falls back to
        // free-text mode.
        let provider = self
            .provider
            .as_deref()
            .or_else(|| model.split_once('/').map(|(p, _)| p))
            .unwrap_or("");
        match provider {
            "openai" | "azure" => true,
            "" => Self::wire_model(model).starts_with("gpt-"),
            _ => false,
        }
    }
}

impl std::fmt::Debug for HttpCompletionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCompletionModel")
            .field("api_base", &self.api_base)
            .field("api_key", &"[REDACTED]")
            .field("provider", &self.provider)
            .finish()
    }
}

/// Scripted completion model for testing. Pops one queued response per call
/// and records every prompt it receives.
pub struct MockCompletionModel {
    responses: Mutex<VecDeque<KaizenResult<String>>>,
    prompts: Mutex<Vec<String>>,
    schema_supported: bool,
}

impl MockCompletionModel {
    pub fn new(responses: Vec<KaizenResult<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
            schema_supported: false,
        }
    }

    pub fn with_schema_support(mut self) -> Self {
        self.schema_supported = true;
        self
    }

    /// Prompts seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionModel for MockCompletionModel {
    async fn complete(&self, request: CompletionRequest) -> KaizenResult<String> {
        self.prompts.lock().unwrap().push(request.prompt);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(KaizenError::store("MockCompletionModel ran out of responses")))
    }

    fn supports_response_schema(&self, _model: &str) -> bool {
        self.schema_supported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_model_strips_provider_prefix() {
        assert_eq!(HttpCompletionModel::wire_model("openai/gpt-4o"), "gpt-4o");
        assert_eq!(HttpCompletionModel::wire_model("gpt-4o"), "gpt-4o");
        assert_eq!(HttpCompletionModel::wire_model("ollama/llama3.1"), "llama3.1");
    }

    #[test]
    fn schema_support_follows_provider_tag() {
        let settings = LlmSettings::default();
        let model = HttpCompletionModel::new(&settings).unwrap();
        assert!(model.supports_response_schema("openai/gpt-4o"));
        assert!(model.supports_response_schema("gpt-4o-mini"));
        assert!(!model.supports_response_schema("ollama/llama3.1"));

        let tagged = HttpCompletionModel::new(&LlmSettings {
            custom_llm_provider: Some("ollama".to_string()),
            ..LlmSettings::default()
        })
        .unwrap();
        assert!(!tagged.supports_response_schema("gpt-4o"));
    }

    #[tokio::test]
    async fn mock_model_pops_responses_in_order() {
        let mock = MockCompletionModel::new(vec![
            Ok("first".to_string()),
            Err(KaizenError::store("boom")),
        ]);
        let request = CompletionRequest {
            model: "test".to_string(),
            prompt: "p".to_string(),
            response_schema: None,
        };
        assert_eq!(mock.complete(request.clone()).await.unwrap(), "first");
        assert!(mock.complete(request).await.is_err());
        assert_eq!(mock.calls(), 2);
    }
}
