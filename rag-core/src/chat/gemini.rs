use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use super::{ChatError, ChatMessage};
use crate::config::ChatConfig;

/// Gemini chat client configuration
#[derive(Debug, Clone)]
pub struct GeminiChatConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub system_prompt: Option<String>,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub timeout: Duration,
}

impl GeminiChatConfig {
    pub fn from_config(config: &ChatConfig) -> Result<Self, ChatError> {
        let api_key = config.resolved_api_key().ok_or(ChatError::MissingApiKey)?;
        Ok(Self {
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            system_prompt: config.system_prompt.clone(),
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
            timeout: Duration::from_secs(config.request_timeout_seconds),
        })
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: u16,
    message: String,
}

impl From<&ChatMessage> for Content {
    fn from(message: &ChatMessage) -> Self {
        Content {
            role: Some(message.role.as_str().to_string()),
            parts: vec![Part {
                text: message.content.clone(),
            }],
        }
    }
}

// ============================================================================
// GeminiChatClient
// ============================================================================

/// Calls `models/{model}:generateContent` with the full conversation.
#[derive(Debug, Clone)]
pub struct GeminiChatClient {
    client: Client,
    config: GeminiChatConfig,
}

impl GeminiChatClient {
    pub fn new(config: GeminiChatConfig) -> Result<Self, ChatError> {
        if config.api_key.is_empty() {
            return Err(ChatError::MissingApiKey);
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Generate a reply to `conversation`, whose last entry is the new user turn.
    pub async fn generate(&self, conversation: &[ChatMessage]) -> Result<String, ChatError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = Retry::spawn(retry_strategy, || self.generate_once(conversation)).await;

        match result {
            Ok(text) => Ok(text),
            Err(ChatError::EmptyResponse) => Err(ChatError::EmptyResponse),
            Err(e) => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All generateContent retry attempts failed"
                );
                Err(ChatError::RetryExhausted {
                    attempts: self.config.max_retries,
                    last: e.to_string(),
                })
            }
        }
    }

    async fn generate_once(&self, conversation: &[ChatMessage]) -> Result<String, ChatError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url, self.config.model
        );

        let request = GenerateRequest {
            contents: conversation.iter().map(Content::from).collect(),
            system_instruction: self.config.system_prompt.as_ref().map(|p| Content {
                role: None,
                parts: vec![Part { text: p.clone() }],
            }),
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let (code, message) = serde_json::from_str::<ErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(code = code, message = %message, "Gemini API error");

            return Err(ChatError::Api { code, message });
        }

        let body: GenerateResponse = response.json().await?;

        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ChatError::EmptyResponse);
        }

        Ok(text)
    }
}
