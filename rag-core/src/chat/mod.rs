//! Chat engine adapter.
//!
//! [`ChatEngine`] is the seam the HTTP layer talks to: one turn in, response
//! text out, plus history cleanup when a session times out. The production
//! implementation is [`ConversationChain`], a Gemini client over a
//! [`ChatHistoryStore`] keyed by session identifier.

mod chain;
mod gemini;
mod history;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use chain::ConversationChain;
pub use gemini::{GeminiChatClient, GeminiChatConfig};
pub use history::{ChatHistoryStore, InMemoryHistory, PgChatHistory};

/// Shared, long-lived chat engine. Implementations must tolerate concurrent
/// turns for different sessions; concurrent turns for the same session may
/// interleave their history writes.
#[async_trait]
pub trait ChatEngine: Send + Sync {
    /// Run one conversational turn for `session_id` and return the model text.
    async fn take_turn(&self, session_id: &str, prompt: &str) -> Result<String, ChatError>;

    /// Drop all stored history for `session_id`.
    async fn clear_history(&self, session_id: &str) -> Result<(), ChatError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Model => "model",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" | "human" => Some(ChatRole::User),
            "model" | "ai" | "assistant" => Some(ChatRole::Model),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Model,
            content: content.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("LLM returned no candidate text")]
    EmptyResponse,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed: {last}")]
    RetryExhausted { attempts: usize, last: String },

    #[error("History store error: {0}")]
    History(#[from] sqlx::Error),
}
