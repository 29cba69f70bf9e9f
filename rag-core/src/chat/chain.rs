use std::sync::Arc;

use async_trait::async_trait;

use super::{ChatEngine, ChatError, ChatHistoryStore, ChatMessage, ChatRole, GeminiChatClient};

/// The single long-lived chain: stored history plus the new prompt go to the
/// model, and both turns are recorded once the model has answered.
pub struct ConversationChain {
    llm: GeminiChatClient,
    history: Arc<dyn ChatHistoryStore>,
    max_history_messages: usize,
}

impl ConversationChain {
    /// `max_history_messages` is rounded down to whole user/model pairs.
    pub fn new(
        llm: GeminiChatClient,
        history: Arc<dyn ChatHistoryStore>,
        max_history_messages: usize,
    ) -> Self {
        let max_history_messages = max_history_messages - max_history_messages % 2;
        tracing::info!(
            model = llm.model(),
            history = history.name(),
            max_history_messages,
            "Chat chain created"
        );
        Self {
            llm,
            history,
            max_history_messages,
        }
    }
}

#[async_trait]
impl ChatEngine for ConversationChain {
    async fn take_turn(&self, session_id: &str, prompt: &str) -> Result<String, ChatError> {
        let mut conversation = self
            .history
            .recent(session_id, self.max_history_messages)
            .await?;
        // Gemini expects the conversation to open with a user turn.
        let leading_model = conversation
            .iter()
            .take_while(|m| m.role == ChatRole::Model)
            .count();
        conversation.drain(..leading_model);
        conversation.push(ChatMessage::user(prompt));

        let answer = self.llm.generate(&conversation).await?;

        self.history
            .append(
                session_id,
                &[ChatMessage::user(prompt), ChatMessage::model(answer.clone())],
            )
            .await?;

        Ok(answer)
    }

    async fn clear_history(&self, session_id: &str) -> Result<(), ChatError> {
        self.history.clear(session_id).await
    }
}
