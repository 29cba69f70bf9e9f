use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

use super::{ChatError, ChatMessage, ChatRole};

/// Per-session message log.
#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    /// The last `limit` messages for the session, oldest first.
    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>, ChatError>;

    async fn append(&self, session_id: &str, messages: &[ChatMessage]) -> Result<(), ChatError>;

    async fn clear(&self, session_id: &str) -> Result<(), ChatError>;

    fn name(&self) -> &str;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local history, used when no database is configured.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    sessions: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl ChatHistoryStore for InMemoryHistory {
    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>, ChatError> {
        let sessions = self.sessions.read().await;
        let messages = sessions.get(session_id).map(Vec::as_slice).unwrap_or(&[]);
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn append(&self, session_id: &str, messages: &[ChatMessage]) -> Result<(), ChatError> {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .extend_from_slice(messages);
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<(), ChatError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// PostgreSQL store
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    role: String,
    content: String,
}

/// History in the `message_store` table; see `db::ensure_schema`.
#[derive(Debug, Clone)]
pub struct PgChatHistory {
    pool: PgPool,
}

impl PgChatHistory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatHistoryStore for PgChatHistory {
    async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>, ChatError> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            r#"
            SELECT role, content FROM (
                SELECT id, role, content FROM message_store
                WHERE session_id = $1
                ORDER BY id DESC
                LIMIT $2
            ) recent
            ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match ChatRole::parse(&row.role) {
                Some(role) => Some(ChatMessage {
                    role,
                    content: row.content,
                }),
                None => {
                    tracing::warn!(role = %row.role, "Skipping history row with unknown role");
                    None
                }
            })
            .collect())
    }

    async fn append(&self, session_id: &str, messages: &[ChatMessage]) -> Result<(), ChatError> {
        let mut tx = self.pool.begin().await?;
        for message in messages {
            sqlx::query("INSERT INTO message_store (session_id, role, content) VALUES ($1, $2, $3)")
                .bind(session_id)
                .bind(message.role.as_str())
                .bind(&message.content)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<(), ChatError> {
        let result = sqlx::query("DELETE FROM message_store WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        tracing::debug!(session_id, rows = result.rows_affected(), "Cleared chat history");
        Ok(())
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
