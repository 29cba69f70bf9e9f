use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub async fn create_pool(url: &str, config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

/// Creates the chat history table if it does not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS message_store (
            id BIGSERIAL PRIMARY KEY,
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS message_store_session_idx ON message_store (session_id, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Connects, checks the server and prepares the schema so the first prompt
/// does not pay for connection setup.
pub async fn warm_up(url: &str, config: &DatabaseConfig) -> Result<PgPool, crate::RagError> {
    let pool = create_pool(url, config).await?;
    let version = health_check(&pool).await?;
    tracing::info!(postgresql = %version, "Database pool warmed up");
    ensure_schema(&pool).await?;
    Ok(pool)
}
