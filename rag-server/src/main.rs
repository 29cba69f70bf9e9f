use std::sync::Arc;

use clap::Parser;
use rag_core::{
    db, ChatHistoryStore, ConversationChain, DlpRedaction, GeminiChatClient, GeminiChatConfig,
    GoogleApiClient, InMemoryHistory, ModerationGateway, NaturalLanguageModeration, PgChatHistory,
    RagConfig, RedactionGateway,
};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use rag_server::http::{self, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "rag.toml")]
    config: String,

    /// Check database and safety-service status, then exit.
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Local .env for development; deployments set real environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match RagConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Chat history store; the pool is warmed up before any traffic is served
    let history: Arc<dyn ChatHistoryStore> = match config.database.url.as_deref() {
        Some(url) => match db::warm_up(url, &config.database).await {
            Ok(pool) => Arc::new(PgChatHistory::new(pool)),
            Err(e) => {
                eprintln!("Failed to connect to database: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("No database configured; chat history is kept in memory");
            Arc::new(InMemoryHistory::new())
        }
    };

    let google = GoogleApiClient::connect(config.google.clone()).await?;
    let moderation: Arc<dyn ModerationGateway> =
        Arc::new(NaturalLanguageModeration::new(google.clone()));
    let redaction: Arc<dyn RedactionGateway> = Arc::new(DlpRedaction::new(google));

    if args.health {
        match moderation.is_enabled().await {
            Ok(v) => println!("✅ Natural Language moderation enabled: {}", v),
            Err(e) => println!("❌ Natural Language status check failed: {}", e),
        }
        match redaction.is_enabled().await {
            Ok(v) => println!("✅ DLP redaction enabled: {}", v),
            Err(e) => println!("❌ DLP status check failed: {}", e),
        }
        println!("✅ Chat history store: {}", history.name());
        return Ok(());
    }

    // Single long-lived chain shared by all requests
    let llm = GeminiChatClient::new(GeminiChatConfig::from_config(&config.chat)?)?;
    let chain = Arc::new(ConversationChain::new(
        llm,
        history,
        config.chat.max_history_messages,
    ));

    let state = AppState::new(chain, moderation, redaction, &config.server)?;

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    http::start_http_server(state, &config.bind_addr(), tx.subscribe()).await?;

    Ok(())
}
