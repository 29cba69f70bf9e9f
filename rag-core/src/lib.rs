pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod safety;
pub mod session;

pub use chat::{
    ChatEngine, ChatError, ChatHistoryStore, ChatMessage, ChatRole, ConversationChain,
    GeminiChatClient, GeminiChatConfig, InMemoryHistory, PgChatHistory,
};
pub use config::RagConfig;
pub use error::RagError;
pub use safety::{
    DlpRedaction, FilterLevel, GoogleApiClient, ModerationGateway, NaturalLanguageModeration,
    RedactionGateway, SafetyError, TemplateDescriptor,
};
pub use session::{SessionOutcome, SessionPhase, SessionState};
