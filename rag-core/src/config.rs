use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::RagError;

/// Shortest accepted session-signing secret, in bytes.
pub const MIN_SESSION_SECRET_LEN: usize = 32;

/// Longest accepted inactivity timeout: one year.
pub const MAX_SESSION_TIMEOUT_MINUTES: i64 = 525_600;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RagConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub google: GoogleConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub session_secret: Option<String>,
    pub session_timeout_minutes: i64,
    /// Embed the error chain in `/prompt` failure bodies.
    pub expose_error_details: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            session_secret: None,
            session_timeout_minutes: 30,
            expose_error_details: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL URL for the chat history store. In-memory history when unset.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChatConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: String,
    pub system_prompt: Option<String>,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub request_timeout_seconds: u64,
    /// Most recent stored messages replayed to the model on each turn.
    pub max_history_messages: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            system_prompt: None,
            max_retries: 3,
            retry_delay_ms: 500,
            request_timeout_seconds: 60,
            max_history_messages: 20,
        }
    }
}

impl ChatConfig {
    /// API key from config, falling back to `GOOGLE_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GoogleConfig {
    pub project_id: Option<String>,
    pub location: String,
    pub access_token: Option<String>,
    pub serviceusage_base_url: String,
    pub language_base_url: String,
    pub dlp_base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            location: "global".to_string(),
            access_token: None,
            serviceusage_base_url: "https://serviceusage.googleapis.com/v1".to_string(),
            language_base_url: "https://language.googleapis.com/v2".to_string(),
            dlp_base_url: "https://dlp.googleapis.com/v2".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl GoogleConfig {
    /// OAuth access token from config, falling back to `GOOGLE_OAUTH_ACCESS_TOKEN`.
    pub fn resolved_access_token(&self) -> Option<String> {
        self.access_token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN").ok())
            .filter(|t| !t.is_empty())
    }
}

impl RagConfig {
    /// Layering: optional TOML file, then `RAG__SECTION__KEY` variables,
    /// then `PORT` and `SESSION_SECRET`.
    pub fn load(path: &str) -> Result<Self, RagError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("RAG").separator("__"))
            .set_override_option("server.port", std::env::var("PORT").ok())?
            .set_override_option("server.session_secret", std::env::var("SESSION_SECRET").ok())?
            .build()?;
        let config: RagConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RagError> {
        match self.server.session_secret.as_deref() {
            None | Some("") => {
                return Err(RagError::InvalidConfig(
                    "server.session_secret is not set (use SESSION_SECRET)".to_string(),
                ))
            }
            Some(s) if s.len() < MIN_SESSION_SECRET_LEN => {
                return Err(RagError::InvalidConfig(format!(
                    "server.session_secret must be at least {} bytes",
                    MIN_SESSION_SECRET_LEN
                )))
            }
            Some(_) => {}
        }

        if !(1..=MAX_SESSION_TIMEOUT_MINUTES).contains(&self.server.session_timeout_minutes) {
            return Err(RagError::InvalidConfig(format!(
                "server.session_timeout_minutes must be between 1 and {}",
                MAX_SESSION_TIMEOUT_MINUTES
            )));
        }

        Ok(())
    }

    /// Socket address string the HTTP listener binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
