//! RAG chat HTTP API
//!
//! Axum-based HTTP server for the chat frontend. Every route runs behind the
//! session lifecycle middleware (see [`crate::session`]).
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function. The inner functions take the injected services directly and
//! are testable without axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /                         : single-page application shell
//! - GET  /get_nlp_status           : moderation enablement
//! - GET  /get_dlp_status           : redaction enablement
//! - GET  /get_inspect_templates    : DLP inspect templates
//! - GET  /get_deidentify_templates : DLP de-identify templates
//! - POST /prompt                   : one chat turn with optional filtering

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{FromRef, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use axum_extra::extract::cookie::Key;
use chrono::Utc;
use rag_core::config::{ServerConfig, MIN_SESSION_SECRET_LEN};
use rag_core::{
    ChatEngine, ChatError, FilterLevel, ModerationGateway, RagError, RedactionGateway,
    SafetyError, SessionState,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::session::session_lifecycle;

/// Text returned instead of a response that moderation flagged.
pub const INAPPROPRIATE_NOTICE: &str = "The response is deemed inappropriate for display.";

const INDEX_HTML: &str = include_str!("../templates/index.html");

/// Services and settings shared by all handlers. Constructed once at startup.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<dyn ChatEngine>,
    pub moderation: Arc<dyn ModerationGateway>,
    pub redaction: Arc<dyn RedactionGateway>,
    pub session_timeout: chrono::Duration,
    /// Embed the error chain in `/prompt` failure bodies.
    pub expose_error_details: bool,
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(
        chat: Arc<dyn ChatEngine>,
        moderation: Arc<dyn ModerationGateway>,
        redaction: Arc<dyn RedactionGateway>,
        config: &ServerConfig,
    ) -> Result<Self, RagError> {
        let secret = config
            .session_secret
            .as_deref()
            .filter(|s| s.len() >= MIN_SESSION_SECRET_LEN)
            .ok_or_else(|| {
                RagError::InvalidConfig(format!(
                    "session secret must be at least {} bytes",
                    MIN_SESSION_SECRET_LEN
                ))
            })?;

        let session_timeout = chrono::Duration::try_minutes(config.session_timeout_minutes)
            .filter(|t| *t > chrono::Duration::zero())
            .ok_or_else(|| {
                RagError::InvalidConfig(format!(
                    "session timeout of {} minutes is out of range",
                    config.session_timeout_minutes
                ))
            })?;

        Ok(Self {
            chat,
            moderation,
            redaction,
            session_timeout,
            expose_error_details: config.expose_error_details,
            cookie_key: Key::derive_from(secret.as_bytes()),
        })
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

/// Build the Axum router with all endpoints and the session middleware
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/get_nlp_status", get(nlp_status_handler))
        .route("/get_dlp_status", get(dlp_status_handler))
        .route("/get_inspect_templates", get(inspect_templates_handler))
        .route("/get_deidentify_templates", get(deidentify_templates_handler))
        .route("/prompt", post(prompt_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_lifecycle,
        ))
        .with_state(state)
}

/// Start the HTTP server on `addr`.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: AppState,
    addr: &str,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let app = build_router(state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("RAG chat frontend listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    pub prompt: Option<String>,
    /// Number `0..=100` or `low` / `medium` / `high`.
    pub nlp_filter_level: Option<serde_json::Value>,
    pub inspect_template: Option<String>,
    pub deidentify_template: Option<String>,
}

impl PromptRequest {
    /// The template pair, when both are present and non-empty.
    pub fn redaction_templates(&self) -> Option<(&str, &str)> {
        match (
            self.inspect_template.as_deref(),
            self.deidentify_template.as_deref(),
        ) {
            (Some(i), Some(d)) if !i.is_empty() && !d.is_empty() => Some((i, d)),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PromptResponse {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Body of a failed `/prompt` call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptErrorBody {
    pub warnings: Vec<String>,
    pub error: String,
    pub error_message: String,
}

pub enum PromptReply {
    Ok(PromptResponse),
    BadRequest(String),
    Failed(PromptErrorBody),
}

impl IntoResponse for PromptReply {
    fn into_response(self) -> Response {
        match self {
            PromptReply::Ok(response) => (
                StatusCode::OK,
                Json(serde_json::json!({ "response": response })),
            )
                .into_response(),
            PromptReply::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            PromptReply::Failed(body) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("session was reset after inactivity; retry the request")]
    SessionReset,

    #[error("chat turn failed")]
    Chat(#[from] ChatError),

    #[error("moderation failed")]
    Moderation(#[source] SafetyError),

    #[error("redaction failed")]
    Redaction(#[source] SafetyError),
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub async fn nlp_status_inner(moderation: &dyn ModerationGateway) -> (StatusCode, serde_json::Value) {
    match moderation.is_enabled().await {
        Ok(enabled) => (StatusCode::OK, serde_json::json!({ "nlpEnabled": enabled })),
        Err(e) => upstream_failure("moderation status", e),
    }
}

pub async fn dlp_status_inner(redaction: &dyn RedactionGateway) -> (StatusCode, serde_json::Value) {
    match redaction.is_enabled().await {
        Ok(enabled) => (StatusCode::OK, serde_json::json!({ "dlpEnabled": enabled })),
        Err(e) => upstream_failure("redaction status", e),
    }
}

pub async fn inspect_templates_inner(
    redaction: &dyn RedactionGateway,
) -> (StatusCode, serde_json::Value) {
    match redaction.list_inspect_templates().await {
        Ok(templates) => (StatusCode::OK, serde_json::json!(templates)),
        Err(e) => upstream_failure("inspect template listing", e),
    }
}

pub async fn deidentify_templates_inner(
    redaction: &dyn RedactionGateway,
) -> (StatusCode, serde_json::Value) {
    match redaction.list_deidentify_templates().await {
        Ok(templates) => (StatusCode::OK, serde_json::json!(templates)),
        Err(e) => upstream_failure("de-identify template listing", e),
    }
}

/// Inner prompt: validates the request, runs the turn and shapes the reply.
pub async fn prompt_inner(
    state: &AppState,
    session_id: Option<&str>,
    req: PromptRequest,
) -> PromptReply {
    let prompt = match req.prompt.as_deref() {
        Some(p) => p,
        None => return PromptReply::BadRequest("missing required prompt".to_string()),
    };

    let level = match req
        .nlp_filter_level
        .as_ref()
        .map(FilterLevel::from_json)
        .transpose()
    {
        Ok(level) => level,
        Err(e) => return PromptReply::BadRequest(e.to_string()),
    };

    tracing::info!(prompt = %prompt, "Handle user prompt");

    let warnings: Vec<String> = Vec::new();

    match run_prompt(state, session_id, prompt, level, req.redaction_templates()).await {
        Ok(text) => {
            let response = PromptResponse { text, warnings };
            tracing::info!(response = ?response, "Prompt response");
            PromptReply::Ok(response)
        }
        Err(e) => {
            tracing::error!(error = %e, cause = ?std::error::Error::source(&e), "Prompt failed");
            PromptReply::Failed(error_body(e, warnings, state.expose_error_details))
        }
    }
}

/// Chat turn, then moderation, then redaction. A flagged response is replaced
/// by [`INAPPROPRIATE_NOTICE`] and redaction does not run.
async fn run_prompt(
    state: &AppState,
    session_id: Option<&str>,
    prompt: &str,
    level: Option<FilterLevel>,
    templates: Option<(&str, &str)>,
) -> Result<String, PromptError> {
    let session_id = session_id.ok_or(PromptError::SessionReset)?;

    let mut text = state.chat.take_turn(session_id, prompt).await?;

    if let Some(level) = level {
        let flagged = state
            .moderation
            .is_content_inappropriate(&text, level)
            .await
            .map_err(PromptError::Moderation)?;
        if flagged {
            return Ok(INAPPROPRIATE_NOTICE.to_string());
        }
    }

    if let Some((inspect, deidentify)) = templates {
        text = state
            .redaction
            .redact(inspect, deidentify, &text)
            .await
            .map_err(PromptError::Redaction)?;
    }

    Ok(text)
}

/// With `expose_details` the message carries the full error chain (and a
/// backtrace when `RUST_BACKTRACE` is set); otherwise only the top-level error.
pub fn error_body(err: PromptError, warnings: Vec<String>, expose_details: bool) -> PromptErrorBody {
    let error_message = if expose_details {
        let err = anyhow::Error::new(err);
        format!("Error: {:#}\nTraceback:\n{:?}", err, err)
    } else {
        format!("Error: {}", err)
    };

    PromptErrorBody {
        warnings,
        error: "An error occurred".to_string(),
        error_message,
    }
}

fn upstream_failure(what: &str, err: SafetyError) -> (StatusCode, serde_json::Value) {
    tracing::error!(error = %err, "{} failed", what);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        serde_json::json!(ErrorResponse::new(err.to_string())),
    )
}

// ============================================================================
// Axum handler wrappers (thin: delegate to inner functions)
// ============================================================================

pub async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn nlp_status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (status, body) = nlp_status_inner(state.moderation.as_ref()).await;
    (status, Json(body))
}

pub async fn dlp_status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (status, body) = dlp_status_inner(state.redaction.as_ref()).await;
    (status, Json(body))
}

pub async fn inspect_templates_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (status, body) = inspect_templates_inner(state.redaction.as_ref()).await;
    (status, Json(body))
}

pub async fn deidentify_templates_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (status, body) = deidentify_templates_inner(state.redaction.as_ref()).await;
    (status, Json(body))
}

pub async fn prompt_handler(
    State(state): State<AppState>,
    Extension(mut session): Extension<SessionState>,
    Json(req): Json<PromptRequest>,
) -> impl IntoResponse {
    session.touch(Utc::now());
    let reply = prompt_inner(&state, session.session_id.as_deref(), req).await;
    (Extension(session), reply)
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rag_core::TemplateDescriptor;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubChat {
        reply: Option<String>,
        turns: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChatEngine for StubChat {
        async fn take_turn(&self, session_id: &str, prompt: &str) -> Result<String, ChatError> {
            self.turns
                .lock()
                .unwrap()
                .push((session_id.to_string(), prompt.to_string()));
            self.reply.clone().ok_or(ChatError::EmptyResponse)
        }

        async fn clear_history(&self, _session_id: &str) -> Result<(), ChatError> {
            Ok(())
        }
    }

    struct StubModeration {
        enabled: bool,
        inappropriate: bool,
    }

    #[async_trait]
    impl ModerationGateway for StubModeration {
        async fn is_enabled(&self) -> Result<bool, SafetyError> {
            Ok(self.enabled)
        }

        async fn is_content_inappropriate(
            &self,
            _text: &str,
            _level: FilterLevel,
        ) -> Result<bool, SafetyError> {
            Ok(self.inappropriate)
        }
    }

    #[derive(Default)]
    struct StubRedaction {
        calls: Mutex<usize>,
        fail: bool,
    }

    #[async_trait]
    impl RedactionGateway for StubRedaction {
        async fn is_enabled(&self) -> Result<bool, SafetyError> {
            if self.fail {
                return Err(SafetyError::MissingProject);
            }
            Ok(true)
        }

        async fn list_inspect_templates(&self) -> Result<Vec<TemplateDescriptor>, SafetyError> {
            Ok(vec![TemplateDescriptor {
                name: "projects/p/inspectTemplates/i1".to_string(),
                display_name: "Inspect".to_string(),
                description: String::new(),
            }])
        }

        async fn list_deidentify_templates(
            &self,
        ) -> Result<Vec<TemplateDescriptor>, SafetyError> {
            Ok(Vec::new())
        }

        async fn redact(
            &self,
            _inspect_template: &str,
            _deidentify_template: &str,
            _text: &str,
        ) -> Result<String, SafetyError> {
            *self.calls.lock().unwrap() += 1;
            Ok("[REDACTED]".to_string())
        }
    }

    fn server_config() -> ServerConfig {
        ServerConfig {
            session_secret: Some("s".repeat(MIN_SESSION_SECRET_LEN)),
            ..ServerConfig::default()
        }
    }

    fn state(
        chat: Arc<StubChat>,
        inappropriate: bool,
        redaction: Arc<StubRedaction>,
    ) -> AppState {
        AppState::new(
            chat,
            Arc::new(StubModeration {
                enabled: true,
                inappropriate,
            }),
            redaction,
            &server_config(),
        )
        .unwrap()
    }

    fn answering(text: &str) -> Arc<StubChat> {
        Arc::new(StubChat {
            reply: Some(text.to_string()),
            ..StubChat::default()
        })
    }

    fn request(prompt: &str) -> PromptRequest {
        PromptRequest {
            prompt: Some(prompt.to_string()),
            ..PromptRequest::default()
        }
    }

    #[test]
    fn test_app_state_rejects_short_secret() {
        let mut config = server_config();
        config.session_secret = Some("short".to_string());
        let result = AppState::new(
            answering("x"),
            Arc::new(StubModeration {
                enabled: false,
                inappropriate: false,
            }),
            Arc::new(StubRedaction::default()),
            &config,
        );
        assert!(matches!(result, Err(RagError::InvalidConfig(_))));
    }

    #[test]
    fn test_app_state_rejects_out_of_range_timeout() {
        let mut config = server_config();
        config.session_timeout_minutes = 200_000_000_000_000_000;
        let result = AppState::new(
            answering("x"),
            Arc::new(StubModeration {
                enabled: false,
                inappropriate: false,
            }),
            Arc::new(StubRedaction::default()),
            &config,
        );
        assert!(matches!(result, Err(RagError::InvalidConfig(_))));
    }

    #[test]
    fn test_redaction_templates_require_both_non_empty() {
        let mut req = request("p");
        assert!(req.redaction_templates().is_none());

        req.inspect_template = Some("i".to_string());
        assert!(req.redaction_templates().is_none());

        req.deidentify_template = Some(String::new());
        assert!(req.redaction_templates().is_none());

        req.deidentify_template = Some("d".to_string());
        assert_eq!(req.redaction_templates(), Some(("i", "d")));
    }

    #[tokio::test]
    async fn test_prompt_inner_missing_prompt_is_bad_request() {
        let state = state(answering("x"), false, Arc::new(StubRedaction::default()));
        let reply = prompt_inner(&state, Some("s1"), PromptRequest::default()).await;
        assert!(matches!(reply, PromptReply::BadRequest(ref m) if m == "missing required prompt"));
    }

    #[tokio::test]
    async fn test_prompt_inner_invalid_filter_level_is_bad_request() {
        let chat = answering("x");
        let state = state(chat.clone(), false, Arc::new(StubRedaction::default()));
        let mut req = request("hello");
        req.nlp_filter_level = Some(serde_json::json!("extreme"));

        let reply = prompt_inner(&state, Some("s1"), req).await;
        assert!(matches!(reply, PromptReply::BadRequest(_)));
        assert!(chat.turns.lock().unwrap().is_empty(), "no turn on invalid input");
    }

    #[tokio::test]
    async fn test_prompt_inner_passes_session_and_prompt() {
        let chat = answering("hi there");
        let state = state(chat.clone(), false, Arc::new(StubRedaction::default()));

        let reply = prompt_inner(&state, Some("s1"), request("hello")).await;
        match reply {
            PromptReply::Ok(r) => assert_eq!(r.text, "hi there"),
            _ => panic!("Expected Ok reply"),
        }
        assert_eq!(
            chat.turns.lock().unwrap().as_slice(),
            &[("s1".to_string(), "hello".to_string())]
        );
    }

    #[tokio::test]
    async fn test_prompt_inner_moderation_short_circuits_redaction() {
        let redaction = Arc::new(StubRedaction::default());
        let state = state(answering("rude"), true, redaction.clone());
        let mut req = request("hello");
        req.nlp_filter_level = Some(serde_json::json!(50));
        req.inspect_template = Some("i".to_string());
        req.deidentify_template = Some("d".to_string());

        match prompt_inner(&state, Some("s1"), req).await {
            PromptReply::Ok(r) => assert_eq!(r.text, INAPPROPRIATE_NOTICE),
            _ => panic!("Expected Ok reply"),
        }
        assert_eq!(*redaction.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prompt_inner_redacts_after_passing_moderation() {
        let redaction = Arc::new(StubRedaction::default());
        let state = state(answering("call 555-0100"), false, redaction.clone());
        let mut req = request("hello");
        req.nlp_filter_level = Some(serde_json::json!("low"));
        req.inspect_template = Some("i".to_string());
        req.deidentify_template = Some("d".to_string());

        match prompt_inner(&state, Some("s1"), req).await {
            PromptReply::Ok(r) => assert_eq!(r.text, "[REDACTED]"),
            _ => panic!("Expected Ok reply"),
        }
        assert_eq!(*redaction.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prompt_inner_without_session_fails() {
        let chat = answering("x");
        let state = state(chat.clone(), false, Arc::new(StubRedaction::default()));

        match prompt_inner(&state, None, request("hello")).await {
            PromptReply::Failed(body) => {
                assert_eq!(body.error, "An error occurred");
                assert!(body.error_message.contains("session was reset"));
            }
            _ => panic!("Expected Failed reply"),
        }
        assert!(chat.turns.lock().unwrap().is_empty());
    }

    #[test]
    fn test_error_body_with_details_includes_cause_chain() {
        let body = error_body(
            PromptError::Chat(ChatError::Api {
                code: 503,
                message: "overloaded".to_string(),
            }),
            Vec::new(),
            true,
        );
        assert_eq!(body.error, "An error occurred");
        assert!(body.error_message.starts_with("Error: chat turn failed"));
        assert!(body.error_message.contains("Traceback:"));
        assert!(body.error_message.contains("overloaded"));
    }

    #[test]
    fn test_error_body_without_details_hides_chain() {
        let body = error_body(
            PromptError::Chat(ChatError::Api {
                code: 503,
                message: "overloaded".to_string(),
            }),
            Vec::new(),
            false,
        );
        assert_eq!(body.error_message, "Error: chat turn failed");
    }

    #[tokio::test]
    async fn test_status_inner_functions() {
        let moderation = StubModeration {
            enabled: false,
            inappropriate: false,
        };
        let (status, body) = nlp_status_inner(&moderation).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "nlpEnabled": false }));

        let redaction = StubRedaction::default();
        let (status, body) = dlp_status_inner(&redaction).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "dlpEnabled": true }));
    }

    #[tokio::test]
    async fn test_dlp_status_inner_upstream_failure_is_500() {
        let redaction = StubRedaction {
            fail: true,
            ..StubRedaction::default()
        };
        let (status, body) = dlp_status_inner(&redaction).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_template_inner_functions() {
        let redaction = StubRedaction::default();
        let (status, body) = inspect_templates_inner(&redaction).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["displayName"], "Inspect");

        let (status, body) = deidentify_templates_inner(&redaction).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }
}
