//! Session lifecycle middleware.
//!
//! Reads the signed `session` cookie, runs [`SessionState::begin_request`],
//! clears chat history for a session that timed out, hands the resulting
//! [`SessionState`] to the handler as a request extension and writes it back
//! as a cookie. A handler may return an updated `SessionState` in the
//! response extensions; that value wins over the one computed here.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use chrono::Utc;
use rag_core::SessionState;

use crate::http::AppState;

pub const SESSION_COOKIE: &str = "session";

pub async fn session_lifecycle(
    State(app): State<AppState>,
    jar: SignedCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let stored = jar
        .get(SESSION_COOKIE)
        .and_then(|c| SessionState::decode(c.value()))
        .unwrap_or_default();

    let outcome = stored.begin_request(Utc::now(), app.session_timeout);

    if let Some(expired) = outcome.expired_session_id.as_deref() {
        tracing::info!(session_id = %expired, "Session inactive: cleaning up chat history");
        if let Err(e) = app.chat.clear_history(expired).await {
            tracing::warn!(
                session_id = %expired,
                error = %e,
                "Failed to clear chat history for expired session"
            );
        }
    }

    if outcome.created {
        tracing::debug!(session_id = ?outcome.state.session_id, "New session");
    }

    request.extensions_mut().insert(outcome.state.clone());

    let mut response = next.run(request).await;

    let state = response
        .extensions_mut()
        .remove::<SessionState>()
        .unwrap_or(outcome.state);

    (jar.add(session_cookie(&state)), response).into_response()
}

/// Browser-session cookie (no Max-Age) carrying the encoded state.
pub fn session_cookie(state: &SessionState) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, state.encode()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}
