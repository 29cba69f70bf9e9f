//! Browser session lifecycle.
//!
//! The state lives client-side in a signed cookie; this module only decides
//! what happens to it on each request. [`SessionState::begin_request`] is the
//! whole lifecycle hook:
//!
//! 1. assign a fresh identifier when none is present,
//! 2. if a previous activity stamp exists and is older than the timeout, the
//!    session is [`SessionPhase::Expired`]: report its identifier for history
//!    cleanup and reset the state,
//! 3. stamp the activity time.
//!
//! A reset session carries no identifier, so the *next* request is the one
//! that receives a new identifier.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default inactivity window.
pub const SESSION_TIMEOUT_MINUTES: i64 = 30;

/// Session payload carried in the signed cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Active,
    Expired,
}

/// Result of running the lifecycle hook for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// State to hand to the handler and write back to the client.
    pub state: SessionState,
    /// Identifier of a session that timed out; its chat history must be cleared.
    pub expired_session_id: Option<String>,
    /// A new identifier was minted during this request.
    pub created: bool,
}

impl SessionState {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Decodes a cookie payload. Malformed payloads are treated as no session.
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn encode(&self) -> String {
        // Two optional plain fields; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// A session without an activity stamp is always active.
    pub fn phase(&self, now: DateTime<Utc>, timeout: Duration) -> SessionPhase {
        match self.last_activity {
            Some(last) if now - last > timeout => SessionPhase::Expired,
            _ => SessionPhase::Active,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = Some(now);
    }

    pub fn begin_request(mut self, now: DateTime<Utc>, timeout: Duration) -> SessionOutcome {
        let mut created = false;
        if self.session_id.is_none() {
            self.session_id = Some(Self::new_id());
            created = true;
        }

        let mut expired_session_id = None;
        if self.phase(now, timeout) == SessionPhase::Expired {
            expired_session_id = self.session_id.take();
            self = SessionState::default();
            created = false;
        }

        self.touch(now);

        SessionOutcome {
            state: self,
            expired_session_id,
            created,
        }
    }
}
