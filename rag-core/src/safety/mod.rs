//! Content-safety gateways.
//!
//! Two independent façades over Google Cloud services:
//! - [`ModerationGateway`]: Natural Language text moderation
//! - [`RedactionGateway`]: Sensitive Data Protection (DLP) de-identification
//!
//! Both report whether their backing API is enabled for the project; the HTTP
//! layer exposes that to the browser so it can offer the matching controls.

mod auth;
mod google;
mod moderation;
mod redaction;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use auth::{AccessTokenSource, DefaultCredentials, StaticToken, CLOUD_PLATFORM_SCOPE};
pub use google::GoogleApiClient;
pub use moderation::NaturalLanguageModeration;
pub use redaction::DlpRedaction;

#[async_trait]
pub trait ModerationGateway: Send + Sync {
    async fn is_enabled(&self) -> Result<bool, SafetyError>;

    /// True when any moderation category is over the threshold for `level`.
    async fn is_content_inappropriate(
        &self,
        text: &str,
        level: FilterLevel,
    ) -> Result<bool, SafetyError>;
}

#[async_trait]
pub trait RedactionGateway: Send + Sync {
    async fn is_enabled(&self) -> Result<bool, SafetyError>;

    async fn list_inspect_templates(&self) -> Result<Vec<TemplateDescriptor>, SafetyError>;

    async fn list_deidentify_templates(&self) -> Result<Vec<TemplateDescriptor>, SafetyError>;

    /// De-identify `text` with the given inspect / de-identify template pair.
    async fn redact(
        &self,
        inspect_template: &str,
        deidentify_template: &str,
        text: &str,
    ) -> Result<String, SafetyError>;
}

/// A redaction template as listed by the DLP API. `name` is the full resource
/// path the browser sends back in `/prompt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDescriptor {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} API error ({code}): {message}")]
    Api {
        service: &'static str,
        code: u16,
        message: String,
    },

    #[error("Google credentials unavailable: {0}")]
    Auth(#[from] gcp_auth::Error),

    #[error("Google Cloud project is not configured")]
    MissingProject,

    #[error("Invalid filter level: {0}")]
    InvalidFilterLevel(String),

    #[error("DLP response did not contain a de-identified item")]
    MissingItem,
}

// ============================================================================
// FilterLevel
// ============================================================================

/// Moderation strictness from 0 (off) to 100 (flag anything the classifier
/// has any confidence in).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterLevel(u8);

impl FilterLevel {
    pub const OFF: FilterLevel = FilterLevel(0);
    pub const LOW: FilterLevel = FilterLevel(25);
    pub const MEDIUM: FilterLevel = FilterLevel(50);
    pub const HIGH: FilterLevel = FilterLevel(75);

    pub fn new(level: u8) -> Result<Self, SafetyError> {
        if level > 100 {
            return Err(SafetyError::InvalidFilterLevel(level.to_string()));
        }
        Ok(FilterLevel(level))
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Confidence a category has to exceed to be flagged.
    pub fn threshold(&self) -> f64 {
        1.0 - f64::from(self.0) / 100.0
    }

    pub fn flags(&self, confidence: f64) -> bool {
        self.0 > 0 && confidence > self.threshold()
    }

    /// Accepts a number in `0..=100`, a numeric string, or `low` / `medium` / `high`.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, SafetyError> {
        match value {
            serde_json::Value::Number(n) => n
                .as_u64()
                .and_then(|v| u8::try_from(v).ok())
                .ok_or_else(|| SafetyError::InvalidFilterLevel(n.to_string()))
                .and_then(FilterLevel::new),
            serde_json::Value::String(s) => s.parse(),
            other => Err(SafetyError::InvalidFilterLevel(other.to_string())),
        }
    }
}

impl std::str::FromStr for FilterLevel {
    type Err = SafetyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(FilterLevel::OFF),
            "low" => Ok(FilterLevel::LOW),
            "medium" => Ok(FilterLevel::MEDIUM),
            "high" => Ok(FilterLevel::HIGH),
            other => other
                .parse::<u8>()
                .map_err(|_| SafetyError::InvalidFilterLevel(s.to_string()))
                .and_then(FilterLevel::new),
        }
    }
}

impl fmt::Display for FilterLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
