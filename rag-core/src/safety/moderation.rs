use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{FilterLevel, GoogleApiClient, ModerationGateway, SafetyError};

const SERVICE: &str = "language.googleapis.com";

#[derive(Debug, Serialize)]
struct ModerateRequest<'a> {
    document: Document<'a>,
}

#[derive(Debug, Serialize)]
struct Document<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModerateResponse {
    #[serde(default)]
    moderation_categories: Vec<ModerationCategory>,
}

#[derive(Debug, Deserialize)]
struct ModerationCategory {
    name: String,
    #[serde(default)]
    confidence: f64,
}

/// Cloud Natural Language `documents:moderateText`.
pub struct NaturalLanguageModeration {
    api: GoogleApiClient,
}

impl NaturalLanguageModeration {
    pub fn new(api: GoogleApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ModerationGateway for NaturalLanguageModeration {
    async fn is_enabled(&self) -> Result<bool, SafetyError> {
        self.api.is_service_enabled(SERVICE).await
    }

    async fn is_content_inappropriate(
        &self,
        text: &str,
        level: FilterLevel,
    ) -> Result<bool, SafetyError> {
        if level == FilterLevel::OFF {
            return Ok(false);
        }

        let url = format!("{}/documents:moderateText", self.api.config().language_base_url);
        let request = ModerateRequest {
            document: Document {
                kind: "PLAIN_TEXT",
                content: text,
            },
        };

        let response = self.api.post(&url).await?.json(&request).send().await?;
        let body: ModerateResponse = GoogleApiClient::check("language", response)
            .await?
            .json()
            .await?;

        let flagged = body
            .moderation_categories
            .iter()
            .find(|c| level.flags(c.confidence));

        if let Some(category) = flagged {
            tracing::info!(
                category = %category.name,
                confidence = category.confidence,
                level = level.value(),
                "Response flagged by moderation"
            );
        }

        Ok(flagged.is_some())
    }
}
