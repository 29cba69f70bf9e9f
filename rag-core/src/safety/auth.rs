use std::sync::Arc;

use async_trait::async_trait;

use super::SafetyError;

/// OAuth scope covering Service Usage, Natural Language and DLP.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Supplies a bearer token for each outgoing Google Cloud request.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, SafetyError>;
}

/// A fixed token from `google.access_token` / `GOOGLE_OAUTH_ACCESS_TOKEN`.
/// It is never refreshed.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, SafetyError> {
        Ok(self.0.clone())
    }
}

/// Application Default Credentials: `GOOGLE_APPLICATION_CREDENTIALS`, gcloud
/// user credentials or the GCE/GKE metadata server. The provider caches the
/// token and fetches a new one shortly before it expires.
pub struct DefaultCredentials {
    provider: Arc<dyn gcp_auth::TokenProvider>,
}

impl DefaultCredentials {
    pub async fn discover() -> Result<Self, SafetyError> {
        let provider = gcp_auth::provider().await?;
        Ok(Self { provider })
    }
}

#[async_trait]
impl AccessTokenSource for DefaultCredentials {
    async fn access_token(&self) -> Result<String, SafetyError> {
        let token = self.provider.token(&[CLOUD_PLATFORM_SCOPE]).await?;
        Ok(token.as_str().to_string())
    }
}
