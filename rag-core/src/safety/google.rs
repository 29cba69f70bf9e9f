use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;

use super::auth::{AccessTokenSource, DefaultCredentials, StaticToken};
use super::SafetyError;
use crate::config::GoogleConfig;

#[derive(Debug, Deserialize)]
struct ServiceState {
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    code: u16,
    message: String,
}

/// Authenticated REST client shared by the Google Cloud gateways.
#[derive(Clone)]
pub struct GoogleApiClient {
    client: Client,
    config: GoogleConfig,
    tokens: Option<Arc<dyn AccessTokenSource>>,
}

impl GoogleApiClient {
    /// Client authorized with the configured static token, if any.
    pub fn new(config: GoogleConfig) -> Result<Self, SafetyError> {
        let tokens = config
            .resolved_access_token()
            .map(|t| Arc::new(StaticToken::new(t)) as Arc<dyn AccessTokenSource>);
        Self::with_token_source(config, tokens)
    }

    pub fn with_token_source(
        config: GoogleConfig,
        tokens: Option<Arc<dyn AccessTokenSource>>,
    ) -> Result<Self, SafetyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            tokens,
        })
    }

    /// A configured static token wins; otherwise Application Default
    /// Credentials are discovered. Without either, requests go out
    /// unauthenticated.
    pub async fn connect(config: GoogleConfig) -> Result<Self, SafetyError> {
        if config.resolved_access_token().is_some() {
            tracing::info!("Using static Google access token");
            return Self::new(config);
        }

        let tokens: Option<Arc<dyn AccessTokenSource>> = match DefaultCredentials::discover().await
        {
            Ok(credentials) => Some(Arc::new(credentials)),
            Err(e) => {
                tracing::warn!(error = %e, "No Google Application Default Credentials found");
                None
            }
        };
        Self::with_token_source(config, tokens)
    }

    pub fn config(&self) -> &GoogleConfig {
        &self.config
    }

    pub fn project_id(&self) -> Option<&str> {
        self.config.project_id.as_deref().filter(|p| !p.is_empty())
    }

    /// `projects/{project}/locations/{location}`, the parent of DLP resources.
    pub fn location_parent(&self) -> Result<String, SafetyError> {
        let project = self.project_id().ok_or(SafetyError::MissingProject)?;
        Ok(format!(
            "projects/{}/locations/{}",
            project, self.config.location
        ))
    }

    pub async fn get(&self, url: &str) -> Result<RequestBuilder, SafetyError> {
        self.authorize(self.client.get(url)).await
    }

    pub async fn post(&self, url: &str) -> Result<RequestBuilder, SafetyError> {
        self.authorize(self.client.post(url)).await
    }

    /// Fetches a token per request so refreshed credentials are picked up.
    async fn authorize(&self, builder: RequestBuilder) -> Result<RequestBuilder, SafetyError> {
        let builder = match self.project_id() {
            Some(project) => builder.header("x-goog-user-project", project),
            None => builder,
        };
        match &self.tokens {
            Some(tokens) => Ok(builder.bearer_auth(tokens.access_token().await?)),
            None => Ok(builder),
        }
    }

    /// Turns a non-2xx response into `SafetyError::Api`.
    pub async fn check(
        service: &'static str,
        response: Response,
    ) -> Result<Response, SafetyError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_body = response.text().await.unwrap_or_default();
        let (code, message) = serde_json::from_str::<ErrorResponse>(&error_body)
            .ok()
            .and_then(|e| e.error)
            .map(|e| (e.code, e.message))
            .unwrap_or((status.as_u16(), error_body));

        tracing::error!(service, code = code, message = %message, "Google API error");

        Err(SafetyError::Api {
            service,
            code,
            message,
        })
    }

    /// Asks Service Usage whether `service` (e.g. `dlp.googleapis.com`) is
    /// enabled. Without a configured project the feature is reported off.
    pub async fn is_service_enabled(&self, service: &str) -> Result<bool, SafetyError> {
        let project = match self.project_id() {
            Some(p) => p,
            None => return Ok(false),
        };

        let url = format!(
            "{}/projects/{}/services/{}",
            self.config.serviceusage_base_url, project, service
        );
        let response = Self::check("serviceusage", self.get(&url).await?.send().await?).await?;
        let body: ServiceState = response.json().await?;

        Ok(body.state == "ENABLED")
    }
}
