use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GoogleApiClient, RedactionGateway, SafetyError, TemplateDescriptor};

const SERVICE: &str = "dlp.googleapis.com";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeidentifyRequest<'a> {
    inspect_template_name: &'a str,
    deidentify_template_name: &'a str,
    item: ContentItem,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentItem {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct DeidentifyResponse {
    item: Option<ContentItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplatePage {
    #[serde(default, alias = "inspectTemplates", alias = "deidentifyTemplates")]
    templates: Vec<TemplateDescriptor>,
    #[serde(default)]
    next_page_token: String,
}

/// Sensitive Data Protection (DLP) `content:deidentify` with stored templates.
pub struct DlpRedaction {
    api: GoogleApiClient,
}

impl DlpRedaction {
    pub fn new(api: GoogleApiClient) -> Self {
        Self { api }
    }

    /// Lists every template under the project parent, following page tokens.
    /// `collection` is `inspectTemplates` or `deidentifyTemplates`.
    async fn list_templates(
        &self,
        collection: &str,
    ) -> Result<Vec<TemplateDescriptor>, SafetyError> {
        let parent = match self.api.location_parent() {
            Ok(p) => p,
            Err(SafetyError::MissingProject) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let url = format!("{}/{}/{}", self.api.config().dlp_base_url, parent, collection);

        let mut templates = Vec::new();
        let mut page_token = String::new();
        loop {
            let mut request = self.api.get(&url).await?;
            if !page_token.is_empty() {
                request = request.query(&[("pageToken", page_token.as_str())]);
            }
            let page: TemplatePage = GoogleApiClient::check("dlp", request.send().await?)
                .await?
                .json()
                .await?;

            templates.extend(page.templates);
            if page.next_page_token.is_empty() {
                break;
            }
            page_token = page.next_page_token;
        }

        tracing::debug!(collection, count = templates.len(), "Listed DLP templates");
        Ok(templates)
    }
}

#[async_trait]
impl RedactionGateway for DlpRedaction {
    async fn is_enabled(&self) -> Result<bool, SafetyError> {
        self.api.is_service_enabled(SERVICE).await
    }

    async fn list_inspect_templates(&self) -> Result<Vec<TemplateDescriptor>, SafetyError> {
        self.list_templates("inspectTemplates").await
    }

    async fn list_deidentify_templates(&self) -> Result<Vec<TemplateDescriptor>, SafetyError> {
        self.list_templates("deidentifyTemplates").await
    }

    async fn redact(
        &self,
        inspect_template: &str,
        deidentify_template: &str,
        text: &str,
    ) -> Result<String, SafetyError> {
        let parent = self.api.location_parent()?;
        let url = format!("{}/{}/content:deidentify", self.api.config().dlp_base_url, parent);

        let request = DeidentifyRequest {
            inspect_template_name: inspect_template,
            deidentify_template_name: deidentify_template,
            item: ContentItem {
                value: text.to_string(),
            },
        };

        let response = self.api.post(&url).await?.json(&request).send().await?;
        let body: DeidentifyResponse = GoogleApiClient::check("dlp", response)
            .await?
            .json()
            .await?;

        body.item.map(|i| i.value).ok_or(SafetyError::MissingItem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::google::tests::test_config;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PARENT: &str = "/projects/demo/locations/global";

    fn gateway(server: &MockServer, project: Option<&str>) -> DlpRedaction {
        DlpRedaction::new(GoogleApiClient::new(test_config(&server.uri(), project)).unwrap())
    }

    #[tokio::test]
    async fn test_redact_sends_template_pair() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}/content:deidentify", PARENT)))
            .and(body_json(serde_json::json!({
                "inspectTemplateName": "projects/demo/inspectTemplates/i1",
                "deidentifyTemplateName": "projects/demo/deidentifyTemplates/d1",
                "item": { "value": "mail me at a@b.com" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "item": { "value": "mail me at [EMAIL_ADDRESS]" },
                "overview": { "transformedBytes": "7" }
            })))
            .mount(&mock_server)
            .await;

        let dlp = gateway(&mock_server, Some("demo"));
        let text = dlp
            .redact(
                "projects/demo/inspectTemplates/i1",
                "projects/demo/deidentifyTemplates/d1",
                "mail me at a@b.com",
            )
            .await
            .unwrap();
        assert_eq!(text, "mail me at [EMAIL_ADDRESS]");
    }

    #[tokio::test]
    async fn test_redact_without_item_is_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&mock_server)
            .await;

        let dlp = gateway(&mock_server, Some("demo"));
        assert!(matches!(
            dlp.redact("i", "d", "text").await,
            Err(SafetyError::MissingItem)
        ));
    }

    #[tokio::test]
    async fn test_list_inspect_templates_follows_pages() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/inspectTemplates", PARENT)))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "inspectTemplates": [{ "name": "t2", "displayName": "Second" }]
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/inspectTemplates", PARENT)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "inspectTemplates": [{ "name": "t1", "displayName": "First" }],
                "nextPageToken": "p2"
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        let dlp = gateway(&mock_server, Some("demo"));
        let names: Vec<String> = dlp
            .list_inspect_templates()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn test_list_deidentify_templates() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/deidentifyTemplates", PARENT)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "deidentifyTemplates": [
                    { "name": "d1", "displayName": "Mask", "description": "masks PII" }
                ]
            })))
            .mount(&mock_server)
            .await;

        let dlp = gateway(&mock_server, Some("demo"));
        let templates = dlp.list_deidentify_templates().await.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].description, "masks PII");
    }

    #[tokio::test]
    async fn test_list_without_project_is_empty() {
        let mock_server = MockServer::start().await;
        let dlp = gateway(&mock_server, None);
        assert!(dlp.list_inspect_templates().await.unwrap().is_empty());
        assert!(matches!(
            dlp.redact("i", "d", "text").await,
            Err(SafetyError::MissingProject)
        ));
    }
}
