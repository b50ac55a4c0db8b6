use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::model::NotionCredentials;
use crate::notion::model::{markdown_to_blocks, CreatePageResponse, MAX_CHILDREN_PER_REQUEST};

pub mod model;

const NOTION_API_BASE: &str = "https://api.notion.com/";

/// Creates note pages in a user's Notion database.
#[async_trait]
pub trait NotionService: Send + Sync {
    /// Create a page titled `title` whose body is `markdown`; returns the page id.
    async fn create_page(
        &self,
        credentials: &NotionCredentials,
        title: &str,
        markdown: &str,
    ) -> Result<String>;
}

/// HTTP client for the Notion API. Tokens are per user, so the client itself
/// only carries the API version and the target title property.
#[derive(Clone)]
pub struct NotionClient {
    http: Client,
    base_url: Url,
    version: String,
    title_property: String,
}

impl fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionClient")
            .field("base_url", &self.base_url)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl NotionClient {
    pub fn new(version: String, title_property: String) -> Result<Self> {
        let base_url = Url::parse(NOTION_API_BASE).context("invalid default Notion URL")?;
        Self::with_base_url(version, title_property, base_url)
    }

    pub fn with_base_url(version: String, title_property: String, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("tg-voicenotes/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build Notion HTTP client")?;
        Ok(Self {
            http,
            base_url,
            version,
            title_property,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(cfg.notion.version.clone(), cfg.notion.title_property.clone())
    }

    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        token: &str,
        body: &Value,
    ) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(path)
            .context("invalid Notion base URL")?;
        self.http
            .request(method, endpoint)
            .header("Authorization", format!("Bearer {}", token))
            .header("Notion-Version", &self.version)
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build Notion request")
    }

    async fn execute(&self, request: reqwest::Request) -> Result<String> {
        debug!(method = %request.method(), url = %request.url(), "notion request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Notion")?;

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!(%body, "rate limited by Notion");
            return Err(anyhow!("received 429 from Notion: {}", body));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, %body, "Notion API error");
            return Err(anyhow!("notion error {}: {}", status, body));
        }
        res.text().await.context("failed to read Notion response")
    }

    async fn append_children(&self, token: &str, page_id: &str, children: &[Value]) -> Result<()> {
        let body = json!({ "children": children });
        let request = self.build_request(
            Method::PATCH,
            &format!("v1/blocks/{}/children", page_id),
            token,
            &body,
        )?;
        self.execute(request).await?;
        Ok(())
    }
}

#[async_trait]
impl NotionService for NotionClient {
    async fn create_page(
        &self,
        credentials: &NotionCredentials,
        title: &str,
        markdown: &str,
    ) -> Result<String> {
        let blocks = markdown_to_blocks(markdown);
        let (first, rest) = blocks.split_at(blocks.len().min(MAX_CHILDREN_PER_REQUEST));

        let body = build_page_request(
            &credentials.database_id,
            &self.title_property,
            title,
            first,
        );
        let request = self.build_request(Method::POST, "v1/pages", &credentials.token, &body)?;
        let response = self.execute(request).await?;
        let page: CreatePageResponse =
            serde_json::from_str(&response).context("invalid Notion response JSON")?;

        for chunk in rest.chunks(MAX_CHILDREN_PER_REQUEST) {
            self.append_children(&credentials.token, &page.id, chunk)
                .await
                .with_context(|| format!("failed to append blocks to page {}", page.id))?;
        }

        info!(page_id = %page.id, blocks = blocks.len(), "created Notion page");
        Ok(page.id)
    }
}

pub fn build_page_request(
    database_id: &str,
    title_property: &str,
    title: &str,
    children: &[Value],
) -> Value {
    let mut properties = Map::new();
    properties.insert(
        title_property.to_string(),
        json!({
            "title": [
                {
                    "text": {
                        "content": title,
                    }
                }
            ]
        }),
    );

    json!({
        "parent": { "database_id": database_id },
        "properties": Value::Object(properties),
        "children": children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_page_request_includes_title_and_children() {
        let children = markdown_to_blocks("## Summary\n\ngreeting");
        let body = build_page_request("db-1", "Name", "Transcription 01.02.2026 10:00", &children);
        assert_eq!(body["parent"]["database_id"], "db-1");
        assert_eq!(
            body["properties"]["Name"]["title"][0]["text"]["content"],
            "Transcription 01.02.2026 10:00"
        );
        assert_eq!(body["children"].as_array().unwrap().len(), 2);
        assert_eq!(body["children"][1]["type"], "paragraph");
    }

    #[test]
    fn build_page_request_uses_configured_title_property() {
        let body = build_page_request("db-1", "Title", "t", &[]);
        assert!(body["properties"].get("Name").is_none());
        assert_eq!(body["properties"]["Title"]["title"][0]["text"]["content"], "t");
    }

    #[test]
    fn build_request_sets_headers() {
        let client = NotionClient::new("2022-06-28".into(), "Name".into()).unwrap();
        let body = json!({ "sample": true });
        let request = client
            .build_request(Method::POST, "v1/pages", "token", &body)
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/v1/pages");
        let headers = request.headers();
        assert_eq!(
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer token"
        );
        assert_eq!(
            headers
                .get("Notion-Version")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "2022-06-28"
        );
    }

    #[test]
    fn append_path_targets_page_children() {
        let client = NotionClient::new("2022-06-28".into(), "Name".into()).unwrap();
        let request = client
            .build_request(
                Method::PATCH,
                "v1/blocks/page-1/children",
                "token",
                &json!({ "children": [] }),
            )
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::PATCH);
        assert_eq!(request.url().path(), "/v1/blocks/page-1/children");
    }
}
