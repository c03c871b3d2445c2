use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    config::RepositoryConfig,
    model::{CandidateRecord, ContentMetadata, Environment},
};

/// Free-text index property; matches any token the repository indexed.
pub const PROP_FREE_TEXT: &str = "ngsearchword";
/// Exact-match URL property.
pub const PROP_URL_EXACT: &str = "ccm:wwwurl";

const TITLE_PROPS: &[&str] = &["cclom:title", "cm:name", "cm:title"];
const CANDIDATE_TITLE_PROPS: &[&str] = &["cclom:title", "cm:name"];
const DESCRIPTION_PROPS: &[&str] = &["cclom:general_description", "cm:description"];
const CANDIDATE_DESCRIPTION_PROPS: &[&str] = &["cclom:general_description"];
const KEYWORD_PROP: &str = "cclom:general_keyword";
const URL_PROPS: &[&str] = &["ccm:wwwurl", "cclom:location"];

/// Paginated property query against the remote repository. The orchestrator
/// and enrichment depend on this seam, not on the concrete client, so tests
/// can run against a mock repository.
#[async_trait]
pub trait NodeQuery: Send + Sync {
    async fn query_by_property(
        &self,
        property: &str,
        value: &str,
        max_items: u32,
    ) -> Vec<CandidateRecord>;
}

/// Full-metadata fetch for a single node; `Ok(None)` means not found.
#[async_trait]
pub trait NodeFetch: Send + Sync {
    async fn fetch_metadata(&self, node_id: &str) -> Result<Option<ContentMetadata>>;
}

/// HTTP client for the repository's node and search APIs.
pub struct RepositoryClient {
    http: Client,
    base_url: String,
    repository: String,
    timeout: Duration,
    max_retries: u32,
    page_size: u32,
}

impl RepositoryClient {
    pub fn new(http: Client, config: &RepositoryConfig, environment: Environment) -> Self {
        Self {
            http,
            base_url: config.base_url(environment).trim_end_matches('/').to_string(),
            repository: config.repository.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            max_retries: config.max_retries,
            page_size: config.page_size.max(1),
        }
    }

    /// Fetch the raw node record; `None` when the repository does not know
    /// the id.
    pub async fn fetch_node(&self, node_id: &str) -> Result<Option<Value>> {
        let endpoint = format!(
            "{}/node/v1/nodes/{}/{}/metadata",
            self.base_url, self.repository, node_id
        );

        let response = self
            .send_with_retry(|| {
                self.http
                    .request(Method::GET, &endpoint)
                    .query(&[("propertyFilter", "-all-")])
                    .timeout(self.timeout)
            })
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(anyhow!(
                "node fetch returned status {} for {}",
                response.status(),
                node_id
            ));
        }

        let data: Value = response
            .json()
            .await
            .context("failed to parse node metadata response")?;

        // The record lives under "node"; fall back to the body itself.
        Ok(Some(data.get("node").cloned().unwrap_or(data)))
    }

    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0u32;
        loop {
            let result = build().send().await;
            let retryable = match &result {
                Ok(response) => {
                    let status = response.status();
                    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
                }
                Err(_) => true,
            };

            if !retryable || attempt >= self.max_retries {
                return result.context("repository request failed");
            }

            attempt += 1;
            let backoff = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(attempt, backoff_secs = backoff.as_secs(), "retrying repository request");
            tokio::time::sleep(backoff).await;
        }
    }

    async fn search_page(
        &self,
        property: &str,
        value: &str,
        max_items: u32,
        skip_count: u32,
    ) -> Result<Vec<RawNode>> {
        let endpoint = format!(
            "{}/search/v1/queries/{}/mds_oeh/ngsearch",
            self.base_url, self.repository
        );
        let body = serde_json::json!({
            "criteria": [
                { "property": property, "values": [value] }
            ]
        });

        let response = self
            .send_with_retry(|| {
                self.http
                    .request(Method::POST, &endpoint)
                    .query(&[
                        ("contentType", "FILES".to_string()),
                        ("maxItems", max_items.to_string()),
                        ("skipCount", skip_count.to_string()),
                        ("propertyFilter", "-all-".to_string()),
                    ])
                    .json(&body)
                    .timeout(self.timeout)
            })
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("search returned status {}", response.status()));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .context("failed to parse search response")?;
        Ok(parsed.nodes)
    }
}

#[async_trait]
impl NodeQuery for RepositoryClient {
    /// Paginate until the cap is reached, the server returns a short or
    /// empty page, or a page fails (partial results are kept).
    async fn query_by_property(
        &self,
        property: &str,
        value: &str,
        max_items: u32,
    ) -> Vec<CandidateRecord> {
        let mut records: Vec<CandidateRecord> = Vec::new();
        let mut skip_count = 0u32;

        while (records.len() as u32) < max_items {
            let remaining = max_items - records.len() as u32;
            let page_size = self.page_size.min(remaining);

            let page = match self.search_page(property, value, page_size, skip_count).await {
                Ok(page) => page,
                Err(err) => {
                    warn!(
                        error = %err,
                        property,
                        value,
                        "search page failed; keeping partial results"
                    );
                    break;
                }
            };

            if page.is_empty() {
                break;
            }

            let page_len = page.len();
            records.extend(page.into_iter().filter_map(to_candidate));
            skip_count += page_len as u32;

            if (page_len as u32) < page_size {
                break;
            }
        }

        debug!(property, count = records.len(), "repository query finished");
        records
    }
}

#[async_trait]
impl NodeFetch for RepositoryClient {
    async fn fetch_metadata(&self, node_id: &str) -> Result<Option<ContentMetadata>> {
        let node = self.fetch_node(node_id).await?;
        Ok(node.map(|n| extract_content_metadata(&n)))
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    nodes: Vec<RawNode>,
}

#[derive(Deserialize)]
struct RawNode {
    #[serde(rename = "ref")]
    node_ref: Option<NodeRef>,
    #[serde(default)]
    properties: Map<String, Value>,
}

#[derive(Deserialize)]
struct NodeRef {
    id: Option<String>,
}

fn to_candidate(raw: RawNode) -> Option<CandidateRecord> {
    let id = raw.node_ref.and_then(|r| r.id).filter(|id| !id.is_empty())?;
    Some(CandidateRecord {
        id,
        title: property_text(&raw.properties, CANDIDATE_TITLE_PROPS),
        description: property_text(&raw.properties, CANDIDATE_DESCRIPTION_PROPS),
        keywords: property_list(&raw.properties, KEYWORD_PROP),
        url: property_text(&raw.properties, URL_PROPS),
    })
}

/// Pull the source metadata fields out of a raw node record. Redirect
/// resolution is a separate step owned by the caller.
pub fn extract_content_metadata(node: &Value) -> ContentMetadata {
    let empty = Map::new();
    let properties = node
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    ContentMetadata {
        title: property_text(properties, TITLE_PROPS),
        description: property_text(properties, DESCRIPTION_PROPS),
        keywords: property_list(properties, KEYWORD_PROP),
        url: property_text(properties, URL_PROPS),
        redirect_url: None,
    }
}

/// First present key wins; repository properties are list-or-scalar.
fn property_text(properties: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(value) = properties.get(*key) {
            let text = match value {
                Value::Array(items) => items.first().and_then(Value::as_str),
                other => other.as_str(),
            };
            if let Some(text) = text {
                return Some(text.to_string());
            }
        }
    }
    None
}

fn property_list(properties: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    properties.get(key).map(|value| match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        other => other
            .as_str()
            .map(|s| vec![s.to_string()])
            .unwrap_or_default(),
    })
}
