use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::config::EmbeddingConfig;

/// Texts beyond this length are truncated before they are sent to the
/// provider; metadata fields should never get close.
const MAX_EMBED_CHARS: usize = 10_000;

/// Client for an Ollama-style embedding endpoint (`POST /api/embed`).
pub struct EmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
}

impl EmbeddingClient {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs.max(1));
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build embedding http client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed a batch of texts; the provider returns one vector per input, in
    /// input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        if self.base_url.is_empty() {
            return Err(anyhow!("embedding base url not configured"));
        }

        let url = format!("{}/api/embed", self.base_url);
        let input: Vec<String> = texts.iter().map(|t| truncate_chars(t, MAX_EMBED_CHARS)).collect();
        let payload = EmbedRequest {
            model: self.model.clone(),
            input,
        };

        let response = self
            .http
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .await
            .context("embedding request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "embedding provider returned non-success status {}: {}",
                status,
                body
            ));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .context("failed to parse embedding response")?;

        if parsed.embeddings.len() != texts.len() {
            return Err(anyhow!(
                "embedding provider returned {} vectors for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            ));
        }

        Ok(parsed.embeddings)
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f64>>,
}

/// Process-wide embedding backend handle.
///
/// The client is built lazily on first use; concurrent first calls serialize
/// behind the write lock so only one build happens. Later calls pay a read
/// lock plus a model-id comparison — a changed `EMBEDDING_MODEL` invalidates
/// the client and triggers a rebuild.
pub struct EmbeddingManager {
    config: EmbeddingConfig,
    client: RwLock<Option<Arc<EmbeddingClient>>>,
}

impl EmbeddingManager {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            client: RwLock::new(None),
        }
    }

    /// Whether embedding detection can be used at all (provider configured).
    pub fn is_available(&self) -> bool {
        !self.config.base_url.trim().is_empty()
    }

    pub async fn is_loaded(&self) -> bool {
        self.client.read().await.is_some()
    }

    /// Configured model id; `EMBEDDING_MODEL` overrides the config file.
    pub fn current_model_id(&self) -> String {
        std::env::var("EMBEDDING_MODEL").unwrap_or_else(|_| self.config.model.clone())
    }

    /// Model name without a registry/namespace prefix, for display.
    pub fn model_display_name(&self) -> String {
        let model = self.current_model_id();
        model
            .rsplit('/')
            .next()
            .map(str::to_string)
            .unwrap_or(model)
    }

    pub async fn get(&self) -> Result<Arc<EmbeddingClient>> {
        if !self.is_available() {
            return Err(anyhow!(
                "embedding detection is not available; configure embedding.base_url"
            ));
        }

        let model = self.current_model_id();

        {
            let guard = self.client.read().await;
            if let Some(client) = guard.as_ref() {
                if client.model() == model {
                    return Ok(Arc::clone(client));
                }
            }
        }

        let mut guard = self.client.write().await;
        // Another caller may have initialized while we waited for the lock.
        if let Some(client) = guard.as_ref() {
            if client.model() == model {
                return Ok(Arc::clone(client));
            }
        }

        info!(model = %model, "initializing embedding client");
        let client = Arc::new(EmbeddingClient::new(
            &self.config.base_url,
            &model,
            self.config.timeout_secs,
        )?);
        *guard = Some(Arc::clone(&client));
        Ok(client)
    }
}
