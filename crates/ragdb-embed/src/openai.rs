//! OpenAI-compatible embedding API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use ragdb_core::config::EmbeddingSettings;
use ragdb_core::traits::EmbeddingProvider;
use ragdb_core::{Error, Result};

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    dim: usize,
    id: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// 429 and 5xx are worth retrying; every other failure status is final.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

impl OpenAiEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        dim: usize,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {e}")))?;
        let model = model.into();
        let id = format!("openai:{model}:d{dim}");
        Ok(Self { client, endpoint: endpoint.into(), model, api_key: api_key.into(), dim, id })
    }

    /// Build from settings, reading the key from the env var named by
    /// `api_key_env`.
    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env).map_err(|_| {
            Error::InvalidConfig(format!("environment variable {} is not set", settings.api_key_env))
        })?;
        Self::new(
            settings.endpoint.clone(),
            settings.model.clone(),
            api_key,
            settings.dim,
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    fn request_dimensions(&self) -> Option<usize> {
        // Only the text-embedding-3 family accepts a dimensions override.
        self.model.starts_with("text-embedding-3").then_some(self.dim)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn embedder_id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = EmbedRequest { model: &self.model, input: texts, dimensions: self.request_dimensions() };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::provider(format!("HTTP error: {e}"), true))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::provider(format!("API returned {status}: {text}"), is_retryable_status(status)));
        }

        let mut parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::provider(format!("malformed embedding response: {e}"), false))?;
        if parsed.data.len() != texts.len() {
            return Err(Error::provider(
                format!("expected {} embeddings, got {}", texts.len(), parsed.data.len()),
                false,
            ));
        }
        parsed.data.sort_by_key(|d| d.index);
        let mut out = Vec::with_capacity(parsed.data.len());
        for d in parsed.data {
            if d.embedding.len() != self.dim {
                return Err(Error::provider(
                    format!("dimension mismatch: got {} expected {}", d.embedding.len(), self.dim),
                    false,
                ));
            }
            out.push(d.embedding);
        }
        tracing::debug!(count = out.len(), model = %self.model, "embedded batch");
        Ok(out)
    }
}
