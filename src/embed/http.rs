//! Remote embedder speaking the OpenAI-compatible `/embeddings` protocol.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use super::{normalize, zero_vector};
use crate::config::EmbedderConfig;
use crate::error::IndexerError;
use crate::tokens::truncate_for_embedding;

/// Texts are cut to this many estimated tokens before the request goes out.
const MAX_EMBED_TOKENS: usize = 2000;

pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbedderConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        let api_key = std::env::var("SYNTHEO_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok();

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            dimensions: config.dimensions,
        })
    }

    /// Probe the service with a one-text request, adopting its reported
    /// dimensionality when the config leaves it at 0.
    pub async fn initialize(&mut self) -> Result<(), IndexerError> {
        let rows = self.request(&["syntheo".to_string()]).await?;
        let dims = rows
            .first()
            .map(|r| r.embedding.len())
            .filter(|d| *d > 0)
            .ok_or_else(|| {
                IndexerError::EmbedderUnavailable(format!(
                    "{} returned no embedding for the probe request",
                    self.base_url
                ))
            })?;

        if self.dimensions == 0 {
            self.dimensions = dims;
        } else if self.dimensions != dims {
            return Err(IndexerError::EmbedderUnavailable(format!(
                "model {} produces {} dimensions, config says {}",
                self.model, dims, self.dimensions
            )));
        }
        debug!(
            "embedder ready: {} @ {} ({} dims)",
            self.model, self.base_url, self.dimensions
        );
        Ok(())
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexerError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let truncated: Vec<String> = texts
            .iter()
            .map(|t| truncate_for_embedding(t, MAX_EMBED_TOKENS).to_string())
            .collect();

        let rows = self.request(&truncated).await?;

        // Slot each row by its index; anything the service skipped degrades
        // to a zero vector rather than failing the batch.
        let mut vectors = vec![zero_vector(self.dimensions); texts.len()];
        for row in rows {
            if row.index >= vectors.len() {
                warn!("embedding response index {} out of range", row.index);
                continue;
            }
            if row.embedding.len() != self.dimensions {
                warn!(
                    "embedding {} has {} dims, expected {}; substituting zero vector",
                    row.index,
                    row.embedding.len(),
                    self.dimensions
                );
                continue;
            }
            let mut v = row.embedding;
            normalize(&mut v);
            vectors[row.index] = v;
        }
        Ok(vectors)
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<EmbeddingRow>, IndexerError> {
        let url = format!("{}/embeddings", self.base_url);
        let mut request = self.client.post(&url).json(&json!({
            "model": self.model,
            "input": texts,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            IndexerError::EmbedderUnavailable(format!("{url}: {e}"))
        })?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(IndexerError::EmbedderUnavailable(format!(
                "{url}: unauthorized (set SYNTHEO_API_KEY)"
            )));
        }
        if !response.status().is_success() {
            return Err(IndexerError::EmbedderUnavailable(format!(
                "{url}: HTTP {}",
                response.status()
            )));
        }

        let parsed: EmbeddingsResponse = response.json().await.map_err(|e| {
            IndexerError::EmbedderUnavailable(format!("{url}: bad response body: {e}"))
        })?;
        Ok(parsed.data)
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let config = EmbedderConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..Default::default()
        };
        let embedder = HttpEmbedder::new(&config).unwrap();
        assert_eq!(embedder.base_url, "http://localhost:11434/v1");
    }

    #[tokio::test]
    async fn unreachable_service_is_embedder_unavailable() {
        let config = EmbedderConfig {
            // Reserved port, nothing listens here.
            base_url: "http://127.0.0.1:1".to_string(),
            dimensions: 8,
            ..Default::default()
        };
        let embedder = HttpEmbedder::new(&config).unwrap();
        let err = embedder
            .embed_batch(&["hello".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::EmbedderUnavailable(_)));
    }
}
