//! Embedding backends.
//!
//! One backend is active per index, since dimensionality is baked into the
//! persisted vectors: either the remote HTTP service or the in-process
//! hashing embedder (useful offline and in tests). A single text that fails
//! to embed degrades to a zero vector so the batch always completes; a
//! request that fails wholesale is `EmbedderUnavailable`.

mod cache;
mod http;
mod local;

pub use cache::EmbeddingCache;
pub use http::HttpEmbedder;
pub use local::LocalEmbedder;
pub(crate) use local::split_identifier;

use anyhow::Result;

use crate::config::EmbedderConfig;
use crate::error::IndexerError;

pub enum Embedder {
    Http(HttpEmbedder),
    Local(LocalEmbedder),
}

impl Embedder {
    pub fn from_config(config: &EmbedderConfig) -> Result<Self> {
        match config.provider.as_str() {
            "local" => Ok(Self::Local(LocalEmbedder::new(config))),
            _ => Ok(Self::Http(HttpEmbedder::new(config)?)),
        }
    }

    /// Verify the backend is reachable and pin down dimensionality.
    /// Fails fast with a clear message when the service is unreachable.
    pub async fn initialize(&mut self) -> Result<(), IndexerError> {
        match self {
            Self::Http(e) => e.initialize().await,
            Self::Local(_) => Ok(()),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexerError> {
        let mut batch = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        Ok(batch.pop().unwrap_or_else(|| zero_vector(self.dimensions())))
    }

    /// One vector per input, in order. Individual failures come back as zero
    /// vectors; only a dead service errors.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexerError> {
        match self {
            Self::Http(e) => e.embed_batch(texts).await,
            Self::Local(e) => Ok(e.embed_batch(texts)),
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            Self::Http(e) => e.dimensions(),
            Self::Local(e) => e.dimensions(),
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            Self::Http(e) => e.model_name(),
            Self::Local(e) => e.model_name(),
        }
    }

    pub fn dispose(&mut self) {}
}

/// The fallback for a text that could not be embedded; discoverable only via
/// the keyword channel.
pub fn zero_vector(dimensions: usize) -> Vec<f32> {
    vec![0.0; dimensions]
}

/// L2-normalize in place; zero vectors stay zero.
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector_alone() {
        let mut v = zero_vector(4);
        normalize(&mut v);
        assert_eq!(v, vec![0.0; 4]);
    }

    #[tokio::test]
    async fn local_backend_round_trips_through_enum() {
        let config = crate::config::EmbedderConfig {
            provider: "local".to_string(),
            dimensions: 64,
            ..Default::default()
        };
        let mut embedder = Embedder::from_config(&config).unwrap();
        embedder.initialize().await.unwrap();
        assert_eq!(embedder.dimensions(), 64);

        let vectors = embedder
            .embed_batch(&["fn main() {}".to_string(), "".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 64);
        // Empty text embeds to the zero vector.
        assert_eq!(vectors[1], zero_vector(64));
    }
}
