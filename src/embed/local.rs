//! In-process hashing embedder.
//!
//! A deterministic feature-hashing projection: identifier-aware tokens are
//! hashed into a fixed number of buckets with a sign bit, then L2-normalized.
//! No model weights, no network. Retrieval quality is far below a learned
//! model, but lexically similar code lands close together, which is enough
//! for offline use and for exercising the full pipeline in tests.

use std::hash::{DefaultHasher, Hash, Hasher};

use super::{normalize, zero_vector};
use crate::config::EmbedderConfig;

const DEFAULT_DIMENSIONS: usize = 256;

pub struct LocalEmbedder {
    dimensions: usize,
    model: String,
}

impl LocalEmbedder {
    pub fn new(config: &EmbedderConfig) -> Self {
        let dimensions = if config.dimensions > 0 {
            config.dimensions
        } else {
            DEFAULT_DIMENSIONS
        };
        Self {
            dimensions,
            model: "hashing-v1".to_string(),
        }
    }

    pub fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed_text(t)).collect()
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = zero_vector(self.dimensions);
        let mut any = false;

        for token in tokenize(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % self.dimensions as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
            any = true;
        }

        if any {
            normalize(&mut vector);
        }
        vector
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

/// Lowercased word tokens, with camelCase and snake_case identifiers also
/// contributing their parts.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if word.is_empty() {
            continue;
        }
        tokens.push(word.to_lowercase());
        for part in split_identifier(word) {
            if part.len() > 1 && !part.eq_ignore_ascii_case(word) {
                tokens.push(part);
            }
        }
    }
    tokens
}

/// `getUserById` -> `[get, user, by, id]`; `user_name` -> `[user, name]`.
pub(crate) fn split_identifier(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    for c in word.chars() {
        if c == '_' || c == '-' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
        } else if c.is_uppercase() && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
            current.push(c.to_ascii_lowercase());
        } else {
            current.push(c.to_ascii_lowercase());
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedder(dims: usize) -> LocalEmbedder {
        LocalEmbedder::new(&EmbedderConfig {
            provider: "local".to_string(),
            dimensions: dims,
            ..Default::default()
        })
    }

    #[test]
    fn embedding_is_deterministic_and_normalized() {
        let e = embedder(128);
        let a = e.embed_batch(&["function getUserById(id) {}".to_string()]);
        let b = e.embed_batch(&["function getUserById(id) {}".to_string()]);
        assert_eq!(a, b);

        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn similar_code_is_closer_than_unrelated_code() {
        let e = embedder(256);
        let batch = e.embed_batch(&[
            "function getUserById(id) { return users.find(id); }".to_string(),
            "def fetch_user(id):\n    return users.get(id)".to_string(),
            "SELECT sum(total) FROM invoices GROUP BY region".to_string(),
        ]);
        let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };

        let user_vs_user = dot(&batch[0], &batch[1]);
        let user_vs_sql = dot(&batch[0], &batch[2]);
        assert!(user_vs_user > user_vs_sql);
    }

    #[test]
    fn empty_text_embeds_to_zero() {
        let e = embedder(32);
        let batch = e.embed_batch(&["   ".to_string()]);
        assert!(batch[0].iter().all(|x| *x == 0.0));
    }

    #[test]
    fn identifier_splitting() {
        assert_eq!(split_identifier("getUserById"), vec!["get", "user", "by", "id"]);
        assert_eq!(split_identifier("user_name"), vec!["user", "name"]);
        assert_eq!(split_identifier("kebab-case"), vec!["kebab", "case"]);
    }
}
