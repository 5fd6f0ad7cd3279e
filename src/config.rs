//! Configuration persisted at `.syntheo/semantics/config.json`.
//!
//! Every field has a serde default so partial configs written by hand keep
//! working across versions.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub embedder: EmbedderConfig,
    pub indexing: IndexingConfig,
    pub search: SearchConfig,
    pub watch: WatchConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmbedderConfig {
    /// `"http"` for a remote OpenAI-compatible service, `"local"` for the
    /// in-process hashing embedder.
    pub provider: String,
    pub model: String,
    /// 0 means "take the dimensionality the service reports".
    pub dimensions: usize,
    pub base_url: String,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            provider: "http".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 0,
            base_url: "http://localhost:11434/v1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IndexingConfig {
    pub batch_size: usize,
    pub concurrency: usize,
    pub chunk_tokens: usize,
    pub max_chunk_tokens: usize,
    pub overlap_tokens: usize,
    pub max_file_size: u64,
    pub exclude_patterns: Vec<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrency: 4,
            chunk_tokens: 384,
            max_chunk_tokens: 1536,
            overlap_tokens: 50,
            max_file_size: 1024 * 1024,
            exclude_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchConfig {
    pub max_results: usize,
    pub min_score: f32,
    pub hybrid_weight: HybridWeight,
    pub rerank: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: 20,
            min_score: 0.3,
            hybrid_weight: HybridWeight::default(),
            rerank: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HybridWeight {
    pub semantic: f32,
    pub keyword: f32,
}

impl Default for HybridWeight {
    fn default() -> Self {
        Self {
            semantic: 0.7,
            keyword: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WatchConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
    pub ignored: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 500,
            ignored: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PerformanceConfig {
    pub hnsw_ef_search: usize,
    pub cache_size: usize,
    pub log_level: String,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            hnsw_ef_search: 100,
            cache_size: 10_000,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load `config.json` from `dir`, falling back to defaults when missing.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join("config.json");
        if !path.exists() {
            debug!("no config.json at {}, using defaults", dir.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Write the full (defaulted) config back to `dir/config.json`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join("config.json");
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(&path, raw).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}
