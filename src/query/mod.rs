//! Hybrid retrieval: expand, search both channels, fuse, boost, filter,
//! re-rank, and record the query for observability.

pub mod expansion;
pub mod scoring;

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::embed::Embedder;
use crate::hashing;
use crate::model::{now_ms, Block, SearchStat};
use crate::store::BlockDatabase;
use crate::vector_store::{similarity_from_distance, VectorStore};

use expansion::expand_query;
use scoring::{boost_score, fuse, rerank_factor, BoostContext};

/// Files modified inside this window count as "recent" for boosting.
const RECENT_WINDOW_MS: i64 = 7 * 24 * 60 * 60 * 1000;
/// Keyword BM25 scores normalize into [0, 1] by this divisor.
const BM25_NORM: f32 = 10.0;

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub language: Option<String>,
    pub block_type: Option<String>,
    pub min_score: Option<f32>,
    pub semantic_only: bool,
    pub keyword_only: bool,
    pub semantic_weight: Option<f32>,
    pub keyword_weight: Option<f32>,
    pub rerank: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub block: Block,
    pub score: f32,
    pub semantic_score: f32,
    pub keyword_score: f32,
}

pub struct HybridRetriever {
    db: Arc<Mutex<BlockDatabase>>,
    vectors: Arc<RwLock<VectorStore>>,
    embedder: Arc<Embedder>,
    config: SearchConfig,
    ef_search: usize,
}

impl HybridRetriever {
    pub fn new(
        db: Arc<Mutex<BlockDatabase>>,
        vectors: Arc<RwLock<VectorStore>>,
        embedder: Arc<Embedder>,
        config: SearchConfig,
        ef_search: usize,
    ) -> Self {
        Self {
            db,
            vectors,
            embedder,
            config,
            ef_search,
        }
    }

    pub async fn search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        let started = Instant::now();

        // Both channels disabled leaves nothing to search.
        if opts.semantic_only && opts.keyword_only {
            self.record_stat(query, &[], started)?;
            return Ok(Vec::new());
        }

        let limit = opts.limit.unwrap_or(self.config.max_results).max(1);
        let fetch = limit * 2;
        let w_s = opts
            .semantic_weight
            .unwrap_or(self.config.hybrid_weight.semantic);
        let w_k = opts
            .keyword_weight
            .unwrap_or(self.config.hybrid_weight.keyword);

        // Both channels run concurrently; the keyword lookup proceeds while
        // the semantic side waits on the embedder.
        let (semantic_hits, keyword_hits) = tokio::try_join!(
            async {
                if opts.keyword_only {
                    Ok(Vec::new())
                } else {
                    self.semantic_channel(query, fetch).await
                }
            },
            async {
                if opts.semantic_only {
                    Ok(Vec::new())
                } else {
                    self.keyword_channel(query, fetch)
                }
            },
        )?;

        // Union on block id, keeping each channel's maximum.
        let mut merged: HashMap<String, (f32, f32)> = HashMap::new();
        for (block_id, score) in semantic_hits {
            let entry = merged.entry(block_id).or_insert((0.0, 0.0));
            entry.0 = entry.0.max(score);
        }
        for (block_id, score) in keyword_hits {
            let entry = merged.entry(block_id).or_insert((0.0, 0.0));
            entry.1 = entry.1.max(score);
        }

        let (recent_files, language_shares, blocks) = {
            let db = self.db.lock().expect("block database lock poisoned");
            let recent = db.recent_files(now_ms(), RECENT_WINDOW_MS)?;
            let shares = db.language_shares()?;
            let mut blocks = Vec::new();
            for (block_id, (sem, kw)) in &merged {
                // Entries whose block vanished are skipped, never errored.
                if let Some(block) = db.get_block(block_id)? {
                    blocks.push((block, *sem, *kw));
                }
            }
            (recent, shares, blocks)
        };

        let ctx = BoostContext {
            query,
            recent_files: &recent_files,
            language_shares: &language_shares,
        };

        let min_score = opts.min_score.unwrap_or(self.config.min_score);
        let mut results: Vec<SearchResult> = blocks
            .into_iter()
            .map(|(block, sem, kw)| {
                let fused = fuse(sem, kw, w_s, w_k);
                let score = boost_score(fused, &block, sem, kw, &ctx);
                SearchResult {
                    block,
                    score,
                    semantic_score: sem,
                    keyword_score: kw,
                }
            })
            .filter(|r| {
                opts.language
                    .as_deref()
                    .map(|l| r.block.language == l)
                    .unwrap_or(true)
                    && opts
                        .block_type
                        .as_deref()
                        .map(|t| r.block.block_type == t)
                        .unwrap_or(true)
                    && r.score >= min_score
            })
            .collect();

        sort_descending(&mut results);
        results.truncate(limit);

        if opts.rerank.unwrap_or(self.config.rerank) && results.len() > 1 {
            for r in results.iter_mut() {
                let factor = rerank_factor(query, &r.block, r.semantic_score, r.keyword_score);
                r.score = (r.score * factor).min(1.0);
            }
            sort_descending(&mut results);
        }

        self.record_stat(query, &results, started)?;
        debug!(
            "query {:?}: {} results in {}ms",
            query,
            results.len(),
            started.elapsed().as_millis()
        );
        Ok(results)
    }

    /// Embed the original query (expansions are keyword-only) and join ANN
    /// labels back through the mapping; unmapped labels are tombstones.
    async fn semantic_channel(&self, query: &str, fetch: usize) -> Result<Vec<(String, f32)>> {
        let embedding = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                // Degrade to keyword-only rather than failing the query.
                warn!("semantic channel unavailable: {}", e);
                return Ok(Vec::new());
            }
        };

        let neighbors = {
            let vectors = self.vectors.read().await;
            vectors.search(&embedding, fetch, self.ef_search)
        };

        let db = self.db.lock().expect("block database lock poisoned");
        let mut hits = Vec::new();
        for (label, distance) in neighbors {
            if let Some(block_id) = db.block_id_for_label(label)? {
                hits.push((block_id, similarity_from_distance(distance)));
            }
        }
        Ok(hits)
    }

    fn keyword_channel(&self, query: &str, fetch: usize) -> Result<Vec<(String, f32)>> {
        let expanded = expand_query(query).join(" ");
        let db = self.db.lock().expect("block database lock poisoned");
        Ok(db
            .search_keywords(&expanded, fetch)?
            .into_iter()
            .map(|(block_id, bm25)| (block_id, (bm25 / BM25_NORM).min(1.0)))
            .collect())
    }

    fn record_stat(&self, query: &str, results: &[SearchResult], started: Instant) -> Result<()> {
        let avg_score = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.score).sum::<f32>() / results.len() as f32
        };
        let stat = SearchStat {
            query_hash: hashing::query_hash(query),
            query: query.to_string(),
            result_count: results.len() as u32,
            avg_score,
            execution_time_ms: started.elapsed().as_millis() as u64,
            timestamp: now_ms(),
        };
        let db = self.db.lock().expect("block database lock poisoned");
        db.record_search_stat(&stat)
    }
}

fn sort_descending(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.block.block_id.cmp(&b.block.block_id))
    });
}
