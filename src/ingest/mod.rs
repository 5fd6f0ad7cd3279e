//! End-to-end ingestion: scan, change-detect, parse, chunk, embed, and land
//! each file atomically in the stores.
//!
//! Files are processed in batches with a semaphore bounding concurrency. The
//! write transaction is the only mutual-exclusion point for the metadata
//! store; ANN inserts happen outside it behind the vector store's writer
//! lock. A file either lands completely (old blocks out, new blocks in) or
//! not at all.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::chunker::{chunk_file, ChunkPolicy};
use crate::config::Config;
use crate::embed::{Embedder, EmbeddingCache};
use crate::error::IndexerError;
use crate::hash_cache::HashCache;
use crate::hashing;
use crate::language::language_for_extension;
use crate::model::{now_ms, FileRecord};
use crate::parsing;
use crate::scanner::{mtime_ms, Scanner};
use crate::state::StateManager;
use crate::store::{BlockDatabase, FileUpdate};
use crate::vector_store::VectorStore;

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub scanned: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub blocks: usize,
    /// Set when the run aborted because the embedding service died.
    pub embedder_down: bool,
}

enum FileOutcome {
    Indexed { blocks: usize },
    Skipped,
    Failed,
    EmbedderDown,
}

/// Everything a per-file task needs, shared behind one Arc.
struct Shared {
    root: PathBuf,
    data_dir: PathBuf,
    config: Config,
    db: Arc<Mutex<BlockDatabase>>,
    vectors: Arc<RwLock<VectorStore>>,
    embedder: Arc<Embedder>,
    hash_cache: Arc<Mutex<HashCache>>,
    embed_cache: Mutex<EmbeddingCache>,
}

pub struct Ingestor {
    shared: Arc<Shared>,
    state: Arc<Mutex<StateManager>>,
    shutdown: Arc<AtomicBool>,
}

impl Ingestor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        root: PathBuf,
        data_dir: PathBuf,
        config: Config,
        db: Arc<Mutex<BlockDatabase>>,
        vectors: Arc<RwLock<VectorStore>>,
        embedder: Arc<Embedder>,
        hash_cache: Arc<Mutex<HashCache>>,
        state: Arc<Mutex<StateManager>>,
    ) -> Self {
        let embed_cache = Mutex::new(EmbeddingCache::new(config.performance.cache_size));
        Self {
            shared: Arc::new(Shared {
                root,
                data_dir,
                config,
                db,
                vectors,
                embedder,
                hash_cache,
                embed_cache,
            }),
            state,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag consulted between batches; running per-file tasks drain first.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Walk the workspace and (re)ingest what changed.
    pub async fn index_workspace(&self, force: bool) -> Result<IngestReport> {
        let shared = &self.shared;
        let scanner = Scanner::new(
            &shared.root,
            &shared.config.indexing.exclude_patterns,
            shared.config.indexing.max_file_size,
        )?;
        let scanned = scanner.scan();
        let total_scanned = scanned.len();

        let candidates: Vec<_> = if force {
            scanned
        } else {
            let cache = shared.hash_cache.lock().expect("hash cache lock poisoned");
            scanned
                .into_iter()
                .filter(|f| cache.maybe_changed(&f.rel_path, f.mtime_ms, f.size_bytes))
                .collect()
        };

        let mut report = IngestReport {
            scanned: total_scanned,
            skipped: total_scanned - candidates.len(),
            ..Default::default()
        };
        info!(
            "indexing {} of {} files ({} unchanged)",
            candidates.len(),
            total_scanned,
            report.skipped
        );

        {
            let mut state = self.state.lock().expect("state lock poisoned");
            state.begin_run(candidates.len());
        }

        'batches: for batch in candidates.chunks(shared.config.indexing.batch_size.max(1)) {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested; stopping after current batch");
                break;
            }

            let semaphore = Arc::new(Semaphore::new(shared.config.indexing.concurrency.max(1)));
            let mut tasks = JoinSet::new();
            for file in batch {
                let shared = self.shared.clone();
                let semaphore = semaphore.clone();
                let rel_path = file.rel_path.clone();
                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    ingest_one(&shared, &rel_path).await
                });
            }

            while let Some(joined) = tasks.join_next().await {
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("ingest task panicked: {}", e);
                        FileOutcome::Failed
                    }
                };
                match outcome {
                    FileOutcome::Indexed { blocks } => {
                        report.indexed += 1;
                        report.blocks += blocks;
                    }
                    FileOutcome::Skipped => report.skipped += 1,
                    FileOutcome::Failed => report.errors += 1,
                    FileOutcome::EmbedderDown => {
                        report.errors += 1;
                        report.embedder_down = true;
                    }
                }
            }

            if report.embedder_down {
                error!("embedding service unavailable; aborting remaining batches");
                break 'batches;
            }
        }

        self.persist_all(&report).await?;
        info!(
            "ingest done: {} indexed, {} skipped, {} errors, {} blocks",
            report.indexed, report.skipped, report.errors, report.blocks
        );
        Ok(report)
    }

    /// Single-file path used by the watcher.
    pub async fn ingest_file(&self, rel_path: &str) -> Result<()> {
        match ingest_one(&self.shared, rel_path).await {
            FileOutcome::EmbedderDown => {
                Err(IndexerError::EmbedderUnavailable("mid-watch".to_string()).into())
            }
            _ => Ok(()),
        }
    }

    /// A file disappeared: drop its blocks from all stores and forget its
    /// cache entry.
    pub async fn remove_file(&self, rel_path: &str) -> Result<()> {
        let labels = {
            let db = self.shared.db.lock().expect("block database lock poisoned");
            db.remove_file(rel_path)?
        };
        {
            let mut vectors = self.shared.vectors.write().await;
            vectors.tombstone(&labels);
        }
        {
            let mut cache = self
                .shared
                .hash_cache
                .lock()
                .expect("hash cache lock poisoned");
            cache.remove(rel_path);
        }
        info!("removed {} ({} vectors tombstoned)", rel_path, labels.len());
        Ok(())
    }

    /// Flush the ANN index and the hash cache (the watch loop's quiet-period
    /// checkpoint).
    pub async fn persist_stores(&self) -> Result<()> {
        {
            let mut vectors = self.shared.vectors.write().await;
            vectors.persist(&self.shared.data_dir)?;
        }
        let mut cache = self
            .shared
            .hash_cache
            .lock()
            .expect("hash cache lock poisoned");
        cache.persist()?;
        Ok(())
    }

    /// Flush the ANN index, the hash cache, and the progress/summary files.
    pub async fn persist_all(&self, report: &IngestReport) -> Result<()> {
        self.persist_stores().await?;

        let stats = {
            let db = self.shared.db.lock().expect("block database lock poisoned");
            db.stats()?
        };
        let mut state = self.state.lock().expect("state lock poisoned");
        state.state.indexed_files = report.indexed;
        state.state.skipped_files = report.skipped;
        state.state.error_count = report.errors;
        state.finish_run(report.embedder_down);
        state.metadata.workspace_root = self.shared.root.display().to_string();
        state.metadata.model_name = self.shared.embedder.model_name().to_string();
        state.metadata.dimensions = self.shared.embedder.dimensions();
        state.metadata.total_files = stats.total_files;
        state.metadata.total_blocks = stats.total_blocks;
        state.metadata.languages = stats.languages;
        state.metadata.updated_at = now_ms();
        state.persist()?;
        Ok(())
    }
}

/// The per-file protocol. Every early return leaves the previous state of the
/// file fully intact.
async fn ingest_one(shared: &Shared, rel_path: &str) -> FileOutcome {
    match try_ingest_one(shared, rel_path).await {
        Ok(outcome) => outcome,
        Err(e) => match e.downcast_ref::<IndexerError>() {
            Some(IndexerError::EmbedderUnavailable(msg)) => {
                error!("{}: embedder unavailable: {}", rel_path, msg);
                FileOutcome::EmbedderDown
            }
            _ => {
                warn!("skipping {}: {}", rel_path, e);
                FileOutcome::Failed
            }
        },
    }
}

async fn try_ingest_one(shared: &Shared, rel_path: &str) -> Result<FileOutcome> {
    let abs = shared.root.join(rel_path);
    let meta = std::fs::metadata(&abs).map_err(|e| IndexerError::TransientIo {
        path: rel_path.to_string(),
        source: e,
    })?;
    let bytes = std::fs::read(&abs).map_err(|e| IndexerError::TransientIo {
        path: rel_path.to_string(),
        source: e,
    })?;

    let content_hash = hashing::hash_bytes(&bytes);
    let mtime = mtime_ms(&meta);

    // Second chance: a touched-but-unmodified file costs a hash, not an
    // embedding run.
    {
        let mut cache = shared.hash_cache.lock().expect("hash cache lock poisoned");
        if cache.confirm_unchanged(rel_path, &content_hash) {
            cache.record(rel_path, &content_hash, mtime, meta.len());
            debug!("{} touched but unchanged", rel_path);
            return Ok(FileOutcome::Skipped);
        }
    }

    let text = String::from_utf8_lossy(&bytes).into_owned();
    let language = abs
        .extension()
        .and_then(|e| e.to_str())
        .and_then(language_for_extension)
        .unwrap_or("text");

    let tree = parsing::parse(&text, language)
        .map_err(|_| IndexerError::ParseFailure(rel_path.to_string()))?;

    let policy = ChunkPolicy {
        target_tokens: shared.config.indexing.chunk_tokens,
        max_tokens: shared.config.indexing.max_chunk_tokens,
        overlap_tokens: shared.config.indexing.overlap_tokens,
    };
    let now = now_ms();
    let blocks = chunk_file(rel_path, &text, tree.as_ref(), language, &policy, now);

    // One embed_batch per file, short-circuited by the content-hash LRU.
    let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(blocks.len());
    let mut misses: Vec<usize> = Vec::new();
    {
        let mut cache = shared.embed_cache.lock().expect("embed cache lock poisoned");
        for (i, block) in blocks.iter().enumerate() {
            match cache.get(&block.content_hash) {
                Some(v) => vectors.push(Some(v)),
                None => {
                    vectors.push(None);
                    misses.push(i);
                }
            }
        }
    }
    if !misses.is_empty() {
        let texts: Vec<String> = misses.iter().map(|&i| blocks[i].content.clone()).collect();
        let embedded = shared.embedder.embed_batch(&texts).await?;
        let mut cache = shared.embed_cache.lock().expect("embed cache lock poisoned");
        for (&i, vector) in misses.iter().zip(embedded.into_iter()) {
            // Zero vectors mark an embedding failure; keep them out of the
            // cache so a later pass can retry.
            if vector.iter().any(|x| *x != 0.0) {
                cache.put(&blocks[i].content_hash, vector.clone());
            }
            vectors[i] = Some(vector);
        }
    }
    let vectors: Vec<Vec<f32>> = vectors
        .into_iter()
        .map(|v| v.unwrap_or_else(|| vec![0.0; shared.embedder.dimensions()]))
        .collect();

    let record = FileRecord {
        file_path: rel_path.to_string(),
        file_hash: content_hash.clone(),
        language: language.to_string(),
        size_bytes: meta.len(),
        line_count: text.lines().count() as u32,
        last_indexed: now,
        last_modified: mtime,
        block_count: blocks.len() as u32,
        is_deleted: false,
    };

    // The single atomic write for this file.
    let outcome = {
        let db = shared.db.lock().expect("block database lock poisoned");
        db.apply_file_update(&FileUpdate {
            record: &record,
            blocks: &blocks,
            vectors: &vectors,
        })?
    };

    // Mirror into the ANN outside the transaction. Zero vectors get a label
    // (durable in vector_map) but no graph entry.
    {
        let mut store = shared.vectors.write().await;
        store.tombstone(&outcome.removed_labels);
        let live: Vec<(u64, &Vec<f32>)> = outcome
            .inserted_labels
            .iter()
            .copied()
            .zip(vectors.iter())
            .filter(|(_, v)| v.iter().any(|x| *x != 0.0))
            .collect();
        if !store.has_room(live.len()) {
            // The transaction above already committed, so the durable rows
            // include this file's vectors; the rebuild covers everything.
            let entries = {
                let db = shared.db.lock().expect("block database lock poisoned");
                db.load_all_vectors()?
            };
            let entries: Vec<(u64, Vec<f32>)> = entries
                .into_iter()
                .filter(|(_, v)| v.iter().any(|x| *x != 0.0))
                .collect();
            store.grow(&entries, 0)?;
        } else {
            for (label, vector) in live {
                store.insert(label, vector)?;
            }
        }
    }

    {
        let mut cache = shared.hash_cache.lock().expect("hash cache lock poisoned");
        cache.record(rel_path, &content_hash, mtime, meta.len());
    }

    debug!("{}: {} blocks indexed", rel_path, blocks.len());
    Ok(FileOutcome::Indexed {
        blocks: blocks.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    struct Harness {
        root: TempDir,
        data: TempDir,
        ingestor: Ingestor,
        db: Arc<Mutex<BlockDatabase>>,
    }

    fn harness() -> Harness {
        let mut config = Config::default();
        config.embedder.provider = "local".to_string();
        config.embedder.dimensions = 64;
        harness_with(config)
    }

    fn harness_with(config: Config) -> Harness {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();

        let dims = config.embedder.dimensions;
        let db = Arc::new(Mutex::new(BlockDatabase::open_in_memory().unwrap()));
        let vectors = Arc::new(RwLock::new(
            VectorStore::open(data.path(), dims, 1024, 16, 200).unwrap(),
        ));
        let embedder = Arc::new(Embedder::from_config(&config.embedder).unwrap());
        let hash_cache = Arc::new(Mutex::new(HashCache::load(data.path())));
        let state = Arc::new(Mutex::new(StateManager::load(data.path())));

        let ingestor = Ingestor::new(
            root.path().to_path_buf(),
            data.path().to_path_buf(),
            config,
            db.clone(),
            vectors,
            embedder,
            hash_cache,
            state,
        );
        Harness {
            root,
            data,
            ingestor,
            db,
        }
    }

    fn write(h: &Harness, rel: &str, content: &str) {
        let path = h.root.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn two_tiny_files_index_to_two_blocks() {
        let h = harness();
        write(
            &h,
            "a.ts",
            "export function getUserById(id: string) { return db.users.find(id); }",
        );
        write(&h, "b.py", "def fetch_user(id):\n    return db.users.get(id)\n");

        let report = h.ingestor.index_workspace(false).await.unwrap();
        assert_eq!(report.indexed, 2);
        assert_eq!(report.errors, 0);
        assert_eq!(report.blocks, 2);

        let stats = h.db.lock().unwrap().stats().unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_blocks, 2);
        assert_eq!(stats.languages.get("typescript"), Some(&1));
        assert_eq!(stats.languages.get("python"), Some(&1));
    }

    #[tokio::test]
    async fn empty_workspace_completes_with_zero_totals() {
        let h = harness();
        let report = h.ingestor.index_workspace(false).await.unwrap();
        assert_eq!(report.scanned, 0);
        assert_eq!(report.indexed, 0);

        let stats = h.db.lock().unwrap().stats().unwrap();
        assert_eq!(stats.total_files, 0);
        assert_eq!(stats.total_blocks, 0);
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let h = harness();
        write(&h, "a.ts", "export function one() { return 1; }");

        let first = h.ingestor.index_workspace(false).await.unwrap();
        assert_eq!(first.indexed, 1);

        let second = h.ingestor.index_workspace(false).await.unwrap();
        assert_eq!(second.indexed, 0);
        assert_eq!(second.skipped, 1);
    }

    #[tokio::test]
    async fn touched_but_unmodified_file_is_skipped_by_content_hash() {
        let h = harness();
        let content = "export function one() { return 1; }";
        write(&h, "a.ts", content);
        h.ingestor.index_workspace(false).await.unwrap();

        // Rewrite identical bytes: mtime moves, content does not.
        std::thread::sleep(std::time::Duration::from_millis(20));
        write(&h, "a.ts", content);

        let report = h.ingestor.index_workspace(false).await.unwrap();
        assert_eq!(report.indexed, 0);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn edit_replaces_blocks_and_old_id_disappears() {
        let h = harness();
        write(
            &h,
            "a.ts",
            "export function getUserById(id: string) { return db.users.find(id); }",
        );
        h.ingestor.index_workspace(false).await.unwrap();

        let old_ids: Vec<String> = h
            .db
            .lock()
            .unwrap()
            .blocks_for_file("a.ts")
            .unwrap()
            .into_iter()
            .map(|b| b.block_id)
            .collect();

        std::thread::sleep(std::time::Duration::from_millis(20));
        write(
            &h,
            "a.ts",
            "export function getUserByEmail(email: string) {\n  return db.users.findByEmail(email);\n}",
        );
        let report = h.ingestor.index_workspace(false).await.unwrap();
        assert_eq!(report.indexed, 1);

        let db = h.db.lock().unwrap();
        let blocks = db.blocks_for_file("a.ts").unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].symbol_name.as_deref(), Some("getUserByEmail"));
        for old in &old_ids {
            assert!(db.get_block(old).unwrap().is_none());
        }
        assert!(db.search_keywords("getUserById", 10).unwrap().is_empty());
        assert!(!db.search_keywords("getUserByEmail", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn removed_file_leaves_no_trace_in_search() {
        let h = harness();
        write(&h, "a.ts", "export function vanishing() { return 0; }");
        h.ingestor.index_workspace(false).await.unwrap();

        h.ingestor.remove_file("a.ts").await.unwrap();

        let db = h.db.lock().unwrap();
        assert!(db.blocks_for_file("a.ts").unwrap().is_empty());
        assert!(db.search_keywords("vanishing", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn state_files_land_in_the_data_dir() {
        let h = harness();
        write(&h, "a.ts", "export function one() { return 1; }");
        h.ingestor.index_workspace(false).await.unwrap();

        assert!(h.data.path().join("state.json").exists());
        assert!(h.data.path().join("metadata.json").exists());
        assert!(h.data.path().join("file-hashes.json").exists());
        assert!(h.data.path().join("vectors.hnsw.graph").exists());

        let state = StateManager::load(h.data.path());
        assert_eq!(state.state.status, "done");
        assert_eq!(state.metadata.total_files, 1);
        assert_eq!(state.metadata.model_name, "hashing-v1");
    }

    #[tokio::test]
    async fn dead_embedder_aborts_run_but_persists_state() {
        let mut config = Config::default();
        config.embedder.provider = "http".to_string();
        // Reserved port; the request fails immediately.
        config.embedder.base_url = "http://127.0.0.1:1".to_string();
        config.embedder.dimensions = 8;
        let h = harness_with(config);
        write(&h, "a.ts", "export function one() { return 1; }");

        let report = h.ingestor.index_workspace(false).await.unwrap();
        assert!(report.embedder_down);
        assert_eq!(report.indexed, 0);
        assert_eq!(report.errors, 1);

        // The run still persisted its state, marked failed.
        let state = StateManager::load(h.data.path());
        assert_eq!(state.state.status, "failed");
    }

    #[tokio::test]
    async fn oversize_function_splits_into_sub_blocks() {
        let h = harness();
        let mut source = String::from("function huge() {\n");
        for i in 0..500 {
            source.push_str(&format!(
                "  let v{i} = \"alpha beta gamma delta epsilon zeta\";\n"
            ));
        }
        source.push_str("}\n");
        write(&h, "huge.ts", &source);

        h.ingestor.index_workspace(false).await.unwrap();
        let blocks = h.db.lock().unwrap().blocks_for_file("huge.ts").unwrap();
        assert!(blocks.len() > 1);
        for block in &blocks {
            assert_eq!(block.parent_symbol.as_deref(), Some("huge"));
        }
    }
}
