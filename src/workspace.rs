//! Workspace wiring: owns the `.syntheo/semantics/` directory and opens all
//! stores against it.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::info;

use crate::config::Config;
use crate::embed::Embedder;
use crate::hash_cache::HashCache;
use crate::ingest::Ingestor;
use crate::query::HybridRetriever;
use crate::state::StateManager;
use crate::store::BlockDatabase;
use crate::vector_store::VectorStore;

/// All engine state lives under `<workspace>/.syntheo/semantics/`.
pub const DATA_DIR: &str = ".syntheo/semantics";

/// ANN construction defaults.
const ANN_INITIAL_CAPACITY: usize = 1_000_000;
const ANN_MAX_CONNECTIONS: usize = 16;
const ANN_EF_CONSTRUCTION: usize = 200;

pub struct SyntheoWorkspace {
    pub root: PathBuf,
    pub data_dir: PathBuf,
    pub config: Config,
    pub db: Arc<Mutex<BlockDatabase>>,
    pub vectors: Arc<RwLock<VectorStore>>,
    pub embedder: Arc<Embedder>,
    pub hash_cache: Arc<Mutex<HashCache>>,
    pub state: Arc<Mutex<StateManager>>,
}

#[derive(Debug, Default)]
pub struct WorkspaceStatus {
    pub total_files: usize,
    pub total_blocks: usize,
    pub total_vectors: usize,
    pub languages: HashMap<String, usize>,
    pub model_name: String,
    pub dimensions: usize,
    pub last_status: String,
}

impl SyntheoWorkspace {
    /// Open every store, probing the embedder so a dead service fails fast
    /// before any ingest work starts. A schema mismatch refuses to open; the
    /// operator decides whether to `clear`.
    pub async fn initialize(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("workspace root {} not found", root.display()))?;
        let data_dir = root.join(DATA_DIR);
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating {}", data_dir.display()))?;

        let config = Config::load_or_default(&data_dir)?;
        config.save(&data_dir)?;

        let db = BlockDatabase::open(&data_dir)?;

        let mut embedder = Embedder::from_config(&config.embedder)?;
        embedder.initialize().await?;
        let dimensions = embedder.dimensions();

        let vectors = VectorStore::open(
            &data_dir,
            dimensions,
            ANN_INITIAL_CAPACITY,
            ANN_MAX_CONNECTIONS,
            ANN_EF_CONSTRUCTION,
        )?;

        let hash_cache = HashCache::load(&data_dir);
        let state = StateManager::load(&data_dir);

        info!(
            "workspace ready: {} ({} model, {} dims)",
            root.display(),
            embedder.model_name(),
            dimensions
        );

        Ok(Self {
            root,
            data_dir,
            config,
            db: Arc::new(Mutex::new(db)),
            vectors: Arc::new(RwLock::new(vectors)),
            embedder: Arc::new(embedder),
            hash_cache: Arc::new(Mutex::new(hash_cache)),
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            self.root.clone(),
            self.data_dir.clone(),
            self.config.clone(),
            self.db.clone(),
            self.vectors.clone(),
            self.embedder.clone(),
            self.hash_cache.clone(),
            self.state.clone(),
        )
    }

    pub fn retriever(&self) -> HybridRetriever {
        HybridRetriever::new(
            self.db.clone(),
            self.vectors.clone(),
            self.embedder.clone(),
            self.config.search.clone(),
            self.config.performance.hnsw_ef_search,
        )
    }
}

/// Read-only summary; opens the database but never touches the embedder.
pub fn workspace_status(root: &Path) -> Result<WorkspaceStatus> {
    let data_dir = root.join(DATA_DIR);
    if !data_dir.exists() {
        return Ok(WorkspaceStatus::default());
    }

    let db = BlockDatabase::open(&data_dir)?;
    let stats = db.stats()?;
    let state = StateManager::load(&data_dir);

    Ok(WorkspaceStatus {
        total_files: stats.total_files,
        total_blocks: stats.total_blocks,
        total_vectors: stats.total_vectors,
        languages: stats.languages,
        model_name: state.metadata.model_name,
        dimensions: state.metadata.dimensions,
        last_status: state.state.status,
    })
}

/// Wipe all engine state for the workspace. The explicit recovery path for
/// store corruption; never invoked automatically.
pub fn clear_workspace(root: &Path) -> Result<()> {
    let data_dir = root.join(DATA_DIR);
    if data_dir.exists() {
        fs::remove_dir_all(&data_dir)
            .with_context(|| format!("removing {}", data_dir.display()))?;
        info!("cleared {}", data_dir.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn local_config(data_dir: &Path) {
        std::fs::create_dir_all(data_dir).unwrap();
        std::fs::write(
            data_dir.join("config.json"),
            r#"{ "embedder": { "provider": "local", "dimensions": 64 } }"#,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn initialize_creates_layout_and_ingests() {
        let dir = TempDir::new().unwrap();
        local_config(&dir.path().join(DATA_DIR));
        std::fs::write(
            dir.path().join("a.ts"),
            "export function one() { return 1; }",
        )
        .unwrap();

        let ws = SyntheoWorkspace::initialize(dir.path()).await.unwrap();
        assert!(ws.data_dir.join("config.json").exists());
        assert!(ws.data_dir.join("cache.db").exists());

        let report = ws.ingestor().index_workspace(false).await.unwrap();
        assert_eq!(report.indexed, 1);

        let status = workspace_status(dir.path()).unwrap();
        assert_eq!(status.total_files, 1);
        assert_eq!(status.total_blocks, 1);
        assert_eq!(status.model_name, "hashing-v1");
    }

    #[tokio::test]
    async fn search_works_end_to_end() {
        let dir = TempDir::new().unwrap();
        local_config(&dir.path().join(DATA_DIR));
        std::fs::write(
            dir.path().join("a.ts"),
            "export function getUserById(id: string) { return db.users.find(id); }",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.py"),
            "def fetch_user(id):\n    return db.users.get(id)\n",
        )
        .unwrap();

        let ws = SyntheoWorkspace::initialize(dir.path()).await.unwrap();
        ws.ingestor().index_workspace(false).await.unwrap();

        let results = ws
            .retriever()
            .search(
                "user by id",
                &crate::query::SearchOptions {
                    min_score: Some(0.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(
            results[0].block.symbol_name.as_deref(),
            Some("getUserById")
        );
    }

    #[tokio::test]
    async fn clear_removes_all_state() {
        let dir = TempDir::new().unwrap();
        local_config(&dir.path().join(DATA_DIR));

        let ws = SyntheoWorkspace::initialize(dir.path()).await.unwrap();
        drop(ws);
        clear_workspace(dir.path()).unwrap();
        assert!(!dir.path().join(DATA_DIR).exists());

        let status = workspace_status(dir.path()).unwrap();
        assert_eq!(status.total_files, 0);
    }

    #[test]
    fn status_on_untouched_workspace_is_zero() {
        let dir = TempDir::new().unwrap();
        let status = workspace_status(dir.path()).unwrap();
        assert_eq!(status.total_files, 0);
        assert_eq!(status.total_blocks, 0);
    }
}
