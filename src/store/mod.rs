//! Transactional metadata store backed by SQLite.
//!
//! One embedded database (`cache.db`) holds the block catalog, the file
//! table, the full-text index, the label↔block mapping (with the raw vectors,
//! which is what makes ANN rebuilds possible without re-embedding), and the
//! search-statistics ring. A single process is the exclusive writer; WAL mode
//! with `synchronous = NORMAL` keeps per-file commits cheap.
//!
//! The keyword and catalog operations live in sibling files as additional
//! `impl BlockDatabase` blocks.

mod catalog;
mod keyword;
mod vector_map;

pub use catalog::CatalogStats;

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::IndexerError;
use crate::model::{Block, FileRecord};

/// Bumped on any incompatible table change. A mismatch refuses startup.
const SCHEMA_VERSION: &str = "1";

pub struct BlockDatabase {
    conn: Connection,
    #[allow(dead_code)]
    path: PathBuf,
}

/// Everything that lands atomically for one file.
pub struct FileUpdate<'a> {
    pub record: &'a FileRecord,
    pub blocks: &'a [Block],
    /// Parallel to `blocks`; empty when vectors are not being (re)written.
    pub vectors: &'a [Vec<f32>],
}

/// What the transaction did, for the caller to mirror into the ANN index.
#[derive(Debug, Default)]
pub struct FileUpdateOutcome {
    /// Labels whose mapping rows were removed; tombstones in the ANN.
    pub removed_labels: Vec<u64>,
    /// Newly allocated labels, parallel to the update's blocks.
    pub inserted_labels: Vec<u64>,
}

impl BlockDatabase {
    /// Open (or create) the store at `dir/cache.db` and verify the schema.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join("cache.db");
        info!("opening block database at {}", path.display());
        let conn = Connection::open(&path)?;
        let mut db = Self { conn, path };
        db.configure()?;
        db.initialize_schema()?;
        db.check_schema_version()?;
        Ok(db)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        db.configure()?;
        db.initialize_schema()?;
        db.check_schema_version()?;
        Ok(db)
    }

    fn configure(&self) -> Result<()> {
        self.conn.execute("PRAGMA foreign_keys = ON", [])?;
        // journal_mode returns a row
        self.conn
            .query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        self.conn.execute("PRAGMA synchronous = NORMAL", [])?;
        Ok(())
    }

    fn initialize_schema(&mut self) -> Result<()> {
        debug!("creating database schema");

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                hash TEXT NOT NULL,
                language TEXT NOT NULL,
                size INTEGER NOT NULL,
                line_count INTEGER NOT NULL DEFAULT 0,
                last_indexed INTEGER NOT NULL DEFAULT 0,
                last_modified INTEGER NOT NULL DEFAULT 0,
                block_count INTEGER NOT NULL DEFAULT 0,
                is_deleted INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_files_language ON files(language)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_files_modified ON files(last_modified)",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS code_blocks (
                block_id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                block_type TEXT NOT NULL,
                language TEXT NOT NULL,
                symbol_name TEXT,
                parent_symbol TEXT,
                chunk_index INTEGER NOT NULL DEFAULT 0,
                tokens INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_blocks_file ON code_blocks(file_path)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_blocks_language ON code_blocks(language)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_blocks_type ON code_blocks(block_type)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_blocks_symbol ON code_blocks(symbol_name)",
            [],
        )?;

        // Full-text index over block content and symbol names. Standalone
        // (not external-content) so rows can be deleted by file path.
        self.conn.execute(
            r#"CREATE VIRTUAL TABLE IF NOT EXISTS code_fts USING fts5(
                block_id UNINDEXED,
                file_path UNINDEXED,
                symbol_name,
                content,
                tokenize = "porter unicode61"
            )"#,
            [],
        )?;

        // Label allocation is AUTOINCREMENT so labels are monotone and never
        // reused even after the max row is deleted.
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS vector_map (
                label INTEGER PRIMARY KEY AUTOINCREMENT,
                block_id TEXT NOT NULL UNIQUE,
                dimensions INTEGER NOT NULL,
                vector BLOB NOT NULL,
                created_at INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_vector_map_block ON vector_map(block_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS search_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query_hash TEXT NOT NULL,
                query TEXT NOT NULL,
                result_count INTEGER NOT NULL,
                avg_score REAL NOT NULL,
                execution_time_ms INTEGER NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;

        debug!("database schema ready");
        Ok(())
    }

    fn check_schema_version(&self) -> Result<()> {
        match self.metadata_get("schema_version")? {
            None => {
                self.metadata_set("schema_version", SCHEMA_VERSION)?;
                Ok(())
            }
            Some(v) if v == SCHEMA_VERSION => Ok(()),
            Some(v) => Err(anyhow!(IndexerError::StoreCorruption(format!(
                "schema version {} on disk, {} expected",
                v, SCHEMA_VERSION
            )))),
        }
    }

    /// Replace everything the store knows about one file, atomically.
    ///
    /// Old blocks, their full-text rows and their vector-map rows go out; the
    /// new set comes in; the file record is upserted. A concurrent reader sees
    /// either the old state or the new one, never a mixture. ANN mutations are
    /// the caller's job, driven by the returned label sets.
    pub fn apply_file_update(&self, update: &FileUpdate) -> Result<FileUpdateOutcome> {
        let tx = self.conn.unchecked_transaction()?;
        let file_path = &update.record.file_path;

        let removed_labels = vector_map::labels_for_file(&tx, file_path)?;
        vector_map::delete_rows_for_file(&tx, file_path)?;
        keyword::delete_rows_for_file(&tx, file_path)?;
        tx.execute(
            "DELETE FROM code_blocks WHERE file_path = ?1",
            [file_path.as_str()],
        )?;

        let mut inserted_labels = Vec::with_capacity(update.blocks.len());
        for (i, block) in update.blocks.iter().enumerate() {
            catalog::insert_block_row(&tx, block)?;
            keyword::insert_row(
                &tx,
                &block.block_id,
                &block.file_path,
                block.symbol_name.as_deref(),
                &block.content,
            )?;
            if let Some(vector) = update.vectors.get(i) {
                let label = vector_map::insert_row(&tx, &block.block_id, vector)?;
                inserted_labels.push(label);
            }
        }

        catalog::upsert_file_row(&tx, update.record)?;
        tx.commit()?;

        debug!(
            "applied update for {}: {} blocks in, {} labels out",
            file_path,
            update.blocks.len(),
            removed_labels.len()
        );
        Ok(FileUpdateOutcome {
            removed_labels,
            inserted_labels,
        })
    }

    /// Transactionally forget a file: blocks, full-text rows and vector-map
    /// rows are removed, the file row is flagged deleted. Returns the labels
    /// to tombstone in the ANN.
    pub fn remove_file(&self, file_path: &str) -> Result<Vec<u64>> {
        let tx = self.conn.unchecked_transaction()?;

        let removed_labels = vector_map::labels_for_file(&tx, file_path)?;
        vector_map::delete_rows_for_file(&tx, file_path)?;
        keyword::delete_rows_for_file(&tx, file_path)?;
        tx.execute(
            "DELETE FROM code_blocks WHERE file_path = ?1",
            [file_path],
        )?;
        tx.execute(
            "UPDATE files SET is_deleted = 1, block_count = 0 WHERE path = ?1",
            [file_path],
        )?;

        tx.commit()?;
        debug!(
            "removed {} ({} vector labels tombstoned)",
            file_path,
            removed_labels.len()
        );
        Ok(removed_labels)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}
