//! Block catalog and file table operations, plus search statistics.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, Row};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::BlockDatabase;
use crate::model::{Block, FileRecord, SearchStat};

/// The search-statistics ring keeps this many most recent rows.
const SEARCH_STATS_RING: usize = 1000;

/// Aggregate counts for `status` output.
#[derive(Debug, Default)]
pub struct CatalogStats {
    pub total_files: usize,
    pub total_blocks: usize,
    pub total_vectors: usize,
    pub languages: HashMap<String, usize>,
}

pub(super) fn insert_block_row(conn: &Connection, block: &Block) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO code_blocks
         (block_id, file_path, start_line, end_line, content, content_hash,
          block_type, language, symbol_name, parent_symbol, chunk_index, tokens,
          created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            block.block_id,
            block.file_path,
            block.start_line,
            block.end_line,
            block.content,
            block.content_hash,
            block.block_type,
            block.language,
            block.symbol_name,
            block.parent_symbol,
            block.chunk_index,
            block.tokens,
            block.created_at,
            block.updated_at,
        ],
    )?;
    Ok(())
}

pub(super) fn upsert_file_row(conn: &Connection, record: &FileRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO files
         (path, hash, language, size, line_count, last_indexed, last_modified,
          block_count, is_deleted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.file_path,
            record.file_hash,
            record.language,
            record.size_bytes,
            record.line_count,
            record.last_indexed,
            record.last_modified,
            record.block_count,
            record.is_deleted,
        ],
    )?;
    Ok(())
}

fn row_to_block(row: &Row) -> rusqlite::Result<Block> {
    Ok(Block {
        block_id: row.get("block_id")?,
        file_path: row.get("file_path")?,
        start_line: row.get("start_line")?,
        end_line: row.get("end_line")?,
        content: row.get("content")?,
        content_hash: row.get("content_hash")?,
        block_type: row.get("block_type")?,
        language: row.get("language")?,
        symbol_name: row.get("symbol_name")?,
        parent_symbol: row.get("parent_symbol")?,
        chunk_index: row.get("chunk_index")?,
        tokens: row.get("tokens")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const BLOCK_COLUMNS: &str = "block_id, file_path, start_line, end_line, content, content_hash,
     block_type, language, symbol_name, parent_symbol, chunk_index, tokens,
     created_at, updated_at";

impl BlockDatabase {
    pub fn get_block(&self, block_id: &str) -> Result<Option<Block>> {
        let sql = format!("SELECT {BLOCK_COLUMNS} FROM code_blocks WHERE block_id = ?1");
        let mut stmt = self.conn().prepare(&sql)?;
        match stmt.query_row(params![block_id], row_to_block) {
            Ok(block) => Ok(Some(block)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(anyhow!("database error: {}", e)),
        }
    }

    /// Blocks for one file in source order.
    pub fn blocks_for_file(&self, file_path: &str) -> Result<Vec<Block>> {
        let sql = format!(
            "SELECT {BLOCK_COLUMNS} FROM code_blocks
             WHERE file_path = ?1 ORDER BY start_line, chunk_index"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![file_path], row_to_block)?;
        let mut blocks = Vec::new();
        for row in rows {
            blocks.push(row?);
        }
        Ok(blocks)
    }

    pub fn get_file_record(&self, file_path: &str) -> Result<Option<FileRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT path, hash, language, size, line_count, last_indexed,
                    last_modified, block_count, is_deleted
             FROM files WHERE path = ?1",
        )?;
        let result = stmt.query_row(params![file_path], |row| {
            Ok(FileRecord {
                file_path: row.get(0)?,
                file_hash: row.get(1)?,
                language: row.get(2)?,
                size_bytes: row.get(3)?,
                line_count: row.get(4)?,
                last_indexed: row.get(5)?,
                last_modified: row.get(6)?,
                block_count: row.get(7)?,
                is_deleted: row.get(8)?,
            })
        });
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(anyhow!("database error: {}", e)),
        }
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        let total_files: usize = self.conn().query_row(
            "SELECT COUNT(*) FROM files WHERE is_deleted = 0",
            [],
            |row| row.get(0),
        )?;
        let total_blocks: usize =
            self.conn()
                .query_row("SELECT COUNT(*) FROM code_blocks", [], |row| row.get(0))?;
        let total_vectors: usize =
            self.conn()
                .query_row("SELECT COUNT(*) FROM vector_map", [], |row| row.get(0))?;

        let mut stmt = self.conn().prepare(
            "SELECT language, COUNT(*) FROM files WHERE is_deleted = 0 GROUP BY language",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
        })?;
        let mut languages = HashMap::new();
        for row in rows {
            let (lang, count) = row?;
            languages.insert(lang, count);
        }

        Ok(CatalogStats {
            total_files,
            total_blocks,
            total_vectors,
            languages,
        })
    }

    /// Fraction of live files per language, for distribution boosting.
    pub fn language_shares(&self) -> Result<HashMap<String, f32>> {
        let stats = self.stats()?;
        let total = stats.total_files.max(1) as f32;
        Ok(stats
            .languages
            .into_iter()
            .map(|(lang, count)| (lang, count as f32 / total))
            .collect())
    }

    /// Paths of files modified within `window_ms` of `now_ms`.
    pub fn recent_files(&self, now_ms: i64, window_ms: i64) -> Result<HashSet<String>> {
        let cutoff = now_ms - window_ms;
        let mut stmt = self.conn().prepare(
            "SELECT path FROM files WHERE is_deleted = 0 AND last_modified >= ?1",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
        let mut paths = HashSet::new();
        for row in rows {
            paths.insert(row?);
        }
        Ok(paths)
    }

    pub fn record_search_stat(&self, stat: &SearchStat) -> Result<()> {
        self.conn().execute(
            "INSERT INTO search_stats
             (query_hash, query, result_count, avg_score, execution_time_ms, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                stat.query_hash,
                stat.query,
                stat.result_count,
                stat.avg_score,
                stat.execution_time_ms,
                stat.timestamp,
            ],
        )?;
        // Trim the ring.
        self.conn().execute(
            "DELETE FROM search_stats WHERE id NOT IN
             (SELECT id FROM search_stats ORDER BY id DESC LIMIT ?1)",
            params![SEARCH_STATS_RING],
        )?;
        Ok(())
    }

    pub fn search_stat_count(&self) -> Result<usize> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM search_stats", [], |row| row.get(0))?)
    }

    pub fn metadata_get(&self, key: &str) -> Result<Option<String>> {
        let result = self.conn().query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(anyhow!("database error: {}", e)),
        }
    }

    pub fn metadata_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        debug!("metadata {} = {}", key, value);
        Ok(())
    }
}
