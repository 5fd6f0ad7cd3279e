//! Full-text retrieval over block content and symbol names (FTS5 + BM25).

use anyhow::Result;
use rusqlite::{params, Connection};
use tracing::debug;

use super::BlockDatabase;

pub(super) fn insert_row(
    conn: &Connection,
    block_id: &str,
    file_path: &str,
    symbol_name: Option<&str>,
    content: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO code_fts (block_id, file_path, symbol_name, content)
         VALUES (?1, ?2, ?3, ?4)",
        params![block_id, file_path, symbol_name.unwrap_or(""), content],
    )?;
    Ok(())
}

pub(super) fn delete_rows_for_file(conn: &Connection, file_path: &str) -> Result<()> {
    conn.execute("DELETE FROM code_fts WHERE file_path = ?1", [file_path])?;
    Ok(())
}

/// Strip everything but word characters and whitespace, split, and OR the
/// surviving tokens. Returns `None` when nothing survives.
fn sanitize_to_match_query(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let tokens: Vec<String> = cleaned
        .split_whitespace()
        .map(|t| format!("\"{}\"", t))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

impl BlockDatabase {
    /// BM25-ranked keyword search. A query that sanitizes to nothing returns
    /// an empty list rather than erroring.
    pub fn search_keywords(&self, raw_query: &str, limit: usize) -> Result<Vec<(String, f32)>> {
        let Some(match_query) = sanitize_to_match_query(raw_query) else {
            debug!("keyword query sanitized to nothing: {:?}", raw_query);
            return Ok(Vec::new());
        };

        // bm25() is smaller-is-better (negative); negate for a positive score.
        let mut stmt = self.conn().prepare(
            "SELECT block_id, -bm25(code_fts) AS score
             FROM code_fts
             WHERE code_fts MATCH ?1
             ORDER BY bm25(code_fts)
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![match_query, limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)? as f32))
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}
