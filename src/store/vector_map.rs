//! Label ↔ block mapping with durable raw vectors.
//!
//! Labels are allocated by SQLite AUTOINCREMENT, so they are monotone across
//! restarts and never reused; `max(label) + 1` is what the next insert gets.
//! Vectors are stored little-endian f32 BLOBs next to the mapping, which is
//! what makes capacity-growth rebuilds possible without re-embedding.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};

use super::BlockDatabase;
use crate::model::now_ms;

pub(super) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub(super) fn decode_vector(bytes: &[u8], dimensions: usize) -> Result<Vec<f32>> {
    if bytes.len() != dimensions * 4 {
        return Err(anyhow!(
            "invalid vector blob: expected {} bytes, got {}",
            dimensions * 4,
            bytes.len()
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

pub(super) fn insert_row(conn: &Connection, block_id: &str, vector: &[f32]) -> Result<u64> {
    conn.execute(
        "INSERT OR REPLACE INTO vector_map (block_id, dimensions, vector, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![block_id, vector.len(), encode_vector(vector), now_ms()],
    )?;
    Ok(conn.last_insert_rowid() as u64)
}

pub(super) fn labels_for_file(conn: &Connection, file_path: &str) -> Result<Vec<u64>> {
    let mut stmt = conn.prepare(
        "SELECT vm.label FROM vector_map vm
         JOIN code_blocks cb ON vm.block_id = cb.block_id
         WHERE cb.file_path = ?1",
    )?;
    let rows = stmt.query_map([file_path], |row| row.get::<_, u64>(0))?;
    let mut labels = Vec::new();
    for row in rows {
        labels.push(row?);
    }
    Ok(labels)
}

pub(super) fn delete_rows_for_file(conn: &Connection, file_path: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM vector_map WHERE block_id IN
         (SELECT block_id FROM code_blocks WHERE file_path = ?1)",
        [file_path],
    )?;
    Ok(())
}

impl BlockDatabase {
    /// Resolve an ANN label to its block. `None` means the label is a
    /// tombstone and the caller should skip it silently.
    pub fn block_id_for_label(&self, label: u64) -> Result<Option<String>> {
        let result = self.conn().query_row(
            "SELECT block_id FROM vector_map WHERE label = ?1",
            params![label],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(anyhow!("database error: {}", e)),
        }
    }

    /// All live `(label, vector)` pairs, for ANN (re)builds.
    pub fn load_all_vectors(&self) -> Result<Vec<(u64, Vec<f32>)>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT label, dimensions, vector FROM vector_map ORDER BY label")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, u64>(0)?,
                row.get::<_, usize>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut vectors = Vec::new();
        for row in rows {
            let (label, dimensions, bytes) = row?;
            match decode_vector(&bytes, dimensions) {
                Ok(vector) => vectors.push((label, vector)),
                Err(e) => tracing::warn!("skipping corrupt vector for label {}: {}", label, e),
            }
        }
        Ok(vectors)
    }

    /// The label the next insert will receive.
    pub fn next_label(&self) -> Result<u64> {
        let max: Option<u64> =
            self.conn()
                .query_row("SELECT MAX(label) FROM vector_map", [], |row| row.get(0))?;
        Ok(max.map(|m| m + 1).unwrap_or(1))
    }
}
