//! Core data types shared by the chunker, the stores, and retrieval.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The indexing unit: a syntactic fragment of one source file.
///
/// `block_id` is a content-position hash (see [`crate::hashing::block_id`]) and
/// is stable across re-ingestions of an unchanged fragment. A block is never
/// mutated in place; replacement is delete-then-insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub block_id: String,
    /// Path relative to the workspace root.
    pub file_path: String,
    /// 1-based, inclusive.
    pub start_line: u32,
    /// 1-based, inclusive; always >= start_line.
    pub end_line: u32,
    pub content: String,
    /// SHA-256 of `content`, hex encoded.
    pub content_hash: String,
    /// A semantic node kind, or `"file"` for whole-file fallback blocks.
    pub block_type: String,
    pub language: String,
    pub symbol_name: Option<String>,
    pub parent_symbol: Option<String>,
    /// Ordinal within an oversize node that was split, 0 otherwise.
    pub chunk_index: u32,
    /// Estimated token count of `content`.
    pub tokens: u32,
    /// Milliseconds since epoch.
    pub created_at: i64,
    pub updated_at: i64,
}

/// Per-file summary row kept alongside blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_path: String,
    pub file_hash: String,
    pub language: String,
    pub size_bytes: u64,
    pub line_count: u32,
    /// Milliseconds since epoch of the last successful ingest.
    pub last_indexed: i64,
    /// Filesystem mtime in milliseconds, for recency ranking.
    pub last_modified: i64,
    pub block_count: u32,
    pub is_deleted: bool,
}

/// One recorded query, kept in a bounded ring for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchStat {
    pub query_hash: String,
    pub query: String,
    pub result_count: u32,
    pub avg_score: f32,
    pub execution_time_ms: u64,
    pub timestamp: i64,
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000); // after Sep 2020
    }
}
