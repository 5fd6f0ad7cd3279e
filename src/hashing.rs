//! Content hashing for change detection and stable block identities.

use sha2::{Digest, Sha256};

/// SHA-256 of raw bytes, hex encoded.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 of block content, hex encoded.
pub fn hash_content(content: &str) -> String {
    hash_bytes(content.as_bytes())
}

/// Stable block identity: first 16 hex chars of
/// SHA-256 over `file_path|start_line|end_line|block_type|chunk_index`.
///
/// The same fragment reappearing across re-ingestions keeps the same id.
pub fn block_id(
    file_path: &str,
    start_line: u32,
    end_line: u32,
    block_type: &str,
    chunk_index: u32,
) -> String {
    let key = format!(
        "{}|{}|{}|{}|{}",
        file_path, start_line, end_line, block_type, chunk_index
    );
    let mut id = hash_content(&key);
    id.truncate(16);
    id
}

/// Short hash used to key query statistics.
pub fn query_hash(query: &str) -> String {
    let mut h = hash_content(query);
    h.truncate(16);
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_id_is_deterministic() {
        let a = block_id("src/auth.ts", 10, 42, "function_declaration", 0);
        let b = block_id("src/auth.ts", 10, 42, "function_declaration", 0);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn block_id_varies_with_every_component() {
        let base = block_id("a.ts", 1, 5, "function_declaration", 0);
        assert_ne!(base, block_id("b.ts", 1, 5, "function_declaration", 0));
        assert_ne!(base, block_id("a.ts", 2, 5, "function_declaration", 0));
        assert_ne!(base, block_id("a.ts", 1, 6, "function_declaration", 0));
        assert_ne!(base, block_id("a.ts", 1, 5, "class_declaration", 0));
        assert_ne!(base, block_id("a.ts", 1, 5, "function_declaration", 1));
    }

    #[test]
    fn content_hash_matches_known_vector() {
        // SHA-256 of the empty string
        assert_eq!(
            hash_content(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
