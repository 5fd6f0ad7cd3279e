//! Deterministic boost and re-rank scoring.
//!
//! Boosting multiplies the fused score by metadata-driven factors; re-ranking
//! is a second multiplicative pass over the already-truncated top results,
//! clipped to 1.0. Both are pure functions so ordering properties can be
//! tested directly.

use std::collections::{HashMap, HashSet};

use crate::language::is_function_like;
use crate::model::Block;

pub struct BoostContext<'a> {
    pub query: &'a str,
    pub recent_files: &'a HashSet<String>,
    pub language_shares: &'a HashMap<String, f32>,
}

/// Strip everything but alphanumerics and lowercase, so `"user by id"`
/// and `getUserById` become comparable.
fn squash(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn symbol_factor(query: &str, symbol_name: Option<&str>) -> f32 {
    let Some(symbol) = symbol_name else {
        return 1.0;
    };
    let q = squash(query);
    let s = squash(symbol);
    if q.is_empty() || s.is_empty() {
        1.0
    } else if q == s {
        1.5
    } else if s.contains(&q) {
        1.3
    } else if q.contains(&s) {
        1.2
    } else {
        1.0
    }
}

fn path_factor(query: &str, file_path: &str) -> f32 {
    let q = query.to_lowercase();
    let path = file_path.to_lowercase();
    if q.is_empty() {
        return 1.0;
    }
    if path.contains(&q) {
        return 1.3;
    }
    let basename = path.rsplit('/').next().unwrap_or(&path);
    if basename.contains(&q) {
        1.2
    } else {
        1.0
    }
}

fn block_type_factor(block_type: &str) -> f32 {
    if is_function_like(block_type) {
        return 1.3;
    }
    match block_type {
        "decorated_definition" => 1.25,
        "class_declaration" | "class_definition" | "class_expression" => 1.2,
        "interface_declaration" | "type_alias_declaration" => 1.15,
        "enum_declaration" => 1.1,
        "file" => 0.95,
        _ => 1.0,
    }
}

fn language_factor(share: f32) -> f32 {
    if share > 0.5 {
        1.1
    } else if share > 0.2 {
        1.05
    } else if share < 0.05 {
        0.95
    } else {
        1.0
    }
}

fn channel_balance_factor(semantic: f32, keyword: f32) -> f32 {
    if semantic > 0.7 && keyword > 0.7 {
        1.2
    } else if semantic > 0.8 || keyword > 0.8 {
        1.1
    } else if semantic < 0.3 && keyword < 0.3 {
        0.8
    } else {
        1.0
    }
}

/// The fused score times the product of all boost factors.
pub fn boost_score(
    fused: f32,
    block: &Block,
    semantic: f32,
    keyword: f32,
    ctx: &BoostContext,
) -> f32 {
    let mut factor = symbol_factor(ctx.query, block.symbol_name.as_deref());
    factor *= path_factor(ctx.query, &block.file_path);
    if ctx.recent_files.contains(&block.file_path) {
        factor *= 1.25;
    }
    factor *= block_type_factor(&block.block_type);
    let share = ctx
        .language_shares
        .get(&block.language)
        .copied()
        .unwrap_or(0.0);
    factor *= language_factor(share);
    factor *= channel_balance_factor(semantic, keyword);

    fused * factor
}

/// Re-rank factor for one top-k result.
pub fn rerank_factor(query: &str, block: &Block, semantic: f32, keyword: f32) -> f32 {
    let mut factor = 1.0f32;
    let q_lower = query.to_lowercase();

    if let Some(symbol) = block.symbol_name.as_deref() {
        let q = squash(query);
        let s = squash(symbol);
        if !q.is_empty() && q == s {
            factor *= 1.5;
        } else if !q.is_empty() && s.contains(&q) {
            factor *= 1.2;
        }
    }

    let content_lower = block.content.to_lowercase();
    if !q_lower.is_empty() && content_lower.contains(&q_lower) {
        factor *= 1.1;
    }

    let matches = q_lower
        .split_whitespace()
        .filter(|t| t.len() > 2 && content_lower.contains(*t))
        .count();
    factor *= 1.0 + 0.05 * matches as f32;

    if semantic > 0.8 && keyword > 0.5 {
        factor *= 1.15;
    }
    if is_function_like(&block.block_type) {
        factor *= 1.05;
    }
    if block.content.lines().count() > 50 {
        factor *= 0.95;
    }

    factor
}

/// Weighted fusion of per-channel maxima.
pub fn fuse(semantic: f32, keyword: f32, semantic_weight: f32, keyword_weight: f32) -> f32 {
    let denom = semantic_weight + keyword_weight;
    if denom <= f32::EPSILON {
        return 0.0;
    }
    (semantic * semantic_weight + keyword * keyword_weight) / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing;
    use crate::model::Block;

    fn block(symbol: Option<&str>, block_type: &str, file: &str, content: &str) -> Block {
        Block {
            block_id: hashing::block_id(file, 1, 3, block_type, 0),
            file_path: file.to_string(),
            start_line: 1,
            end_line: 3,
            content: content.to_string(),
            content_hash: hashing::hash_content(content),
            block_type: block_type.to_string(),
            language: "typescript".to_string(),
            symbol_name: symbol.map(|s| s.to_string()),
            parent_symbol: None,
            chunk_index: 0,
            tokens: 10,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn ctx<'a>(
        query: &'a str,
        recent: &'a HashSet<String>,
        shares: &'a HashMap<String, f32>,
    ) -> BoostContext<'a> {
        BoostContext {
            query,
            recent_files: recent,
            language_shares: shares,
        }
    }

    #[test]
    fn exact_symbol_match_outranks_partial() {
        assert_eq!(symbol_factor("getUserById", Some("getUserById")), 1.5);
        assert_eq!(symbol_factor("user by id", Some("getUserById")), 1.3);
        assert_eq!(symbol_factor("the getUserById function", Some("getUserById")), 1.2);
        assert_eq!(symbol_factor("renderChart", Some("getUserById")), 1.0);
        assert_eq!(symbol_factor("anything", None), 1.0);
    }

    #[test]
    fn squashing_sees_through_naming_conventions() {
        assert_eq!(symbol_factor("fetch user", Some("fetch_user")), 1.5);
        assert_eq!(symbol_factor("FetchUser", Some("fetch_user")), 1.5);
    }

    #[test]
    fn path_factor_tiers() {
        assert_eq!(path_factor("auth", "src/auth/login.ts"), 1.3);
        assert_eq!(path_factor("login.ts", "src/auth/login.ts"), 1.3);
        assert_eq!(path_factor("billing", "src/auth/login.ts"), 1.0);
    }

    #[test]
    fn block_type_ladder() {
        assert_eq!(block_type_factor("function_declaration"), 1.3);
        assert_eq!(block_type_factor("function_definition"), 1.3);
        assert_eq!(block_type_factor("decorated_definition"), 1.25);
        assert_eq!(block_type_factor("class_declaration"), 1.2);
        assert_eq!(block_type_factor("interface_declaration"), 1.15);
        assert_eq!(block_type_factor("enum_declaration"), 1.1);
        assert_eq!(block_type_factor("file"), 0.95);
        assert_eq!(block_type_factor("lexical_declaration"), 1.0);
    }

    #[test]
    fn language_distribution_tiers() {
        assert_eq!(language_factor(0.6), 1.1);
        assert_eq!(language_factor(0.3), 1.05);
        assert_eq!(language_factor(0.1), 1.0);
        assert_eq!(language_factor(0.01), 0.95);
    }

    #[test]
    fn channel_balance_tiers() {
        assert_eq!(channel_balance_factor(0.8, 0.8), 1.2);
        assert_eq!(channel_balance_factor(0.9, 0.1), 1.1);
        assert_eq!(channel_balance_factor(0.1, 0.9), 1.1);
        assert_eq!(channel_balance_factor(0.1, 0.1), 0.8);
        assert_eq!(channel_balance_factor(0.5, 0.5), 1.0);
    }

    #[test]
    fn recency_multiplies() {
        let mut recent = HashSet::new();
        recent.insert("src/a.ts".to_string());
        let shares = HashMap::new();
        let b = block(None, "other", "src/a.ts", "x");
        let cold = block(None, "other", "src/b.ts", "x");

        let hot_score = boost_score(0.5, &b, 0.5, 0.5, &ctx("zzz", &recent, &shares));
        let cold_score = boost_score(0.5, &cold, 0.5, 0.5, &ctx("zzz", &recent, &shares));
        assert!((hot_score / cold_score - 1.25).abs() < 1e-5);
    }

    #[test]
    fn fusion_weights_and_monotonicity() {
        assert!((fuse(1.0, 0.0, 0.7, 0.3) - 0.7).abs() < 1e-6);
        assert!((fuse(0.0, 1.0, 0.7, 0.3) - 0.3).abs() < 1e-6);
        assert!((fuse(0.8, 0.4, 0.7, 0.3) - (0.8 * 0.7 + 0.4 * 0.3)).abs() < 1e-6);

        // Raising the semantic weight cannot drop a purely-semantic hit below
        // a purely-keyword one.
        let sem_lo = fuse(0.9, 0.0, 0.5, 0.5);
        let kw_lo = fuse(0.0, 0.9, 0.5, 0.5);
        let sem_hi = fuse(0.9, 0.0, 0.9, 0.1);
        let kw_hi = fuse(0.0, 0.9, 0.9, 0.1);
        assert!(sem_hi - kw_hi >= sem_lo - kw_lo);
    }

    #[test]
    fn rerank_rewards_symbol_and_overlap() {
        let b = block(
            Some("parseRequestHandler"),
            "function_declaration",
            "src/h.ts",
            "function parseRequestHandler(req) { return handler(req); }",
        );
        let factor = rerank_factor("handler", &b, 0.2, 0.2);
        // symbol contains query (1.2), content contains query (1.1),
        // one overlapping token (1.05), function-like (1.05)
        let expected = 1.2 * 1.1 * 1.05 * 1.05;
        assert!((factor - expected).abs() < 1e-4);
    }

    #[test]
    fn rerank_penalizes_long_blocks() {
        let long_content = (0..60).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let b = block(None, "other", "src/h.ts", &long_content);
        let factor = rerank_factor("zzz", &b, 0.2, 0.2);
        assert!((factor - 0.95).abs() < 1e-5);
    }
}
