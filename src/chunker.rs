//! Syntax-aware chunking: parse tree in, ordered [`Block`]s out.
//!
//! Semantic nodes (functions, classes, methods, ...) become standalone blocks.
//! Anything nested inside a semantic node carries that node's identifier as
//! `parent_symbol`. Files that produce no semantic block at all are indexed as
//! a single `"file"` block. Oversize nodes are split into overlapping line
//! windows that share the node's name as `parent_symbol`.

use tree_sitter::{Node, Tree};

use crate::hashing;
use crate::language::semantic_node_kinds;
use crate::model::Block;
use crate::tokens::estimate_tokens;

/// Sizing knobs for block emission.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPolicy {
    pub target_tokens: usize,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            target_tokens: 384,
            max_tokens: 1536,
            overlap_tokens: 50,
        }
    }
}

/// Chunk one file into blocks, in source order.
pub fn chunk_file(
    file_path: &str,
    source: &str,
    tree: Option<&Tree>,
    language: &str,
    policy: &ChunkPolicy,
    now_ms: i64,
) -> Vec<Block> {
    let lines: Vec<&str> = source.lines().collect();
    let mut blocks = Vec::new();

    if let Some(tree) = tree {
        let kinds = semantic_node_kinds(language);
        if !kinds.is_empty() {
            walk(
                tree.root_node(),
                None,
                kinds,
                file_path,
                &lines,
                language,
                policy,
                now_ms,
                &mut blocks,
            );
        }
    }

    if blocks.is_empty() && !lines.is_empty() {
        emit_node_blocks(
            file_path, &lines, 1, lines.len() as u32, "file", None, None, language, policy,
            now_ms, &mut blocks,
        );
    }

    blocks.sort_by_key(|b| (b.start_line, b.chunk_index));
    blocks
}

#[allow(clippy::too_many_arguments)]
fn walk(
    node: Node,
    parent_symbol: Option<&str>,
    kinds: &[&str],
    file_path: &str,
    lines: &[&str],
    language: &str,
    policy: &ChunkPolicy,
    now_ms: i64,
    out: &mut Vec<Block>,
) {
    if kinds.contains(&node.kind()) {
        let name = identifier_of(node, lines);
        let start_line = node.start_position().row as u32 + 1;
        let end_line = node.end_position().row as u32 + 1;
        emit_node_blocks(
            file_path,
            lines,
            start_line,
            end_line,
            node.kind(),
            name.as_deref(),
            parent_symbol,
            language,
            policy,
            now_ms,
            out,
        );

        // Descend only through non-semantic children; nested semantic blocks
        // found there are attributed to this node by name.
        let next_parent = name.as_deref().or(parent_symbol);
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            if !kinds.contains(&child.kind()) {
                walk(
                    child, next_parent, kinds, file_path, lines, language, policy, now_ms, out,
                );
            }
        }
    } else {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            walk(
                child,
                parent_symbol,
                kinds,
                file_path,
                lines,
                language,
                policy,
                now_ms,
                out,
            );
        }
    }
}

/// First child whose kind is an identifier. TypeScript grammars name classes,
/// interfaces and type aliases with `type_identifier`, so that kind counts.
fn identifier_of(node: Node, lines: &[&str]) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if matches!(
            child.kind(),
            "identifier" | "property_identifier" | "type_identifier"
        ) {
            return node_text(child, lines);
        }
    }
    None
}

fn node_text(node: Node, lines: &[&str]) -> Option<String> {
    let row = node.start_position().row;
    let line = lines.get(row)?;
    let start = node.start_position().column;
    let end = if node.end_position().row == row {
        node.end_position().column
    } else {
        line.len()
    };
    line.get(start..end).map(|s| s.to_string())
}

/// Emit one block for a node, or several overlapping windows if it exceeds
/// the token maximum.
#[allow(clippy::too_many_arguments)]
fn emit_node_blocks(
    file_path: &str,
    lines: &[&str],
    start_line: u32,
    end_line: u32,
    block_type: &str,
    symbol_name: Option<&str>,
    parent_symbol: Option<&str>,
    language: &str,
    policy: &ChunkPolicy,
    now_ms: i64,
    out: &mut Vec<Block>,
) {
    let end_line = end_line.max(start_line);
    let node_lines = &lines[(start_line as usize - 1)..(end_line as usize).min(lines.len())];
    let content = node_lines.join("\n");
    let tokens = estimate_tokens(&content);

    if tokens <= policy.max_tokens {
        out.push(make_block(
            file_path,
            start_line,
            end_line,
            &content,
            block_type,
            symbol_name,
            parent_symbol,
            language,
            0,
            now_ms,
        ));
        return;
    }

    // Split into line windows of roughly target_tokens, overlapping both ways.
    // Sub-blocks of a named node all point back to it via parent_symbol.
    let split_parent = symbol_name.or(parent_symbol);
    for (chunk_index, (rel_start, rel_end)) in
        split_windows(node_lines, policy.target_tokens, policy.overlap_tokens)
            .into_iter()
            .enumerate()
    {
        let win_start = start_line + rel_start as u32;
        let win_end = start_line + rel_end as u32;
        let win_content = node_lines[rel_start..=rel_end].join("\n");
        out.push(make_block(
            file_path,
            win_start,
            win_end,
            &win_content,
            block_type,
            symbol_name,
            split_parent,
            language,
            chunk_index as u32,
            now_ms,
        ));
    }
}

/// Inclusive relative line ranges covering `lines`, each accumulating about
/// `target` estimated tokens, extended by a symmetric overlap converted from
/// tokens to lines via the node's mean tokens-per-line.
fn split_windows(lines: &[&str], target: usize, overlap: usize) -> Vec<(usize, usize)> {
    let n = lines.len();
    if n == 0 {
        return Vec::new();
    }

    let line_tokens: Vec<usize> = lines.iter().map(|l| estimate_tokens(l)).collect();
    let total: usize = line_tokens.iter().sum();
    let avg = (total / n).max(1);
    let overlap_lines = overlap.div_ceil(avg);

    let mut windows = Vec::new();
    let mut cursor = 0usize;
    while cursor < n {
        let mut acc = 0usize;
        let mut end = cursor;
        while end < n && acc < target {
            acc += line_tokens[end];
            end += 1;
        }
        let win_start = cursor.saturating_sub(overlap_lines);
        let win_end = (end - 1 + overlap_lines).min(n - 1);
        windows.push((win_start, win_end));
        cursor = end;
    }
    windows
}

#[allow(clippy::too_many_arguments)]
fn make_block(
    file_path: &str,
    start_line: u32,
    end_line: u32,
    content: &str,
    block_type: &str,
    symbol_name: Option<&str>,
    parent_symbol: Option<&str>,
    language: &str,
    chunk_index: u32,
    now_ms: i64,
) -> Block {
    Block {
        block_id: hashing::block_id(file_path, start_line, end_line, block_type, chunk_index),
        file_path: file_path.to_string(),
        start_line,
        end_line,
        content: content.to_string(),
        content_hash: hashing::hash_content(content),
        block_type: block_type.to_string(),
        language: language.to_string(),
        symbol_name: symbol_name.map(|s| s.to_string()),
        parent_symbol: parent_symbol.map(|s| s.to_string()),
        chunk_index,
        tokens: estimate_tokens(content) as u32,
        created_at: now_ms,
        updated_at: now_ms,
    }
}
