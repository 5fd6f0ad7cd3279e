//! Thin tree-sitter wrapper.
//!
//! Parsers are cheap to construct, so one is built per file rather than
//! pooled. Languages without a wired grammar return `None` and fall through
//! to whole-file chunking.

use anyhow::{anyhow, Result};
use tree_sitter::{Language, Parser, Tree};

fn grammar_for(language: &str) -> Option<Language> {
    match language {
        "typescript" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "tsx" => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
        "javascript" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "python" => Some(tree_sitter_python::LANGUAGE.into()),
        _ => None,
    }
}

/// Parse `source` with the grammar for `language`.
///
/// `Ok(None)` means "no grammar for this language" (caller falls back to a
/// file-level block); an error means the parser itself failed on a language
/// we do support.
pub fn parse(source: &str, language: &str) -> Result<Option<Tree>> {
    let Some(grammar) = grammar_for(language) else {
        return Ok(None);
    };

    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| anyhow!("failed to load {} grammar: {}", language, e))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| anyhow!("parser returned no tree for {} source", language))?;
    Ok(Some(tree))
}
