//! Language detection and per-language chunking rules.

use std::collections::HashSet;

/// Extensions the scanner will pick up. Files outside this set are ignored.
pub fn indexable_extensions() -> HashSet<&'static str> {
    [
        "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "java", "go", "rs", "rb", "php", "cs",
        "kt", "kts", "swift", "html", "htm", "css", "scss", "sql", "md", "markdown", "json",
        "yml", "yaml", "xml",
    ]
    .into_iter()
    .collect()
}

/// Directory names never descended into.
pub const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    "coverage",
    ".next",
    ".nuxt",
    "target",
    "bin",
    "obj",
    ".syntheo",
];

/// Maximum directory depth below the workspace root.
pub const MAX_SCAN_DEPTH: usize = 50;

/// Map a file extension to its language name.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let lang = match ext {
        "ts" => "typescript",
        "tsx" => "tsx",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascript",
        "py" => "python",
        "java" => "java",
        "go" => "go",
        "rs" => "rust",
        "rb" => "ruby",
        "php" => "php",
        "cs" => "csharp",
        "kt" | "kts" => "kotlin",
        "swift" => "swift",
        "html" | "htm" => "html",
        "css" | "scss" => "css",
        "sql" => "sql",
        "md" | "markdown" => "markdown",
        "json" => "json",
        "yml" | "yaml" => "yaml",
        "xml" => "xml",
        _ => return None,
    };
    Some(lang)
}

/// Node kinds chunked as standalone semantic blocks, per language.
pub fn semantic_node_kinds(language: &str) -> &'static [&'static str] {
    match language {
        "typescript" | "tsx" | "javascript" => &[
            "function_declaration",
            "function_expression",
            "arrow_function",
            "class_declaration",
            "class_expression",
            "method_definition",
            "interface_declaration",
            "type_alias_declaration",
            "enum_declaration",
        ],
        "python" => &[
            "function_definition",
            "class_definition",
            "decorated_definition",
        ],
        _ => &[],
    }
}

/// Block types that behave like callables for ranking purposes.
pub fn is_function_like(block_type: &str) -> bool {
    matches!(
        block_type,
        "function_declaration"
            | "function_expression"
            | "arrow_function"
            | "method_definition"
            | "function_definition"
    )
}
