//! Query expansion for the keyword channel.
//!
//! A query grows alternative surface forms: identifier-style splits, entries
//! from a fixed programming-synonym table, and code-pattern substitutions for
//! a handful of multi-word phrases. The semantic channel embeds the original
//! query only; expansions exist so BM25 can see through naming conventions.

use crate::embed::split_identifier;

/// token -> interchangeable terms
const SYNONYMS: &[(&str, &[&str])] = &[
    ("auth", &["authentication", "login", "signin", "credential"]),
    ("fetch", &["get", "retrieve", "load", "request", "api"]),
    ("error", &["exception", "failure", "fault", "err"]),
    ("user", &["account", "profile", "member"]),
    ("data", &["payload", "record", "information"]),
    ("create", &["add", "insert", "new", "make"]),
    ("update", &["modify", "change", "edit", "patch"]),
    ("delete", &["remove", "destroy", "drop"]),
    ("find", &["search", "locate", "lookup", "query"]),
    ("list", &["enumerate", "all", "collection"]),
    ("render", &["draw", "display", "paint", "view"]),
    ("connect", &["attach", "link", "join", "bind"]),
    ("send", &["emit", "publish", "dispatch", "post"]),
    ("receive", &["consume", "subscribe", "listen", "handle"]),
];

/// phrase -> code patterns it usually means
const CODE_PATTERNS: &[(&str, &[&str])] = &[
    ("error handler", &["try catch", "exception handling", "catch block"]),
    ("error handling", &["try catch", "exception handling", "catch block"]),
    ("event handler", &["listener", "callback", "on event"]),
    ("api call", &["http request", "fetch request", "endpoint"]),
    ("unit test", &["test case", "assertion", "spec"]),
];

/// Expand a query into distinct surface forms, the original first.
pub fn expand_query(query: &str) -> Vec<String> {
    let mut variants = vec![query.to_string()];
    let lowered = query.to_lowercase();

    // camelCase / snake_case / kebab-case splits of each word, lowercased.
    let split: String = query
        .split_whitespace()
        .flat_map(split_identifier)
        .collect::<Vec<_>>()
        .join(" ");
    if !split.is_empty() && split != lowered {
        variants.push(split);
    }

    // Single-token synonyms. Keyword retrieval ORs tokens, so synonyms join
    // the pool as standalone terms.
    for word in lowered.split_whitespace() {
        if let Some((_, syns)) = SYNONYMS.iter().find(|(k, _)| *k == word) {
            for syn in *syns {
                variants.push((*syn).to_string());
            }
        }
    }

    // Multi-word code-pattern substitutions.
    for (phrase, patterns) in CODE_PATTERNS {
        if lowered.contains(phrase) {
            for pattern in *patterns {
                variants.push((*pattern).to_string());
            }
        }
    }

    dedup_preserving_order(variants)
}

fn dedup_preserving_order(variants: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    variants
        .into_iter()
        .filter(|v| seen.insert(v.to_lowercase()))
        .collect()
}
