//! Token estimation.
//!
//! Two estimators with different jobs: the word-based one drives chunk sizing
//! (so chunk boundaries stay stable regardless of embedder), the char-based
//! one drives truncation before the text is sent to the embedding model.

/// Chunk-sizing estimate: `ceil(0.75 × whitespace word count)`.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    (words as f64 * 0.75).ceil() as usize
}

/// Embedder-side estimate: ~4 characters per token.
pub fn estimate_embed_tokens(text: &str) -> usize {
    (text.chars().count() as f64 / 4.0).ceil() as usize
}

/// Truncate `text` to at most `max_tokens` (char-based estimate) before it is
/// embedded. Prefers cutting at the last newline found in the final 20% of
/// the window so a block is not severed mid-statement.
pub fn truncate_for_embedding(text: &str, max_tokens: usize) -> &str {
    let max_chars = max_tokens * 4;
    if text.chars().count() <= max_chars {
        return text;
    }

    // Find the byte offset of the max_chars-th character.
    let cut = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());

    let window = &text[..cut];
    let mut tail_start = cut - (cut / 5);
    while !window.is_char_boundary(tail_start) {
        tail_start -= 1;
    }
    if let Some(pos) = window[tail_start..].rfind('\n') {
        &window[..tail_start + pos]
    } else {
        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_embed_tokens(""), 0);
    }

    #[test]
    fn word_estimate_rounds_up() {
        // 4 words * 0.75 = 3.0
        assert_eq!(estimate_tokens("fn main does things"), 3);
        // 3 words * 0.75 = 2.25 -> 3
        assert_eq!(estimate_tokens("one two three"), 3);
    }

    #[test]
    fn short_text_is_not_truncated() {
        let text = "let x = 1;";
        assert_eq!(truncate_for_embedding(text, 2000), text);
    }

    #[test]
    fn truncation_prefers_newline_in_tail() {
        // 10 lines of 100 chars each, truncate to ~150 tokens = 600 chars.
        let line = "x".repeat(99);
        let text = (0..10).map(|_| line.clone()).collect::<Vec<_>>().join("\n");
        let out = truncate_for_embedding(&text, 150);
        assert!(out.len() <= 600);
        // Cut landed on a line boundary, not mid-line.
        assert!(out.ends_with(&line));
    }

    #[test]
    fn truncation_without_newline_cuts_at_window() {
        let text = "y".repeat(10_000);
        let out = truncate_for_embedding(&text, 100);
        assert_eq!(out.len(), 400);
    }
}
