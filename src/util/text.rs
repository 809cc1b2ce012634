//! Text helpers shared by the cache, validator and error types.

/// Truncate `text` to at most `max_chars` characters, appending `...` when cut.
///
/// Counts characters, not bytes, so multi-byte text is never split.
#[must_use]
pub fn truncate_for_display(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Normalise a free-text query for fingerprinting: lowercase, trimmed,
/// internal whitespace collapsed to single spaces.
#[must_use]
pub fn normalize_query(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short_text_unchanged() {
        assert_eq!(truncate_for_display("hello", 10), "hello");
        assert_eq!(truncate_for_display("hello", 5), "hello");
    }

    #[test]
    fn truncate_long_text_appends_ellipsis() {
        assert_eq!(truncate_for_display("hello world", 5), "hello...");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_for_display("héllo wörld", 4), "héll...");
    }

    #[test]
    fn normalize_collapses_case_and_whitespace() {
        assert_eq!(
            normalize_query("  Sherlock   HOLMES\n\tdetective "),
            "sherlock holmes detective"
        );
    }
}
