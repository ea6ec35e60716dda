//! Small pure text helpers.

/// Truncate a string preserving up to `max_content` characters, then append `suffix`.
///
/// The suffix does NOT count toward the budget: the returned string may be up to
/// `max_content + suffix.chars().count()` characters. Used for per-line display caps
/// where the kept content must be exactly `max_content` characters.
#[must_use]
pub fn truncate_preview(raw: &str, max_content: usize, suffix: &str) -> String {
    match raw.char_indices().nth(max_content) {
        None => raw.to_string(),
        Some((cut, _)) => format!("{}{suffix}", &raw[..cut]),
    }
}

#[cfg(test)]
mod tests {
    use super::truncate_preview;

    #[test]
    fn preview_short_string_unchanged() {
        assert_eq!(truncate_preview("hello", 10, "..."), "hello");
    }

    #[test]
    fn preview_suffix_outside_budget() {
        let result = truncate_preview("hello world", 5, "...");
        assert_eq!(result, "hello...");
    }

    #[test]
    fn preview_counts_chars_not_bytes() {
        let line = "é".repeat(501);
        let result = truncate_preview(&line, 500, "...");
        assert_eq!(result.chars().count(), 503);
        assert!(result.starts_with(&"é".repeat(500)));
    }

    #[test]
    fn preview_exact_length_unchanged() {
        let line = "x".repeat(500);
        assert_eq!(truncate_preview(&line, 500, "..."), line);
    }
}
