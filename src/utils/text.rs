/// Truncate `content` to at most `max_chars` characters, marking the cut with `...`
///
/// Counts characters, not bytes, so multi-byte text is never split.
pub fn excerpt(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        None => content.to_string(),
        Some((cut, _)) => format!("{}...", &content[..cut]),
    }
}

/// Single-line preview used in log messages
pub fn preview(content: &str, max_chars: usize) -> String {
    excerpt(&content.replace('\n', " "), max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_short_content_unchanged() {
        assert_eq!(excerpt("hello", 10), "hello");
        assert_eq!(excerpt("hello", 5), "hello");
        assert_eq!(excerpt("", 0), "");
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("价格上涨了", 2), "价格...");
        assert_eq!(excerpt("abcdef", 3), "abc...");
    }

    #[test]
    fn test_preview_is_single_line() {
        assert_eq!(preview("a\nb\nc", 10), "a b c");
    }
}
