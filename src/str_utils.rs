use std::borrow::Cow;

/// Safely returns a prefix of the string with at most `max_chars` characters.
/// This respects UTF-8 character boundaries.
pub fn prefix_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Returns a log-friendly preview of turn content, marking truncation with an ellipsis.
pub fn preview(s: &str, n: usize) -> Cow<'_, str> {
    if s.chars().count() <= n {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("{}…", prefix_chars(s, n)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_respects_char_boundaries() {
        assert_eq!(prefix_chars("こんにちは", 2), "こん");
        assert_eq!(prefix_chars("ab", 8), "ab");
    }

    #[test]
    fn test_preview_only_allocates_when_truncating() {
        assert!(matches!(preview("short", 10), Cow::Borrowed("short")));
        assert_eq!(preview("a longer sentence", 8), "a longer…");
    }
}
