//! Reply normalization shared by every completion transport.

/// Appended to a reply cut at the word cap.
pub const ELLIPSIS: &str = "…";

/// Cut `text` to at most `max_words` whitespace-separated words.
///
/// Longer input becomes the first `max_words` words joined by single spaces plus [`ELLIPSIS`];
/// anything within the cap is returned unchanged.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let mut words = text.split_whitespace();
    let kept: Vec<&str> = words.by_ref().take(max_words).collect();
    if words.next().is_none() {
        return text.to_string();
    }
    let mut out = kept.join(" ");
    out.push_str(ELLIPSIS);
    out
}

/// Trim and cap a raw reply. Every transport goes through this.
pub fn normalize_reply(raw: &str, max_words: usize) -> String {
    truncate_words(raw.trim(), max_words)
}
