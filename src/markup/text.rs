//! Plain-text helpers: tag stripping and title derivation

use regex::Regex;
use std::sync::OnceLock;

/// Titles derived from content keep at most this many characters
pub const TITLE_MAX_CHARS: usize = 30;

const ELLIPSIS: &str = "...";

/// Text content of an HTML fragment with whitespace runs collapsed
pub fn strip_tags(html: &str) -> String {
    let fragment = super::parse(html);
    let text: String = fragment.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First `max` characters of `text`
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Display title for content that arrived without one
pub fn derive_title(content: &str) -> String {
    let text = strip_tags(content);
    if text.chars().count() > TITLE_MAX_CHARS {
        format!("{}{}", truncate_chars(&text, TITLE_MAX_CHARS), ELLIPSIS)
    } else {
        text
    }
}

/// Normalized prefix used for title lookups
pub fn title_prefix(title: &str) -> String {
    truncate_chars(&strip_tags(title), TITLE_MAX_CHARS).to_string()
}

/// Replace every isolated `&nbsp;` with a plain space; runs of two or more stay
pub fn collapse_single_nbsp(html: &str) -> String {
    static NBSP_RUN: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = NBSP_RUN.get_or_init(|| Regex::new(r"(?:&nbsp;)+").ok()) else {
        return html.to_string();
    };
    re.replace_all(html, |caps: &regex::Captures<'_>| {
        let run = &caps[0];
        if run.len() == "&nbsp;".len() {
            " ".to_string()
        } else {
            run.to_string()
        }
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_title_truncates_long_content() {
        let content = "abcdefghijklmnopqrstuvwxyz0123456789ABCD";
        assert_eq!(content.chars().count(), 40);
        let title = derive_title(content);
        assert_eq!(title, "abcdefghijklmnopqrstuvwxyz0123...");
    }

    #[test]
    fn test_derive_title_keeps_short_content() {
        assert_eq!(derive_title("<p>Short <b>note</b></p>"), "Short note");
    }

    #[test]
    fn test_truncate_counts_characters_not_bytes() {
        let text = "素材库".repeat(20);
        let title = derive_title(&text);
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + ELLIPSIS.len());
        assert!(title.starts_with("素材库素材库"));
    }

    #[test]
    fn test_title_prefix_strips_markup() {
        assert_eq!(title_prefix("<h2>Shipping  policy</h2>"), "Shipping policy");
        assert_eq!(title_prefix(&"x".repeat(50)).len(), TITLE_MAX_CHARS);
    }

    #[test]
    fn test_collapse_single_nbsp() {
        assert_eq!(collapse_single_nbsp("a&nbsp;b"), "a b");
        assert_eq!(collapse_single_nbsp("a&nbsp;&nbsp;b"), "a&nbsp;&nbsp;b");
        assert_eq!(collapse_single_nbsp("&nbsp;x&nbsp;"), " x ");
    }
}
