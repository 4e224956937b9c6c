//! Text cleanup applied before any pattern matching.

use std::sync::LazyLock;

use regex::Regex;

static HYPHEN_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w)-[ \t]*\r?\n\s*(\w)").expect("valid hyphen regex"));

static PAGE_FOOTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bpage\s+\d+\s+of\s+\d+\b").expect("valid footer regex"));

static BILL_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:senate|house|assembly)\s+bill\s+(?:no\.\s*)?\d+\b")
        .expect("valid header regex")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Strip page footers and running bill headers, re-join words hyphenated
/// across line breaks, and collapse whitespace.
pub fn normalize(raw: &str) -> String {
    let text = HYPHEN_BREAK.replace_all(raw, "$1$2");
    let text = PAGE_FOOTER.replace_all(&text, " ");
    let text = BILL_HEADER.replace_all(&text, " ");
    let text = WHITESPACE.replace_all(&text, " ");
    text.trim().to_string()
}

/// Leading `max_chars` characters of `text`.
pub fn sample(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
