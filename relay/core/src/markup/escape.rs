//! Metacharacter escaping for the target markup.

use std::sync::LazyLock;

use regex::Regex;

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^&(?:#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});")
        .expect("entity pattern is valid")
});

/// Length in bytes of the HTML entity starting at `text[0]`, if any
pub(crate) fn entity_len(text: &str) -> Option<usize> {
    ENTITY.find(text).map(|m| m.end())
}

/// Escape `&`, `<` and `>` in plain text
///
/// An `&` that already begins an entity (`&amp;`, `&#39;`, ...) is left
/// alone, so escaping text that was escaped before does not change it.
#[must_use]
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, ch) in text.char_indices() {
        match ch {
            '&' if entity_len(&text[i..]).is_some() => out.push('&'),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escape every metacharacter in raw text (code bodies, reasoning blocks)
#[must_use]
pub fn escape_raw(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}
