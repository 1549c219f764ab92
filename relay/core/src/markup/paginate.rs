//! Pagination
//!
//! Splits finished markup into pages of bounded length. Lengths are counted
//! in characters. Pages concatenate back to the input exactly.
//!
//! Block tags are natural cut points: the text is cut after a closing block
//! tag and before an opening one, then the pieces are packed greedily. A piece
//! that alone exceeds the limit is split again at the last whitespace that is
//! outside any tag or entity, or failing that at the last position outside
//! any tag or entity.

use std::sync::LazyLock;

use regex::Regex;

use super::escape::entity_len;

/// Maximum page length of the reference deployment
pub const DEFAULT_PAGE_LIMIT: usize = 4096;

static BLOCK_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</(?:p|div|pre|blockquote|ul|ol)>|<(?:p|div|pre|blockquote|ul|ol)(?:\s[^<>]*)?>")
        .expect("block boundary pattern is valid")
});

/// Split `text` into pages of at most `limit` characters
///
/// Empty input yields no pages. No page is ever empty.
#[must_use]
pub fn paginate(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut pages = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for block in split_blocks(text) {
        let block_len = block.chars().count();
        if current_len + block_len <= limit {
            current.push_str(block);
            current_len += block_len;
            continue;
        }

        if !current.is_empty() {
            pages.push(std::mem::take(&mut current));
        }

        let mut rest = block;
        let mut rest_len = block_len;
        while rest_len > limit {
            let cut = forced_cut(rest, limit);
            let (head, tail) = rest.split_at(cut);
            pages.push(head.to_string());
            rest_len -= head.chars().count();
            rest = tail;
        }
        current.push_str(rest);
        current_len = rest_len;
    }

    if !current.is_empty() {
        pages.push(current);
    }
    pages
}

/// Cut points after closing block tags and before opening block tags
fn split_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut start = 0;
    for m in BLOCK_BOUNDARY.find_iter(text) {
        let cut = if m.as_str().starts_with("</") {
            m.end()
        } else {
            m.start()
        };
        if cut > start {
            blocks.push(&text[start..cut]);
            start = cut;
        }
    }
    if start < text.len() {
        blocks.push(&text[start..]);
    }
    blocks
}

/// Byte offset at which to split an oversized block
///
/// The head is never longer than `limit` characters and never empty.
fn forced_cut(block: &str, limit: usize) -> usize {
    let chars: Vec<(usize, char)> = block.char_indices().collect();
    let safe = safe_boundaries(block, &chars);
    let byte_at = |idx: usize| chars.get(idx).map_or(block.len(), |(b, _)| *b);

    let mut fallback = None;
    for idx in (1..=limit.min(chars.len())).rev() {
        if !safe[idx] {
            continue;
        }
        if idx >= 2 && chars[idx - 1].1.is_whitespace() {
            return byte_at(idx);
        }
        fallback.get_or_insert(idx);
    }
    byte_at(fallback.unwrap_or(limit))
}

/// `safe[i]` is false when a cut before char `i` would land inside a tag or entity
fn safe_boundaries(block: &str, chars: &[(usize, char)]) -> Vec<bool> {
    let mut safe = vec![true; chars.len() + 1];
    let mut i = 0;
    while i < chars.len() {
        let (byte, ch) = chars[i];
        let span = match ch {
            '<' => block[byte..]
                .find('>')
                .map(|end| block[byte..=byte + end].chars().count()),
            '&' => entity_len(&block[byte..]),
            _ => None,
        };
        match span {
            Some(len) => {
                for flag in safe.iter_mut().take(i + len).skip(i + 1) {
                    *flag = false;
                }
                i += len;
            }
            None => i += 1,
        }
    }
    safe
}
