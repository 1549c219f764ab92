//! Transcoder
//!
//! Converts a finished model reply into Telegram-dialect HTML pages.
//!
//! # Pipeline
//!
//! 1. Strip the speaker label and a leading pair of quotes.
//! 2. Lift protected segments out of the text: reasoning blocks, fenced and
//!    inline code, and tags the target dialect already understands. Each is
//!    rendered once and replaced by a private-use placeholder.
//! 3. Escape metacharacters in what is left.
//! 4. Markdown passes, in order: links, bullets, block quotes, bold,
//!    underline, strikethrough, spoilers, italics.
//! 5. Collapse runs of blank lines and trim.
//! 6. Put the protected segments back, then paginate.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::escape::{escape_raw, escape_text};
use super::paginate::{paginate, DEFAULT_PAGE_LIMIT};
use crate::session::ChatKind;

const PLACEHOLDER_OPEN: char = '\u{E000}';
const PLACEHOLDER_CLOSE: char = '\u{E001}';

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("markup pattern is valid")
}

static SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    compile(concat!(
        r"<think>(?P<think>(?s:.*?))</think>",
        r"|```(?:(?P<lang>[A-Za-z0-9_+\-]+)\n)?(?P<fence>(?s:.*?))```",
        r"|`(?P<inline>[^`\n]+)`",
        r"|(?P<orphan></?think>)",
        r"|(?P<tag></?(?:b|strong|i|em|u|ins|s|strike|del|code|pre|a|blockquote|tg-spoiler|span)(?:\s[^<>]*)?>)",
    ))
});
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| compile("\u{E000}([0-9]+)\u{E001}"));
static LINK: LazyLock<Regex> = LazyLock::new(|| compile(r#"\[([^\]\n]+)\]\(([^)\s"]+)\)"#));
static BULLET: LazyLock<Regex> = LazyLock::new(|| compile(r"(?m)^[ \t]*[-*+][ \t]+(.+)$"));
static QUOTE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?m)^[ \t]*&gt;[ \t]+(.+)$"));
static BOLD: LazyLock<Regex> = LazyLock::new(|| compile(r"\*\*(.+?)\*\*"));
static UNDERLINE: LazyLock<Regex> = LazyLock::new(|| compile(r"__(.+?)__"));
static STRIKE: LazyLock<Regex> = LazyLock::new(|| compile(r"~~(.+?)~~"));
static SPOILER: LazyLock<Regex> = LazyLock::new(|| compile(r"\|\|(.+?)\|\|"));
static ITALIC_STAR: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\*([^*\s](?:[^*\n]*[^*\s])?)\*"));
static ITALIC_UNDERSCORE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"\b_([^_\s](?:[^_\n]*[^_\s])?)_\b"));
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| compile(r"\n\s*\n\s*\n+"));

/// Reply-to-pages converter
#[derive(Clone, Debug)]
pub struct Transcoder {
    speaker_label: String,
    page_limit: usize,
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::new("Marvin", DEFAULT_PAGE_LIMIT)
    }
}

/// Rendered protected segments, indexed by placeholder number
#[derive(Default)]
struct Segments(Vec<String>);

impl Segments {
    fn hold(&mut self, rendered: String) -> String {
        self.0.push(rendered);
        format!("{PLACEHOLDER_OPEN}{}{PLACEHOLDER_CLOSE}", self.0.len() - 1)
    }

    fn restore(&self, text: &str) -> String {
        PLACEHOLDER
            .replace_all(text, |caps: &Captures<'_>| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| self.0.get(n))
                    .cloned()
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

impl Transcoder {
    /// Create a transcoder
    ///
    /// `speaker_label` is the name the model sometimes prefixes its replies
    /// with (`"Label: ..."`); it is stripped from the start of every reply.
    pub fn new(speaker_label: impl Into<String>, page_limit: usize) -> Self {
        Self {
            speaker_label: speaker_label.into(),
            page_limit: page_limit.max(1),
        }
    }

    /// Maximum page length in characters
    #[must_use]
    pub fn page_limit(&self) -> usize {
        self.page_limit
    }

    /// Convert a reply into pages
    ///
    /// When a `footer` is given it is appended to every page, and the room it
    /// needs is taken out of the page limit.
    #[must_use]
    pub fn render(&self, text: &str, kind: ChatKind, footer: Option<&str>) -> Vec<String> {
        let markup = self.transcode(text, kind);
        match footer {
            None => paginate(&markup, self.page_limit),
            Some(footer) => {
                let room = self
                    .page_limit
                    .saturating_sub(footer.chars().count())
                    .max(1);
                paginate(&markup, room)
                    .into_iter()
                    .map(|page| page + footer)
                    .collect()
            }
        }
    }

    /// Convert a reply into one markup string, without paginating
    #[must_use]
    pub fn transcode(&self, text: &str, kind: ChatKind) -> String {
        let text: String = text
            .chars()
            .filter(|c| *c != PLACEHOLDER_OPEN && *c != PLACEHOLDER_CLOSE)
            .collect();
        let text = self.strip_preamble(&text);

        let mut segments = Segments::default();
        let text = lift_segments(&text, kind, &mut segments);
        let text = escape_text(&text);
        let text = apply_markdown(&text, &mut segments);
        let text = BLANK_RUN.replace_all(&text, "\n\n");

        segments.restore(text.trim())
    }

    /// Remove `"{label}: "` and then one leading `"..."` pair on the first line
    fn strip_preamble<'a>(&self, text: &'a str) -> std::borrow::Cow<'a, str> {
        let text = if self.speaker_label.is_empty() {
            text
        } else {
            text.strip_prefix(self.speaker_label.as_str())
                .and_then(|rest| rest.strip_prefix(": "))
                .unwrap_or(text)
        };

        if let Some(rest) = text.strip_prefix('"') {
            let first_line = rest.split('\n').next().unwrap_or_default();
            if let Some(close) = first_line.find('"') {
                let mut out = String::with_capacity(text.len());
                out.push_str(&rest[..close]);
                out.push_str(&rest[close + 1..]);
                return out.into();
            }
        }
        text.into()
    }
}

fn lift_segments(text: &str, kind: ChatKind, segments: &mut Segments) -> String {
    SEGMENT
        .replace_all(text, |caps: &Captures<'_>| {
            if let Some(body) = caps.name("think") {
                let body = body.as_str().trim();
                if kind.is_group() || body.is_empty() {
                    return String::new();
                }
                return segments.hold(format!("<code>{}</code>", escape_raw(body)));
            }
            if let Some(body) = caps.name("fence") {
                let body = body.as_str();
                let body = body.strip_prefix('\n').unwrap_or(body);
                let body = body.strip_suffix('\n').unwrap_or(body);
                let open = match caps.name("lang") {
                    Some(lang) => format!("<pre><code class=\"language-{}\">", lang.as_str()),
                    None => "<pre><code>".to_string(),
                };
                return segments.hold(format!("{open}{}</code></pre>", escape_raw(body)));
            }
            if let Some(body) = caps.name("inline") {
                return segments.hold(format!("<code>{}</code>", escape_raw(body.as_str())));
            }
            if caps.name("orphan").is_some() {
                return String::new();
            }
            segments.hold(caps[0].to_string())
        })
        .into_owned()
}

fn apply_markdown(text: &str, segments: &mut Segments) -> String {
    let text = LINK.replace_all(text, |caps: &Captures<'_>| {
        let open = segments.hold(format!("<a href=\"{}\">", &caps[2]));
        format!("{open}{}</a>", &caps[1])
    });
    let text = BULLET.replace_all(&text, "• ${1}");
    let text = QUOTE.replace_all(&text, "<blockquote>${1}</blockquote>");
    let text = BOLD.replace_all(&text, "<b>${1}</b>");
    let text = UNDERLINE.replace_all(&text, "<u>${1}</u>");
    let text = STRIKE.replace_all(&text, "<s>${1}</s>");
    let text = SPOILER.replace_all(&text, "<tg-spoiler>${1}</tg-spoiler>");
    let text = ITALIC_STAR.replace_all(&text, "<i>${1}</i>");
    let text = ITALIC_UNDERSCORE.replace_all(&text, "<i>${1}</i>");
    text.into_owned()
}
