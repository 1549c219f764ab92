//! Response Accumulator
//!
//! Collects reply fragments and decides when a partial reply is worth
//! showing. A fragment that contains sentence-ending punctuation or a line
//! break marks a flush boundary.

const BOUNDARY_CHARS: [char; 4] = ['.', '!', '?', '\n'];

/// Text accumulated from delta events
#[derive(Clone, Debug, Default)]
pub struct ResponseAccumulator {
    text: String,
    flushed: usize,
}

impl ResponseAccumulator {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment, returning true when it closes a sentence
    pub fn push(&mut self, fragment: &str) -> bool {
        self.text.push_str(fragment);
        fragment.contains(BOUNDARY_CHARS)
    }

    /// Everything received so far
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Record that everything received so far has been shown to the user
    pub fn mark_flushed(&mut self) {
        self.flushed = self.text.len();
    }

    /// The prefix that was shown to the user, if any
    #[must_use]
    pub fn flushed_text(&self) -> Option<&str> {
        (self.flushed > 0).then(|| &self.text[..self.flushed])
    }

    /// True if nothing but whitespace has arrived
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Consume and return the whole text
    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }
}
