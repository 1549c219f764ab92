//! NDJSON Ingestion
//!
//! Line framing and record decoding over an arbitrary chunked byte source.

use std::marker::PhantomData;

use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::backend::BackendError;

// ============================================================================
// Errors
// ============================================================================

/// Failure that ends a record stream
///
/// Malformed lines are not errors; they are logged and skipped.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The byte source failed mid-stream
    #[error("stream transport failed: {0}")]
    Transport(#[from] BackendError),
}

// ============================================================================
// Line Buffer
// ============================================================================

/// Accumulates bytes and hands out complete lines
///
/// Lines are returned trimmed of surrounding whitespace; blank lines are
/// swallowed.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Take the next complete, non-blank line
    pub fn next_line(&mut self) -> Option<Bytes> {
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line = self.buf.split_to(pos).freeze();
            self.buf.advance(1);
            if let Some(trimmed) = trim_line(&line) {
                return Some(trimmed);
            }
        }
        None
    }

    /// Take whatever is left once the source has ended
    pub fn finish(&mut self) -> Option<Bytes> {
        let rest = self.buf.split().freeze();
        trim_line(&rest)
    }

    /// Bytes waiting for a newline
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn trim_line(line: &Bytes) -> Option<Bytes> {
    let start = line.iter().position(|b| !b.is_ascii_whitespace())?;
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace())? + 1;
    Some(line.slice(start..end))
}

// ============================================================================
// Record Stream
// ============================================================================

/// Lazily decodes newline-delimited JSON records from a byte source
///
/// Records come out in the order their lines were received. The stream ends
/// when the source ends (a trailing unterminated line is parsed once) or with
/// [`IngestError::Transport`] when the source fails.
pub struct NdjsonStream<S, T> {
    source: S,
    lines: LineBuffer,
    exhausted: bool,
    skipped: usize,
    _record: PhantomData<fn() -> T>,
}

impl<S, T> NdjsonStream<S, T>
where
    S: Stream<Item = Result<Bytes, BackendError>> + Unpin,
    T: DeserializeOwned,
{
    /// Wrap a byte source
    pub fn new(source: S) -> Self {
        Self {
            source,
            lines: LineBuffer::new(),
            exhausted: false,
            skipped: 0,
            _record: PhantomData,
        }
    }

    /// Number of malformed lines skipped so far
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Decode the next record
    ///
    /// Returns `None` once the source is exhausted.
    pub async fn next_record(&mut self) -> Option<Result<T, IngestError>> {
        loop {
            while let Some(line) = self.lines.next_line() {
                if let Some(record) = self.decode(&line) {
                    return Some(Ok(record));
                }
            }

            if self.exhausted {
                let line = self.lines.finish()?;
                if let Some(record) = self.decode(&line) {
                    return Some(Ok(record));
                }
                return None;
            }

            match self.source.next().await {
                Some(Ok(chunk)) => self.lines.push(&chunk),
                Some(Err(e)) => {
                    self.exhausted = true;
                    self.lines = LineBuffer::new();
                    return Some(Err(IngestError::Transport(e)));
                }
                None => self.exhausted = true,
            }
        }
    }

    fn decode(&mut self, line: &[u8]) -> Option<T> {
        match serde_json::from_slice(line) {
            Ok(record) => Some(record),
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(
                    error = %e,
                    line = %String::from_utf8_lossy(line),
                    "Skipping malformed stream record"
                );
                None
            }
        }
    }

    /// Adapt into a [`futures::Stream`]
    ///
    /// The stream ends after the first transport error.
    pub fn into_stream(self) -> impl Stream<Item = Result<T, IngestError>> {
        stream::unfold(Some(self), |state| async move {
            let mut this = state?;
            match this.next_record().await? {
                Ok(record) => Some((Ok(record), Some(this))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
