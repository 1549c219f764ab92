//! Stream Events
//!
//! Decoded records of a chat generation response and the events the
//! conductor consumes.

use std::time::Duration;

use serde::Deserialize;

use crate::session::MessageRole;

/// Aggregate statistics carried by the terminal record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompletionStats {
    /// Server-reported wall time of the whole request
    pub total_duration_nanos: u64,
    /// Tokens processed (prompt plus generated)
    pub total_tokens: u64,
}

impl CompletionStats {
    /// Total duration as a [`Duration`]
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.total_duration_nanos)
    }

    /// Throughput, or 0 when no time was reported
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs > 0.0 {
            self.total_tokens as f64 / secs
        } else {
            0.0
        }
    }
}

/// One decoded unit of a generation response
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// A piece of the reply
    Delta {
        /// Author of the fragment
        role: MessageRole,
        /// Text fragment
        content: String,
    },
    /// The backend marked the response complete
    Done(CompletionStats),
}

/// Message part of a chat record
#[derive(Clone, Debug, Deserialize)]
pub struct ChunkMessage {
    /// Author role
    #[serde(default)]
    pub role: Option<String>,
    /// Fragment text
    #[serde(default)]
    pub content: String,
}

/// Raw record of an Ollama `/api/chat` stream
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChatChunk {
    /// Content fragment, absent on some terminal records
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    /// Terminal marker
    #[serde(default)]
    pub done: bool,
    /// Total request time in nanoseconds
    #[serde(default)]
    pub total_duration: Option<u64>,
    /// Generated token count
    #[serde(default)]
    pub eval_count: Option<u64>,
    /// Prompt token count
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    /// Combined token count, if the server reports one
    #[serde(default)]
    pub total_tokens: Option<u64>,
    /// Error reported in-band by the server
    #[serde(default)]
    pub error: Option<String>,
}

impl ChatChunk {
    /// Statistics for a terminal record
    #[must_use]
    pub fn stats(&self) -> CompletionStats {
        let total_tokens = self.total_tokens.unwrap_or_else(|| {
            self.prompt_eval_count.unwrap_or(0) + self.eval_count.unwrap_or(0)
        });
        CompletionStats {
            total_duration_nanos: self.total_duration.unwrap_or(0),
            total_tokens,
        }
    }

    /// Split the record into events, delta first
    ///
    /// # Errors
    ///
    /// Returns the server's message if the record reports a generation error.
    pub fn into_events(self) -> Result<Vec<StreamEvent>, String> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut events = Vec::with_capacity(2);
        let stats = self.stats();
        if let Some(message) = self.message {
            if !message.content.is_empty() {
                let role = message
                    .role
                    .as_deref()
                    .and_then(MessageRole::parse)
                    .unwrap_or(MessageRole::Assistant);
                events.push(StreamEvent::Delta {
                    role,
                    content: message.content,
                });
            }
        }
        if self.done {
            events.push(StreamEvent::Done(stats));
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunk(json: &str) -> ChatChunk {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_delta_record() {
        let events = chunk(r#"{"model":"m","message":{"role":"assistant","content":"Hel"},"done":false}"#)
            .into_events()
            .unwrap();
        assert_eq!(
            events,
            vec![StreamEvent::Delta {
                role: MessageRole::Assistant,
                content: "Hel".into()
            }]
        );
    }

    #[test]
    fn test_terminal_record_sums_token_counts() {
        let events = chunk(
            r#"{"message":{"role":"assistant","content":""},"done":true,
                "total_duration":2000000000,"prompt_eval_count":12,"eval_count":30}"#,
        )
        .into_events()
        .unwrap();
        assert_eq!(
            events,
            vec![StreamEvent::Done(CompletionStats {
                total_duration_nanos: 2_000_000_000,
                total_tokens: 42,
            })]
        );
    }

    #[test]
    fn test_explicit_total_tokens_wins() {
        let stats = chunk(r#"{"done":true,"total_tokens":7,"eval_count":100}"#).stats();
        assert_eq!(stats.total_tokens, 7);
    }

    #[test]
    fn test_error_record() {
        let err = chunk(r#"{"error":"model 'x' not found"}"#)
            .into_events()
            .unwrap_err();
        assert_eq!(err, "model 'x' not found");
    }

    #[test]
    fn test_tokens_per_second() {
        let stats = CompletionStats {
            total_duration_nanos: 2_000_000_000,
            total_tokens: 50,
        };
        assert!((stats.tokens_per_second() - 25.0).abs() < f64::EPSILON);
        assert!(CompletionStats::default().tokens_per_second().abs() < f64::EPSILON);
    }
}
