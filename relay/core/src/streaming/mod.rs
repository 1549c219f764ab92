//! Streaming Response Ingestion
//!
//! Turns the chunked body of a generation response into an ordered sequence
//! of decoded events, and tracks how much of the reply has already been
//! shown to the user.
//!
//! # Architecture
//!
//! ```text
//!   ByteStream ──► LineBuffer ──► NdjsonStream<ChatChunk> ──► StreamEvent
//!  (any chunking)  (full lines)   (parse, skip bad lines)    (Delta / Done)
//!                                                                │
//!                                                                ▼
//!                                                     ResponseAccumulator
//!                                                   (sentence boundaries)
//! ```
//!
//! Chunk boundaries never need to line up with record boundaries. A record is
//! parsed only once its whole line is available, and one malformed line never
//! ends the stream.
//!
//! # Example
//!
//! ```ignore
//! use relay_core::streaming::{ChatChunk, NdjsonStream};
//!
//! let mut records = NdjsonStream::<_, ChatChunk>::new(bytes);
//! while let Some(chunk) = records.next_record().await {
//!     for event in chunk?.into_events()? { /* ... */ }
//! }
//! ```

mod accumulator;
mod events;
mod ingest;

pub use accumulator::ResponseAccumulator;
pub use events::{ChatChunk, ChunkMessage, CompletionStats, StreamEvent};
pub use ingest::{IngestError, LineBuffer, NdjsonStream};
