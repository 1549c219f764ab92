//! Relay Core - Chat Front-end to Generation Backend Relay
//!
//! This crate relays conversational messages between a chat front-end and a
//! streaming text-generation server. It keeps per-conversation state, turns
//! the incrementally produced reply into display-ready markup, and splits
//! that markup into pages the front-end can send.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       Chat Front-end                             │
//! │      InboundMessage (up)                 Delivery (down)         │
//! └──────────────┬───────────────────────────────▲───────────────────┘
//!                │                               │ pages, notices,
//!                ▼                               │ typing indicator
//! ┌──────────────────────────────────────────────┴───────────────────┐
//! │                          Conductor                                │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │ SessionStore │  │  Streaming   │  │  Markup (Transcoder +  │  │
//! │  │ + Settings   │  │  (NDJSON)    │  │  paginate)             │  │
//! │  └──────────────┘  └──────▲───────┘  └────────────────────────┘  │
//! └────────────┬──────────────┼──────────────────────────────────────┘
//!              │              │ ByteStream
//!              ▼              │
//!   SessionPersistence    ChatBackend
//!   (SQLite / memory)     (Ollama /api/chat)
//! ```
//!
//! # Key Types
//!
//! - [`Conductor`]: orchestrates one request from inbound message to pages
//! - [`SessionStore`]: lock-guarded map of conversation sessions
//! - [`NdjsonStream`]: incremental decoder for the backend's chunked body
//! - [`Transcoder`]: reply text to paginated markup
//! - [`ChatBackend`], [`SessionPersistence`], [`Delivery`]: collaborator seams
//!
//! # Module Overview
//!
//! - [`backend`]: generation backend trait and the Ollama client
//! - [`conductor`]: the orchestrator
//! - [`config`]: TOML, environment and CLI configuration
//! - [`delivery`]: front-end delivery trait
//! - [`inbound`]: inbound message model, reply policy, reply threads
//! - [`markup`]: escaping, transcoding and pagination
//! - [`persistence`]: storage trait, SQLite and in-memory stores
//! - [`session`]: session data model
//! - [`settings`]: shared global settings
//! - [`store`]: the session store
//! - [`streaming`]: NDJSON ingestion and reply accumulation

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod conductor;
pub mod config;
pub mod delivery;
pub mod inbound;
pub mod markup;
pub mod persistence;
pub mod session;
pub mod settings;
pub mod store;
pub mod streaming;

// Re-exports for convenience
pub use backend::{BackendConfig, BackendError, ChatBackend, ChatRequest, ModelInfo, OllamaBackend};
pub use conductor::{Conductor, ConductorConfig, ConductorError, Reply};
pub use delivery::{ConversationTarget, Delivery, DeliveryError};
pub use inbound::{ChatRef, InboundMessage, ReplyDecision, ReplyPolicy, Sender};
pub use markup::{paginate, Transcoder, DEFAULT_PAGE_LIMIT};
pub use persistence::{
    MemoryStore, PersistenceError, PromptFilter, SessionPersistence, SqliteStore, SystemPrompt,
};
pub use session::{ChatKind, ChatMessage, ConversationKey, MessageRole, Session};
pub use settings::{GlobalSettings, SettingsHandle};
pub use store::{SessionMap, SessionStore};
pub use streaming::{ChatChunk, IngestError, NdjsonStream, StreamEvent};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, RelayConfig, RelayToml,
};
