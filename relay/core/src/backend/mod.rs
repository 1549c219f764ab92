//! Generation Backend Integration
//!
//! Abstracted access to the text-generation server through a common trait.
//! The conductor only ever sees [`ChatBackend`]; the Ollama client is one
//! implementation of it.
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::backend::{BackendConfig, ChatBackend, ChatRequest, OllamaBackend};
//!
//! let backend = OllamaBackend::new(&BackendConfig::default())?;
//! let bytes = backend.generate(&ChatRequest::from_session(&session)).await?;
//! ```

mod ollama;
mod traits;

pub use ollama::OllamaBackend;
pub use traits::{BackendConfig, BackendError, ByteStream, ChatBackend, ChatRequest, ModelInfo};
