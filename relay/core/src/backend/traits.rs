//! Backend Traits
//!
//! Trait definitions for generation backends.
//!
//! # Design Philosophy
//!
//! The backend hands back the raw response body as a byte stream and nothing
//! more. Framing and decoding belong to the
//! [`streaming`](crate::streaming) module, so a backend never has to know
//! what a record looks like and the ingester never has to know about HTTP.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

use crate::session::{ChatMessage, Session};

/// Raw response body, chunked as the transport delivers it
pub type ByteStream = BoxStream<'static, Result<Bytes, BackendError>>;

/// Errors raised by a backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// Connection-level failure (refused, reset, timed out)
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success status, detected before any body byte is consumed
    #[error("backend returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body text, kept for diagnostics
        body: String,
    },

    /// Response body could not be understood
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// HTTP client could not be constructed
    #[error("client setup failed: {0}")]
    Client(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Sampling options sent with a chat request
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatOptions {
    /// Sampling temperature
    pub temperature: f32,
}

/// Body of a chat generation request
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatRequest {
    /// Model to use
    pub model: String,
    /// Full history, system prompt included
    pub messages: Vec<ChatMessage>,
    /// Whether to stream the response
    pub stream: bool,
    /// Sampling options
    pub options: ChatOptions,
}

impl ChatRequest {
    /// Build a request from a session snapshot
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        Self {
            model: session.model.clone(),
            messages: session.messages.clone(),
            stream: session.stream,
            options: ChatOptions {
                temperature: session.temperature,
            },
        }
    }
}

/// Information about an installed model
#[derive(Clone, Debug, PartialEq)]
pub struct ModelInfo {
    /// Model identifier
    pub name: String,
    /// Model size in bytes (if known)
    pub size: Option<u64>,
    /// Parameter count label, e.g. "8B" (if known)
    pub parameter_size: Option<String>,
    /// Model families reported by the server
    pub families: Vec<String>,
}

/// Generation backend trait
///
/// Implement this trait to add support for a different generation server.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Get the backend name (e.g., "Ollama")
    fn name(&self) -> &str;

    /// Check if the backend is healthy and reachable
    async fn health_check(&self) -> bool;

    /// Start a chat generation and return the response body
    ///
    /// A non-success status is reported as [`BackendError::Status`] before
    /// the stream is handed out.
    async fn generate(&self, request: &ChatRequest) -> Result<ByteStream, BackendError>;

    /// List installed models
    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError>;

    /// Download a model
    async fn pull_model(&self, name: &str) -> Result<(), BackendError>;

    /// Remove a model
    async fn delete_model(&self, name: &str) -> Result<(), BackendError>;
}

/// Backend connection configuration
#[derive(Clone, Debug, PartialEq)]
pub struct BackendConfig {
    /// Server host name
    pub host: String,
    /// Server port
    pub port: u16,
    /// Total timeout for a generation request
    pub timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            timeout: Duration::from_secs(3000),
        }
    }
}

impl BackendConfig {
    /// Create a configuration for `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL of the server
    ///
    /// `host` may carry its own `http://` or `https://` scheme; a bare host
    /// gets `http://`.
    #[must_use]
    pub fn base_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}:{}", self.port)
        } else {
            format!("http://{host}:{}", self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_chat_request_wire_shape() {
        let mut session = Session::new("llama3.2", 0.4, None);
        session.set_system_prompt("Be brief");
        session.push(ChatMessage::user("hi"));

        let json = serde_json::to_value(ChatRequest::from_session(&session)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "llama3.2",
                "messages": [
                    {"role": "system", "content": "Be brief"},
                    {"role": "user", "content": "hi"}
                ],
                "stream": true,
                "options": {"temperature": 0.4f32}
            })
        );
    }

    #[test]
    fn test_backend_config_default() {
        let config = BackendConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 11434);
        assert_eq!(config.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_base_url_accepts_host_with_scheme() {
        assert_eq!(
            BackendConfig::new("http://gpu-box", 11434).base_url(),
            "http://gpu-box:11434"
        );
        assert_eq!(
            BackendConfig::new("https://ollama.internal/", 443).base_url(),
            "https://ollama.internal:443"
        );
        assert_eq!(BackendConfig::new("gpu-box", 8080).base_url(), "http://gpu-box:8080");
    }

    #[test]
    fn test_status_error_carries_body() {
        let err = BackendError::Status {
            status: 404,
            body: "model not found".into(),
        };
        assert_eq!(err.to_string(), "backend returned 404: model not found");
    }
}
