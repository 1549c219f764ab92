//! Ollama Backend Implementation
//!
//! Backend for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! - `/api/chat` - Chat completions with message history (streamed NDJSON)
//! - `/api/tags` - List installed models
//! - `/api/pull` - Download a model
//! - `/api/delete` - Remove a model

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;

use super::traits::{BackendConfig, BackendError, ByteStream, ChatBackend, ChatRequest, ModelInfo};

/// Ollama backend client
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    /// Connection settings
    config: BackendConfig,
    /// HTTP client
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    details: Option<TagDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct TagDetails {
    #[serde(default)]
    parameter_size: Option<String>,
    #[serde(default)]
    families: Option<Vec<String>>,
}

impl From<TagEntry> for ModelInfo {
    fn from(entry: TagEntry) -> Self {
        let details = entry.details.unwrap_or_default();
        Self {
            name: entry.name,
            size: entry.size,
            parameter_size: details.parameter_size,
            families: details.families.unwrap_or_default(),
        }
    }
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Client`] if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Client(e.to_string()))?;

        Ok(Self {
            config: config.clone(),
            http_client,
        })
    }

    /// Get the base URL
    fn base_url(&self) -> String {
        self.config.base_url()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{path}", self.base_url())
    }

    /// Turn a non-success response into [`BackendError::Status`]
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = status.as_u16(), body = %body, "Ollama request failed");
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.endpoint("tags"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn generate(&self, request: &ChatRequest) -> Result<ByteStream, BackendError> {
        let url = self.endpoint("chat");
        tracing::debug!(
            url = %url,
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat request"
        );

        let response = self.http_client.post(&url).json(request).send().await?;
        let response = Self::check_status(response).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(BackendError::from))
            .boxed())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
        let response = self
            .http_client
            .get(self.endpoint("tags"))
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(ModelInfo::from).collect())
    }

    async fn pull_model(&self, name: &str) -> Result<(), BackendError> {
        tracing::info!(model = name, "Pulling model");
        let response = self
            .http_client
            .post(self.endpoint("pull"))
            .json(&serde_json::json!({ "name": name, "stream": false }))
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn delete_model(&self, name: &str) -> Result<(), BackendError> {
        tracing::info!(model = name, "Deleting model");
        let response = self
            .http_client
            .delete(self.endpoint("delete"))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_backend_creation() {
        let backend = OllamaBackend::new(&BackendConfig::new("example.com", 8080)).unwrap();
        assert_eq!(backend.base_url(), "http://example.com:8080");
        assert_eq!(backend.endpoint("chat"), "http://example.com:8080/api/chat");
        assert_eq!(backend.name(), "Ollama");
    }

    #[test]
    fn test_tags_response_parsing() {
        let body = r#"{"models":[
            {"name":"llama3.2:latest","size":2019393189,
             "details":{"parameter_size":"3.2B","families":["llama"]}},
            {"name":"bare"}
        ]}"#;
        let tags: TagsResponse = serde_json::from_str(body).unwrap();
        let models: Vec<ModelInfo> = tags.models.into_iter().map(ModelInfo::from).collect();

        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "llama3.2:latest");
        assert_eq!(models[0].parameter_size.as_deref(), Some("3.2B"));
        assert_eq!(models[0].families, vec!["llama".to_string()]);
        assert_eq!(models[1].size, None);
        assert!(models[1].families.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let config = BackendConfig::new("127.0.0.1", 1).with_timeout(Duration::from_secs(2));
        let backend = OllamaBackend::new(&config).unwrap();
        let session = crate::session::Session::new("m", 0.7, None);

        let err = match backend.generate(&ChatRequest::from_session(&session)).await {
            Ok(_) => panic!("expected connection failure"),
            Err(e) => e,
        };
        assert!(matches!(err, BackendError::Transport(_)));
        assert!(!backend.health_check().await);
    }
}
