//! Global Settings
//!
//! The process-wide "current model" and "selected prompt" that every
//! conversation reads. They live behind an explicit shared handle that is
//! passed to whoever needs them, never in ambient globals.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Settings shared by all conversations
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Model used for new requests
    pub model: String,
    /// System prompt applied to conversations, if any
    pub selected_prompt_id: Option<i64>,
    /// Temperature for newly created sessions
    pub default_temperature: f32,
}

impl GlobalSettings {
    /// Create settings
    pub fn new(model: impl Into<String>, default_temperature: f32) -> Self {
        Self {
            model: model.into(),
            selected_prompt_id: None,
            default_temperature,
        }
    }
}

/// Shared, lock-guarded [`GlobalSettings`]
#[derive(Clone, Debug)]
pub struct SettingsHandle {
    inner: Arc<RwLock<GlobalSettings>>,
}

impl SettingsHandle {
    /// Wrap settings in a shared handle
    #[must_use]
    pub fn new(settings: GlobalSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Copy of the current settings
    pub async fn snapshot(&self) -> GlobalSettings {
        self.inner.read().await.clone()
    }

    /// Current model
    pub async fn model(&self) -> String {
        self.inner.read().await.model.clone()
    }

    /// Replace everything at once
    pub async fn replace(&self, settings: GlobalSettings) {
        *self.inner.write().await = settings;
    }

    /// Switch the model
    pub async fn set_model(&self, model: impl Into<String>) {
        self.inner.write().await.model = model.into();
    }

    /// Select a system prompt
    pub async fn set_selected_prompt_id(&self, prompt_id: Option<i64>) {
        self.inner.write().await.selected_prompt_id = prompt_id;
    }
}
