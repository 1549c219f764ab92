//! Persistence
//!
//! Durable storage for sessions, global settings, system prompts and the chat
//! log, behind the [`SessionPersistence`] trait.
//!
//! # Design Philosophy
//!
//! Storage only ever sees snapshots. It never mutates a live
//! [`Session`](crate::session::Session); the conductor hands it copies to
//! write and receives copies back on restore. Failures are reported as
//! [`PersistenceError`] and are never retried here.
//!
//! # Implementations
//!
//! - [`SqliteStore`] - single-file SQLite database
//! - [`MemoryStore`] - process-local, for tests and ephemeral runs

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::session::{ConversationKey, MessageRole, Session};
use crate::settings::GlobalSettings;
use crate::store::SessionMap;

pub use memory::{ChatLogEntry, MemoryStore};
pub use sqlite::SqliteStore;

/// Errors raised by a storage backend
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Storage cannot be reached
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// SQLite reported an error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored value could not be encoded or decoded
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The blocking storage task failed
    #[error("storage task failed: {0}")]
    Task(String),
}

/// A stored system prompt
#[derive(Clone, Debug, PartialEq)]
pub struct SystemPrompt {
    /// Record id
    pub id: i64,
    /// User who added it, `None` for prompts without an owner
    pub owner_id: Option<i64>,
    /// Prompt text
    pub text: String,
    /// Visible to every user
    pub is_global: bool,
    /// When the prompt was added
    pub created_at: DateTime<Utc>,
}

/// Which prompts to return from [`SessionPersistence::system_prompts`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PromptFilter {
    /// Prompts owned by this user, plus prompts with no owner
    pub user_id: Option<i64>,
    /// Only global (or only private) prompts
    pub is_global: Option<bool>,
}

impl PromptFilter {
    /// Every prompt
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Prompts visible to `user_id`: their own, ownerless and global ones
    #[must_use]
    pub fn for_user(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            is_global: None,
        }
    }

    /// Only global prompts
    #[must_use]
    pub fn global() -> Self {
        Self {
            user_id: None,
            is_global: Some(true),
        }
    }

    /// Check a prompt against the filter
    #[must_use]
    pub fn matches(&self, prompt: &SystemPrompt) -> bool {
        let owner_ok = match self.user_id {
            Some(user) => {
                prompt.is_global || prompt.owner_id.is_none() || prompt.owner_id == Some(user)
            }
            None => true,
        };
        let scope_ok = self.is_global.map_or(true, |g| prompt.is_global == g);
        owner_ok && scope_ok
    }
}

/// Global settings as read back from storage
///
/// Any field may be missing in a fresh or older database.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoredSettings {
    /// Last selected model
    pub model: Option<String>,
    /// Last selected prompt
    pub selected_prompt_id: Option<i64>,
    /// Last default temperature
    pub default_temperature: Option<f32>,
}

/// Storage collaborator for the conductor
#[async_trait]
pub trait SessionPersistence: Send + Sync {
    /// Load every saved session
    async fn load_all_sessions(&self) -> Result<SessionMap, PersistenceError>;

    /// Replace all saved sessions with `sessions`
    async fn save_all_sessions(&self, sessions: &SessionMap) -> Result<(), PersistenceError>;

    /// Save (insert or replace) one session
    async fn save_session(
        &self,
        key: &ConversationKey,
        session: &Session,
    ) -> Result<(), PersistenceError>;

    /// Forget one session
    async fn delete_session(&self, key: &ConversationKey) -> Result<(), PersistenceError>;

    /// Load global settings, `None` if never saved
    async fn load_global_settings(&self) -> Result<Option<StoredSettings>, PersistenceError>;

    /// Save global settings
    async fn save_global_settings(&self, settings: &GlobalSettings)
        -> Result<(), PersistenceError>;

    /// List system prompts, oldest first
    async fn system_prompts(&self, filter: PromptFilter)
        -> Result<Vec<SystemPrompt>, PersistenceError>;

    /// Look up one system prompt
    async fn system_prompt(&self, id: i64) -> Result<Option<SystemPrompt>, PersistenceError> {
        let prompts = self.system_prompts(PromptFilter::all()).await?;
        Ok(prompts.into_iter().find(|p| p.id == id))
    }

    /// Add a system prompt and return its id
    async fn add_system_prompt(
        &self,
        owner_id: Option<i64>,
        text: &str,
        is_global: bool,
    ) -> Result<i64, PersistenceError>;

    /// Delete a system prompt, returning whether it existed
    async fn delete_system_prompt(&self, id: i64) -> Result<bool, PersistenceError>;

    /// Append to the chat log, registering the user on first sight
    async fn log_chat_message(
        &self,
        user_id: i64,
        user_name: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<(), PersistenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(owner_id: Option<i64>, is_global: bool) -> SystemPrompt {
        SystemPrompt {
            id: 1,
            owner_id,
            text: "p".into(),
            is_global,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_prompt_filter() {
        let mine = prompt(Some(1), false);
        let theirs = prompt(Some(2), false);
        let ownerless = prompt(None, true);
        let shared = prompt(Some(2), true);

        assert!(PromptFilter::all().matches(&theirs));
        assert!(PromptFilter::for_user(1).matches(&mine));
        assert!(!PromptFilter::for_user(1).matches(&theirs));
        assert!(PromptFilter::for_user(1).matches(&ownerless));
        assert!(PromptFilter::for_user(1).matches(&shared));
        assert!(PromptFilter::global().matches(&ownerless));
        assert!(!PromptFilter::global().matches(&mine));
    }
}
