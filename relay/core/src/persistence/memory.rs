//! In-memory persistence
//!
//! Keeps everything in process memory. Useful for tests and for runs that
//! should leave nothing behind. Can be switched into an "unavailable" state
//! to exercise storage-failure paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{PersistenceError, PromptFilter, SessionPersistence, StoredSettings, SystemPrompt};
use crate::session::{ConversationKey, MessageRole, Session};
use crate::settings::GlobalSettings;
use crate::store::SessionMap;

/// One chat log record
#[derive(Clone, Debug, PartialEq)]
pub struct ChatLogEntry {
    /// Author's user id
    pub user_id: i64,
    /// Message role
    pub role: MessageRole,
    /// Message text
    pub content: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    sessions: SessionMap,
    settings: Option<StoredSettings>,
    prompts: Vec<SystemPrompt>,
    next_prompt_id: i64,
    users: Vec<(i64, String)>,
    chat_log: Vec<ChatLogEntry>,
}

/// Process-local storage
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (or succeed again)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Copy of the chat log
    pub async fn chat_log(&self) -> Vec<ChatLogEntry> {
        self.state.lock().await.chat_log.clone()
    }

    /// Copy of the saved sessions, bypassing the availability switch
    pub async fn saved_sessions(&self) -> SessionMap {
        self.state.lock().await.sessions.clone()
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionPersistence for MemoryStore {
    async fn load_all_sessions(&self) -> Result<SessionMap, PersistenceError> {
        self.check()?;
        Ok(self.state.lock().await.sessions.clone())
    }

    async fn save_all_sessions(&self, sessions: &SessionMap) -> Result<(), PersistenceError> {
        self.check()?;
        self.state.lock().await.sessions = sessions.clone();
        Ok(())
    }

    async fn save_session(
        &self,
        key: &ConversationKey,
        session: &Session,
    ) -> Result<(), PersistenceError> {
        self.check()?;
        self.state
            .lock()
            .await
            .sessions
            .insert(key.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, key: &ConversationKey) -> Result<(), PersistenceError> {
        self.check()?;
        self.state.lock().await.sessions.remove(key);
        Ok(())
    }

    async fn load_global_settings(&self) -> Result<Option<StoredSettings>, PersistenceError> {
        self.check()?;
        Ok(self.state.lock().await.settings.clone())
    }

    async fn save_global_settings(
        &self,
        settings: &GlobalSettings,
    ) -> Result<(), PersistenceError> {
        self.check()?;
        self.state.lock().await.settings = Some(StoredSettings {
            model: Some(settings.model.clone()),
            selected_prompt_id: settings.selected_prompt_id,
            default_temperature: Some(settings.default_temperature),
        });
        Ok(())
    }

    async fn system_prompts(
        &self,
        filter: PromptFilter,
    ) -> Result<Vec<SystemPrompt>, PersistenceError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .prompts
            .iter()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect())
    }

    async fn add_system_prompt(
        &self,
        owner_id: Option<i64>,
        text: &str,
        is_global: bool,
    ) -> Result<i64, PersistenceError> {
        self.check()?;
        let mut state = self.state.lock().await;
        state.next_prompt_id += 1;
        let id = state.next_prompt_id;
        state.prompts.push(SystemPrompt {
            id,
            owner_id,
            text: text.to_string(),
            is_global,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn delete_system_prompt(&self, id: i64) -> Result<bool, PersistenceError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let before = state.prompts.len();
        state.prompts.retain(|p| p.id != id);
        Ok(state.prompts.len() != before)
    }

    async fn log_chat_message(
        &self,
        user_id: i64,
        user_name: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<(), PersistenceError> {
        self.check()?;
        let mut state = self.state.lock().await;
        if !state.users.iter().any(|(id, _)| *id == user_id) {
            state.users.push((user_id, user_name.to_string()));
        }
        state.chat_log.push(ChatLogEntry {
            user_id,
            role,
            content: content.to_string(),
        });
        Ok(())
    }
}
