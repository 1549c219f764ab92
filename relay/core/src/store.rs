//! Session Store
//!
//! Concurrency-safe map from [`ConversationKey`] to [`Session`].
//!
//! # Locking
//!
//! One `tokio::sync::Mutex` guards the whole map and every record in it.
//! Critical sections are pure in-memory work (no I/O is ever awaited while
//! the lock is held), so waiting for the lock is bounded by contention only.
//! Updates to two different keys serialize but never interleave partially.
//!
//! Reads hand out clones. A snapshot taken with [`SessionStore::get_all`]
//! never aliases the live map.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::session::{ChatMessage, ConversationKey, Session};

/// Snapshot of every session, keyed by conversation
pub type SessionMap = HashMap<ConversationKey, Session>;

/// Shared, lock-guarded session map
///
/// Cloning the store is cheap and yields another handle to the same map.
#[derive(Clone, Debug, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<SessionMap>>,
}

impl SessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot one session
    pub async fn get(&self, key: &ConversationKey) -> Option<Session> {
        self.inner.lock().await.get(key).cloned()
    }

    /// Replace (or insert) a whole record
    pub async fn set(&self, key: ConversationKey, session: Session) {
        self.inner.lock().await.insert(key, session);
    }

    /// Create a session if none exists for `key`
    ///
    /// Exactly one concurrent initializer wins; every caller gets back the
    /// record that is in the map after the call.
    pub async fn initialize_if_absent(
        &self,
        key: &ConversationKey,
        model: &str,
        default_temperature: f32,
        selected_prompt_id: Option<i64>,
    ) -> Session {
        let mut map = self.inner.lock().await;
        map.entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(key = %key, model = model, "Initialized session");
                Session::new(model, default_temperature, selected_prompt_id)
            })
            .clone()
    }

    /// Remove and return a session
    pub async fn pop(&self, key: &ConversationKey) -> Option<Session> {
        self.inner.lock().await.remove(key)
    }

    /// Check whether a session exists
    pub async fn contains(&self, key: &ConversationKey) -> bool {
        self.inner.lock().await.contains_key(key)
    }

    /// Deep snapshot of every session
    pub async fn get_all(&self) -> SessionMap {
        self.inner.lock().await.clone()
    }

    /// Atomically replace the entire map
    pub async fn replace_all(&self, sessions: SessionMap) {
        *self.inner.lock().await = sessions;
    }

    /// Number of sessions
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// True if there are no sessions
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Run `f` against one session under the lock
    ///
    /// Returns `None` without calling `f` when the key is absent.
    pub async fn update<F, R>(&self, key: &ConversationKey, f: F) -> Option<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut map = self.inner.lock().await;
        map.get_mut(key).map(f)
    }

    /// Create the session with `init` if absent, then run `f` against it
    ///
    /// Both steps happen in one critical section, so a concurrent `pop`
    /// cannot slip in between them.
    pub async fn upsert<I, F, R>(&self, key: &ConversationKey, init: I, f: F) -> R
    where
        I: FnOnce() -> Session,
        F: FnOnce(&mut Session) -> R,
    {
        let mut map = self.inner.lock().await;
        f(map.entry(key.clone()).or_insert_with(init))
    }

    /// Append a message to the history (no-op if absent)
    pub async fn update_message(&self, key: &ConversationKey, message: ChatMessage) {
        self.update(key, |s| s.push(message)).await;
    }

    /// Change the session model (no-op if absent)
    pub async fn update_model(&self, key: &ConversationKey, model: &str) {
        self.update(key, |s| s.model = model.to_string()).await;
    }

    /// Change the sampling temperature (no-op if absent)
    pub async fn update_temperature(&self, key: &ConversationKey, temperature: f32) {
        self.update(key, |s| s.temperature = temperature).await;
    }

    /// Change the selected system prompt (no-op if absent)
    pub async fn update_selected_prompt_id(&self, key: &ConversationKey, prompt_id: Option<i64>) {
        self.update(key, |s| s.selected_prompt_id = prompt_id).await;
    }

    /// Set the selected system prompt on every session in one critical section
    pub async fn broadcast_selected_prompt_id(&self, prompt_id: Option<i64>) -> usize {
        let mut map = self.inner.lock().await;
        for session in map.values_mut() {
            session.selected_prompt_id = prompt_id;
        }
        map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MessageRole;
    use pretty_assertions::assert_eq;

    fn key(raw: &str) -> ConversationKey {
        ConversationKey::from(raw)
    }

    #[tokio::test]
    async fn test_initialize_if_absent_keeps_existing_record() {
        let store = SessionStore::new();
        let first = store
            .initialize_if_absent(&key("private_1"), "llama3.2", 0.7, None)
            .await;
        store
            .update_message(&key("private_1"), ChatMessage::user("hello"))
            .await;

        let second = store
            .initialize_if_absent(&key("private_1"), "other-model", 0.1, Some(9))
            .await;

        assert_eq!(first.model, "llama3.2");
        assert_eq!(second.model, "llama3.2");
        assert_eq!(second.messages.len(), 1);
        assert!(second.stream);
    }

    #[tokio::test]
    async fn test_concurrent_initializers_yield_single_record() {
        let store = SessionStore::new();
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .initialize_if_absent(&key("group_7"), &format!("model-{i}"), 0.5, None)
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(store.len().await, 1);
        let stored = store.get(&key("group_7")).await.unwrap();
        assert!(results.iter().all(|s| *s == stored));
    }

    #[tokio::test]
    async fn test_field_updates_on_absent_key_are_noops() {
        let store = SessionStore::new();
        let missing = key("private_404");

        assert!(store.get(&missing).await.is_none());
        store
            .update_message(&missing, ChatMessage::user("ghost"))
            .await;
        store.update_model(&missing, "m").await;
        store.update_temperature(&missing, 0.2).await;
        store.update_selected_prompt_id(&missing, Some(1)).await;

        assert!(store.get(&missing).await.is_none());
        assert!(!store.contains(&missing).await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_field_update_touches_only_that_field() {
        let store = SessionStore::new();
        let k = key("private_5");
        store.initialize_if_absent(&k, "m", 0.7, Some(2)).await;
        store.update_temperature(&k, 0.3).await;

        let session = store.get(&k).await.unwrap();
        assert!((session.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(session.model, "m");
        assert_eq!(session.selected_prompt_id, Some(2));
        assert!(session.messages.is_empty());
    }

    #[tokio::test]
    async fn test_replace_all_then_get_all_round_trips() {
        let store = SessionStore::new();
        store.set(key("stale"), Session::new("x", 0.1, None)).await;

        let mut restored = SessionMap::new();
        let mut a = Session::new("llama3.2", 0.7, Some(1));
        a.push(ChatMessage::user("hi"));
        restored.insert(key("private_1"), a);
        restored.insert(key("group_2"), Session::new("qwen", 0.2, None));

        store.replace_all(restored.clone()).await;
        assert_eq!(store.get_all().await, restored);
    }

    #[tokio::test]
    async fn test_snapshot_does_not_alias_store() {
        let store = SessionStore::new();
        let k = key("private_1");
        store.initialize_if_absent(&k, "m", 0.7, None).await;

        let snapshot = store.get_all().await;
        store.update_message(&k, ChatMessage::user("later")).await;
        store.pop(&k).await;

        assert!(snapshot[&k].messages.is_empty());
        assert!(store.get_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_pop_returns_record() {
        let store = SessionStore::new();
        let k = key("private_1");
        store.initialize_if_absent(&k, "m", 0.7, None).await;

        let popped = store.pop(&k).await.unwrap();
        assert_eq!(popped.model, "m");
        assert!(store.pop(&k).await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_selected_prompt_id() {
        let store = SessionStore::new();
        store.initialize_if_absent(&key("a"), "m", 0.7, None).await;
        store.initialize_if_absent(&key("b"), "m", 0.7, Some(1)).await;

        assert_eq!(store.broadcast_selected_prompt_id(Some(4)).await, 2);
        for session in store.get_all().await.values() {
            assert_eq!(session.selected_prompt_id, Some(4));
        }
    }

    #[tokio::test]
    async fn test_update_returns_closure_result() {
        let store = SessionStore::new();
        let k = key("private_1");
        store.initialize_if_absent(&k, "m", 0.7, None).await;

        let count = store
            .update(&k, |s| {
                s.set_system_prompt("sys");
                s.push(ChatMessage::user("q"));
                s.message_count()
            })
            .await;
        assert_eq!(count, Some(2));
        assert_eq!(
            store.get(&k).await.unwrap().messages[0].role,
            MessageRole::System
        );
    }

    #[tokio::test]
    async fn test_system_message_update_replaces_prompt() {
        let store = SessionStore::new();
        let k = key("private_8");
        store.initialize_if_absent(&k, "m", 0.7, None).await;
        store.update(&k, |s| s.set_system_prompt("one")).await;
        store.update_message(&k, ChatMessage::user("hi")).await;

        store
            .update_message(&k, ChatMessage::new(MessageRole::System, "two"))
            .await;

        let session = store.get(&k).await.unwrap();
        let system: Vec<_> = session
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .collect();
        assert_eq!(system.len(), 1);
        assert_eq!(session.system_prompt(), Some("two"));
        assert_eq!(session.messages[0].role, MessageRole::System);
        assert_eq!(session.message_count(), 2);
    }

    #[tokio::test]
    async fn test_upsert_creates_then_mutates() {
        let store = SessionStore::new();
        let k = key("group_3");

        let len = store
            .upsert(
                &k,
                || Session::new("m", 0.7, None),
                |s| {
                    s.push(ChatMessage::user("first"));
                    s.message_count()
                },
            )
            .await;
        assert_eq!(len, 1);

        let len = store
            .upsert(
                &k,
                || Session::new("unused", 0.1, None),
                |s| {
                    s.push(ChatMessage::user("second"));
                    s.message_count()
                },
            )
            .await;
        assert_eq!(len, 2);
        assert_eq!(store.get(&k).await.unwrap().model, "m");
    }
}
