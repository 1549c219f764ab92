//! Conductor - The Relay Orchestrator
//!
//! The Conductor glues the relay together. It:
//! - resolves the conversation for an inbound message
//! - stages the user turn in the [`SessionStore`]
//! - drives a generation through the [`ChatBackend`] and the NDJSON ingester
//! - renders the finished reply into pages and hands them to [`Delivery`]
//! - commits the result to the store and to [`SessionPersistence`]
//!
//! # Design Philosophy
//!
//! The Conductor is front-end agnostic. It never formats platform envelopes;
//! it talks to the chat front-end only through [`Delivery`] and to storage
//! only through [`SessionPersistence`]. All user-visible failure messaging
//! lives here, so the lower layers only ever return errors.
//!
//! The typing indicator brackets the whole request and is cleared on every
//! exit path, including a panic inside the generation (which is resumed
//! after the indicator is cleared).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use futures::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendError, ChatBackend, ChatRequest, ModelInfo};
use crate::config::{ConfigError, RelayConfig};
use crate::delivery::{ConversationTarget, Delivery, DeliveryError};
use crate::inbound::{collect_thread, format_thread, InboundMessage, ReplyDecision, ReplyPolicy};
use crate::markup::{escape_raw, Transcoder};
use crate::persistence::{PersistenceError, PromptFilter, SessionPersistence, SystemPrompt};
use crate::session::{ChatKind, ChatMessage, ConversationKey, MessageRole, Session};
use crate::settings::{GlobalSettings, SettingsHandle};
use crate::store::SessionStore;
use crate::streaming::{
    ChatChunk, CompletionStats, IngestError, NdjsonStream, ResponseAccumulator, StreamEvent,
};

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced by the Conductor
#[derive(Debug, Error)]
pub enum ConductorError {
    /// The backend could not be reached or refused the request
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The response stream broke off
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// Storage failed
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The front-end could not deliver
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// Configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The backend reported an error inside the stream
    #[error("generation failed: {0}")]
    Generation(String),

    /// Temperature outside 0.0..=1.0
    #[error("Temperature must be between 0.0 and 1.0, got {0}")]
    InvalidTemperature(f32),

    /// No system prompt with this id
    #[error("no system prompt with id {0}")]
    UnknownPrompt(i64),

    /// The relay is shutting down
    #[error("generation cancelled")]
    Cancelled,
}

// =============================================================================
// Configuration
// =============================================================================

/// Conductor configuration
#[derive(Clone, Debug)]
pub struct ConductorConfig {
    /// Model used until an operator switches
    pub default_model: String,
    /// Temperature for new sessions
    pub default_temperature: f32,
    /// System prompt installed on first start
    pub system_prompt: Option<String>,
    /// Name the model prefixes its replies with
    pub speaker_label: String,
    /// Maximum characters per delivered page
    pub page_limit: usize,
    /// Maximum messages collected from a reply thread
    pub max_thread_depth: usize,
    /// Send partial replies at sentence boundaries
    pub stream_previews: bool,
    /// The bot's own user id on the front-end
    pub bot_id: i64,
    /// Mention that addresses the bot in groups
    pub bot_mention: String,
    /// Word that makes the bot answer anywhere in a group message
    pub trigger_word: String,
    /// Chance of answering an unaddressed group message
    pub random_reply_rate: f64,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self::from_relay_config(&RelayConfig::default(), 0)
    }
}

impl ConductorConfig {
    /// Take the conductor's share of a loaded [`RelayConfig`]
    #[must_use]
    pub fn from_relay_config(config: &RelayConfig, bot_id: i64) -> Self {
        Self {
            default_model: config.default_model.clone(),
            default_temperature: config.default_temperature,
            system_prompt: config.system_prompt.clone(),
            speaker_label: config.speaker_label.clone(),
            page_limit: config.page_limit,
            max_thread_depth: config.max_thread_depth,
            stream_previews: config.stream_previews,
            bot_id,
            bot_mention: config.bot_mention.clone(),
            trigger_word: config.trigger_word.clone(),
            random_reply_rate: config.random_reply_rate,
        }
    }

    fn reply_policy(&self) -> ReplyPolicy {
        ReplyPolicy {
            bot_id: self.bot_id,
            mention: self.bot_mention.clone(),
            trigger_word: self.trigger_word.clone(),
            random_reply_rate: self.random_reply_rate,
        }
    }
}

/// A delivered reply
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    /// Pages as sent to the front-end
    pub pages: Vec<String>,
    /// Raw reply text, as committed to the history
    pub text: String,
    /// Statistics from the terminal record
    pub stats: CompletionStats,
}

/// User turn staged into a session under the store lock
struct UserTurn {
    system_prompt: Option<String>,
    entry: ChatMessage,
    model: String,
    prompt_id: Option<i64>,
}

impl UserTurn {
    fn apply(self, session: &mut Session) -> Session {
        if let Some(prompt) = self.system_prompt {
            session.set_system_prompt(prompt);
        }
        session.push(self.entry);
        session.model = self.model;
        session.selected_prompt_id = self.prompt_id;
        session.clone()
    }
}

// =============================================================================
// Conductor
// =============================================================================

/// The relay orchestrator
///
/// Every method takes `&self`; wrap the Conductor in an `Arc` and call it
/// from as many conversation tasks as needed.
pub struct Conductor<B: ChatBackend> {
    config: ConductorConfig,
    backend: Arc<B>,
    sessions: SessionStore,
    settings: SettingsHandle,
    transcoder: Transcoder,
    policy: ReplyPolicy,
    persistence: Arc<dyn SessionPersistence>,
    delivery: Arc<dyn Delivery>,
    shutdown: CancellationToken,
}

impl<B: ChatBackend> Conductor<B> {
    /// Create a Conductor with empty sessions and default global settings
    pub fn new(
        backend: B,
        config: ConductorConfig,
        persistence: Arc<dyn SessionPersistence>,
        delivery: Arc<dyn Delivery>,
    ) -> Self {
        let settings = SettingsHandle::new(GlobalSettings::new(
            config.default_model.clone(),
            config.default_temperature,
        ));
        let transcoder = Transcoder::new(config.speaker_label.clone(), config.page_limit);
        let policy = config.reply_policy();

        Self {
            config,
            backend: Arc::new(backend),
            sessions: SessionStore::new(),
            settings,
            transcoder,
            policy,
            persistence,
            delivery,
            shutdown: CancellationToken::new(),
        }
    }

    /// Validate a loaded [`RelayConfig`] and build a Conductor from it
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Config`] if the configuration is invalid.
    pub fn from_config(
        backend: B,
        config: &RelayConfig,
        bot_id: i64,
        persistence: Arc<dyn SessionPersistence>,
        delivery: Arc<dyn Delivery>,
    ) -> Result<Self, ConductorError> {
        config.validate()?;
        Ok(Self::new(
            backend,
            ConductorConfig::from_relay_config(config, bot_id),
            persistence,
            delivery,
        ))
    }

    /// The session store
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// The shared global settings
    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// The configuration in use
    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Token that stops in-flight generations when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Load sessions and global settings from storage
    ///
    /// When a system prompt is configured and no prompt is selected yet, the
    /// matching global prompt is selected, creating it if needed. Returns the
    /// number of restored sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read or written.
    pub async fn restore(&self) -> Result<usize, ConductorError> {
        let sessions = self.persistence.load_all_sessions().await?;
        let count = sessions.len();
        self.sessions.replace_all(sessions).await;

        let mut settings = self.settings.snapshot().await;
        if let Some(stored) = self.persistence.load_global_settings().await? {
            if let Some(model) = stored.model.filter(|m| !m.is_empty()) {
                settings.model = model;
            }
            settings.selected_prompt_id = stored.selected_prompt_id;
        }

        if let (Some(text), None) = (&self.config.system_prompt, settings.selected_prompt_id) {
            let existing = self
                .persistence
                .system_prompts(PromptFilter::all())
                .await?
                .into_iter()
                .find(|p| p.text == *text);
            let id = match existing {
                Some(prompt) => prompt.id,
                None => {
                    let id = self.persistence.add_system_prompt(None, text, true).await?;
                    tracing::info!(prompt_id = id, "Created system prompt from configuration");
                    id
                }
            };
            settings.selected_prompt_id = Some(id);
        }

        self.persistence.save_global_settings(&settings).await?;
        tracing::info!(
            sessions = count,
            model = %settings.model,
            prompt_id = ?settings.selected_prompt_id,
            "Restored relay state"
        );
        self.settings.replace(settings).await;
        Ok(count)
    }

    /// Stop in-flight generations and write everything to storage
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be written.
    pub async fn shutdown(&self) -> Result<(), ConductorError> {
        self.shutdown.cancel();
        let settings = self.settings.snapshot().await;
        self.persistence.save_global_settings(&settings).await?;
        let sessions = self.sessions.get_all().await;
        self.persistence.save_all_sessions(&sessions).await?;
        tracing::info!(sessions = sessions.len(), "Saved relay state");
        Ok(())
    }

    // =========================================================================
    // Generation
    // =========================================================================

    /// Handle an inbound message according to the reply policy
    ///
    /// Returns `Ok(None)` when the message is ignored or the reply was empty.
    ///
    /// # Errors
    ///
    /// See [`Conductor::respond`].
    pub async fn handle_message(
        &self,
        msg: &InboundMessage,
    ) -> Result<Option<Reply>, ConductorError> {
        let decision = self.policy.decide(msg, &mut rand::thread_rng());
        match decision {
            ReplyDecision::Ignore => Ok(None),
            ReplyDecision::Respond => self.respond(msg, None).await,
            ReplyDecision::RespondWithThread => {
                let thread = collect_thread(msg, self.config.max_thread_depth);
                let prompt = format_thread(&thread, self.config.bot_id);
                self.respond(msg, Some(prompt)).await
            }
        }
    }

    /// Generate and deliver a reply to `msg`
    ///
    /// `prompt` overrides the message text. On failure the user gets a
    /// "Something went wrong" notice and the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first backend, stream, storage or delivery failure, or
    /// [`ConductorError::Cancelled`] if the relay is shutting down.
    pub async fn respond(
        &self,
        msg: &InboundMessage,
        prompt: Option<String>,
    ) -> Result<Option<Reply>, ConductorError> {
        let target = msg.target();
        if let Err(e) = self.delivery.send_typing(&target).await {
            tracing::warn!(error = %e, "Failed to show typing indicator");
        }

        let outcome = AssertUnwindSafe(self.respond_inner(msg, prompt, &target))
            .catch_unwind()
            .await;

        if let Err(e) = self.delivery.clear_typing(&target).await {
            tracing::warn!(error = %e, "Failed to clear typing indicator");
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn respond_inner(
        &self,
        msg: &InboundMessage,
        prompt: Option<String>,
        target: &ConversationTarget,
    ) -> Result<Option<Reply>, ConductorError> {
        let result = self.generate_reply(msg, prompt, target).await;
        if let Err(ref e) = result {
            tracing::error!(chat_id = target.chat_id, error = %e, "Generation failed");
            if !matches!(e, ConductorError::Cancelled) {
                let notice = format!("Something went wrong: {e}");
                if let Err(de) = self.delivery.send_notice(target, &notice).await {
                    tracing::warn!(error = %de, "Failed to send error notice");
                }
            }
        }
        result
    }

    async fn generate_reply(
        &self,
        msg: &InboundMessage,
        prompt: Option<String>,
        target: &ConversationTarget,
    ) -> Result<Option<Reply>, ConductorError> {
        let key = msg.conversation_key();
        let kind = msg.chat.kind;
        let settings = self.settings.snapshot().await;

        let prompt = prompt
            .or_else(|| msg.body().map(str::to_string))
            .unwrap_or_default();
        let image = msg.image.as_deref().map(|bytes| BASE64_STANDARD.encode(bytes));
        if prompt.trim().is_empty() && image.is_none() {
            tracing::debug!(key = %key, "Nothing to send");
            return Ok(None);
        }

        let system_prompt = self
            .resolve_system_prompt(settings.selected_prompt_id, msg.from.id)
            .await?;

        let user_name = msg.from.full_name();
        self.persistence
            .log_chat_message(msg.from.id, &user_name, MessageRole::User, &prompt)
            .await?;

        let content = if kind.is_group() {
            format!("{}: {prompt}", msg.from.first_name)
        } else {
            prompt
        };
        let mut entry = ChatMessage::user(content);
        if let Some(image) = image {
            entry = entry.with_image(image);
        }
        let turn = UserTurn {
            system_prompt,
            entry,
            model: settings.model.clone(),
            prompt_id: settings.selected_prompt_id,
        };
        let session = self
            .sessions
            .upsert(
                &key,
                || {
                    Session::new(
                        settings.model.clone(),
                        settings.default_temperature,
                        settings.selected_prompt_id,
                    )
                },
                |s| turn.apply(s),
            )
            .await;
        self.persistence.save_session(&key, &session).await?;

        tracing::info!(key = %key, user = %user_name, model = %session.model, "Processing prompt");

        let mut accumulated = ResponseAccumulator::new();
        let stats = match self
            .stream_reply(&session, kind, target, &mut accumulated)
            .await
        {
            Ok(stats) => stats,
            Err(e) => {
                self.commit_flushed(&key, &accumulated).await;
                return Err(e);
            }
        };

        if accumulated.is_blank() {
            tracing::debug!(key = %key, "Dropped empty reply");
            return Ok(None);
        }

        let text = accumulated.into_text().trim().to_string();
        let footer = (!kind.is_group()).then(|| {
            format!(
                "\n\n⚙️ {}\nGenerated in {:.2}s.",
                session.model,
                stats.duration().as_secs_f64()
            )
        });
        let pages = self.transcoder.render(&text, kind, footer.as_deref());
        self.delivery.send_pages(target, &pages).await?;

        self.sessions
            .update_message(&key, ChatMessage::assistant(text.clone()))
            .await;
        if let Some(snapshot) = self.sessions.get(&key).await {
            self.persistence.save_session(&key, &snapshot).await?;
        }
        self.persistence
            .log_chat_message(msg.from.id, &user_name, MessageRole::Assistant, &text)
            .await?;

        if stats.total_duration_nanos > 0 && stats.total_tokens > 0 {
            tracing::info!(
                model = %session.model,
                duration_secs = stats.duration().as_secs_f64(),
                tokens = stats.total_tokens,
                tokens_per_sec = stats.tokens_per_second(),
                "Token usage"
            );
        }

        Ok(Some(Reply { pages, text, stats }))
    }

    /// Consume the generation stream into `accumulated`
    ///
    /// Returns once the terminal record arrives or the source ends.
    async fn stream_reply(
        &self,
        session: &Session,
        kind: ChatKind,
        target: &ConversationTarget,
        accumulated: &mut ResponseAccumulator,
    ) -> Result<CompletionStats, ConductorError> {
        let request = ChatRequest::from_session(session);
        let body = tokio::select! {
            () = self.shutdown.cancelled() => return Err(ConductorError::Cancelled),
            body = self.backend.generate(&request) => body?,
        };
        let mut records: NdjsonStream<_, ChatChunk> = NdjsonStream::new(body);

        loop {
            let next = tokio::select! {
                () = self.shutdown.cancelled() => return Err(ConductorError::Cancelled),
                next = records.next_record() => next,
            };

            let Some(record) = next else {
                tracing::debug!(skipped = records.skipped(), "Stream ended without a terminal record");
                return Ok(CompletionStats::default());
            };

            for event in record?.into_events().map_err(ConductorError::Generation)? {
                match event {
                    StreamEvent::Delta { content, .. } => {
                        if accumulated.push(&content) && self.config.stream_previews {
                            self.send_preview(kind, target, accumulated).await;
                        }
                    }
                    StreamEvent::Done(stats) => return Ok(stats),
                }
            }
        }
    }

    async fn send_preview(
        &self,
        kind: ChatKind,
        target: &ConversationTarget,
        accumulated: &mut ResponseAccumulator,
    ) {
        let preview = self.transcoder.transcode(accumulated.text(), kind);
        if preview.is_empty() {
            return;
        }
        match self.delivery.send_preview(target, &preview).await {
            Ok(()) => accumulated.mark_flushed(),
            Err(e) => tracing::warn!(error = %e, "Failed to send preview"),
        }
    }

    /// Keep the part of a broken reply the user has already seen
    async fn commit_flushed(&self, key: &ConversationKey, accumulated: &ResponseAccumulator) {
        let Some(shown) = accumulated.flushed_text().map(str::trim) else {
            return;
        };
        if shown.is_empty() {
            return;
        }

        self.sessions
            .update_message(key, ChatMessage::assistant(shown))
            .await;
        if let Some(snapshot) = self.sessions.get(key).await {
            if let Err(e) = self.persistence.save_session(key, &snapshot).await {
                tracing::warn!(key = %key, error = %e, "Failed to save partial reply");
            }
        }
    }

    async fn resolve_system_prompt(
        &self,
        prompt_id: Option<i64>,
        user_id: i64,
    ) -> Result<Option<String>, ConductorError> {
        let Some(id) = prompt_id else {
            return Ok(None);
        };
        let found = self
            .persistence
            .system_prompts(PromptFilter::for_user(user_id))
            .await?
            .into_iter()
            .find(|p| p.id == id);
        if found.is_none() {
            tracing::warn!(prompt_id = id, user_id, "Selected system prompt not found");
        }
        Ok(found.map(|p| p.text))
    }

    // =========================================================================
    // Conversation commands
    // =========================================================================

    /// Forget a conversation, returning whether it existed
    ///
    /// # Errors
    ///
    /// Returns an error if the stored copy cannot be deleted.
    pub async fn reset(&self, key: &ConversationKey) -> Result<bool, ConductorError> {
        let existed = self.sessions.pop(key).await.is_some();
        self.persistence.delete_session(key).await?;
        if existed {
            tracing::info!(key = %key, "Chat has been reset");
        }
        Ok(existed)
    }

    /// History of a conversation as `*Role*: content` lines
    pub async fn history(&self, key: &ConversationKey) -> Option<String> {
        self.sessions.get(key).await.map(|s| s.history_text())
    }

    /// Set the sampling temperature of one conversation
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::InvalidTemperature`] outside 0.0..=1.0, or a
    /// storage error.
    pub async fn set_temperature(
        &self,
        key: &ConversationKey,
        temperature: f32,
    ) -> Result<(), ConductorError> {
        if !(0.0..=1.0).contains(&temperature) {
            return Err(ConductorError::InvalidTemperature(temperature));
        }
        let settings = self.settings.snapshot().await;
        let session = self
            .sessions
            .upsert(
                key,
                || {
                    Session::new(
                        settings.model.clone(),
                        settings.default_temperature,
                        settings.selected_prompt_id,
                    )
                },
                |s| {
                    s.temperature = temperature;
                    s.clone()
                },
            )
            .await;
        self.persistence.save_session(key, &session).await?;
        Ok(())
    }

    // =========================================================================
    // Operator commands
    // =========================================================================

    /// Switch the model used for every conversation
    ///
    /// # Errors
    ///
    /// Returns an error if the settings cannot be saved.
    pub async fn switch_model(&self, model: &str) -> Result<(), ConductorError> {
        self.settings.set_model(model).await;
        self.persistence
            .save_global_settings(&self.settings.snapshot().await)
            .await?;
        tracing::info!(model, "Switched model");
        Ok(())
    }

    /// Select the system prompt for every conversation
    ///
    /// Returns the number of sessions updated.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::UnknownPrompt`] if `prompt_id` does not
    /// exist, or a storage error.
    pub async fn select_prompt(&self, prompt_id: Option<i64>) -> Result<usize, ConductorError> {
        if let Some(id) = prompt_id {
            if self.persistence.system_prompt(id).await?.is_none() {
                return Err(ConductorError::UnknownPrompt(id));
            }
        }
        self.settings.set_selected_prompt_id(prompt_id).await;
        self.persistence
            .save_global_settings(&self.settings.snapshot().await)
            .await?;
        let updated = self.sessions.broadcast_selected_prompt_id(prompt_id).await;
        tracing::info!(prompt_id = ?prompt_id, sessions = updated, "Selected system prompt");
        Ok(updated)
    }

    /// Store a new system prompt and return its id
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn add_prompt(
        &self,
        owner_id: i64,
        text: &str,
        is_global: bool,
    ) -> Result<i64, ConductorError> {
        Ok(self
            .persistence
            .add_system_prompt(Some(owner_id), text, is_global)
            .await?)
    }

    /// Delete a system prompt, returning whether it existed
    ///
    /// Deleting the selected prompt clears the selection.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn delete_prompt(&self, prompt_id: i64) -> Result<bool, ConductorError> {
        let deleted = self.persistence.delete_system_prompt(prompt_id).await?;
        if deleted && self.settings.snapshot().await.selected_prompt_id == Some(prompt_id) {
            self.select_prompt(None).await?;
        }
        Ok(deleted)
    }

    /// System prompts visible to a user
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn prompts_for(&self, user_id: i64) -> Result<Vec<SystemPrompt>, ConductorError> {
        Ok(self
            .persistence
            .system_prompts(PromptFilter::for_user(user_id))
            .await?)
    }

    /// Models installed on the backend
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, ConductorError> {
        Ok(self.backend.list_models().await?)
    }

    /// Download a model on the backend
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn pull_model(&self, name: &str) -> Result<(), ConductorError> {
        tracing::info!(model = name, "Pulling model");
        Ok(self.backend.pull_model(name).await?)
    }

    /// Remove a model from the backend
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn delete_model(&self, name: &str) -> Result<(), ConductorError> {
        tracing::info!(model = name, "Deleting model");
        Ok(self.backend.delete_model(name).await?)
    }

    /// Status summary in the front-end markup dialect
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn about(&self, key: &ConversationKey) -> Result<String, ConductorError> {
        let settings = self.settings.snapshot().await;
        let prompt_name = match settings.selected_prompt_id {
            Some(id) => self
                .persistence
                .system_prompt(id)
                .await?
                .map_or_else(|| "None".to_string(), |p| p.text),
            None => "None".to_string(),
        };
        let temperature = self
            .sessions
            .get(key)
            .await
            .map_or(settings.default_temperature, |s| s.temperature);

        Ok(format!(
            "<b><u>Bot Info</u></b>\n\n\
             <b>Current Model:</b> <code>{}</code>\n\
             <b>Default Model:</b> <code>{}</code>\n\n\
             <b>Selected Prompt:</b> <code>{}</code>\n\
             <b>Current Temperature:</b> <code>{temperature}</code>\n\
             <b>Backend:</b> <code>{}</code>",
            escape_raw(&settings.model),
            escape_raw(&self.config.default_model),
            escape_raw(&prompt_name),
            escape_raw(self.backend.name()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ByteStream;
    use crate::inbound::{ChatRef, Sender};
    use crate::persistence::MemoryStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use tokio::sync::Mutex;

    struct CannedBackend {
        body: &'static str,
    }

    #[async_trait]
    impl ChatBackend for CannedBackend {
        fn name(&self) -> &str {
            "canned"
        }
        async fn health_check(&self) -> bool {
            true
        }
        async fn generate(&self, _request: &ChatRequest) -> Result<ByteStream, BackendError> {
            let chunk: Result<Bytes, BackendError> = Ok(Bytes::from_static(self.body.as_bytes()));
            Ok(Box::pin(futures::stream::iter(vec![chunk])))
        }
        async fn list_models(&self) -> Result<Vec<ModelInfo>, BackendError> {
            Ok(Vec::new())
        }
        async fn pull_model(&self, _name: &str) -> Result<(), BackendError> {
            Ok(())
        }
        async fn delete_model(&self, _name: &str) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Sink {
        notices: Mutex<Vec<String>>,
        pages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Delivery for Sink {
        async fn send_pages(
            &self,
            _target: &ConversationTarget,
            pages: &[String],
        ) -> Result<(), DeliveryError> {
            self.pages.lock().await.extend_from_slice(pages);
            Ok(())
        }
        async fn send_notice(
            &self,
            _target: &ConversationTarget,
            text: &str,
        ) -> Result<(), DeliveryError> {
            self.notices.lock().await.push(text.to_string());
            Ok(())
        }
        async fn send_typing(&self, _target: &ConversationTarget) -> Result<(), DeliveryError> {
            Ok(())
        }
        async fn clear_typing(&self, _target: &ConversationTarget) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn conductor(body: &'static str) -> (Conductor<CannedBackend>, Arc<MemoryStore>, Arc<Sink>) {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(Sink::default());
        let conductor = Conductor::new(
            CannedBackend { body },
            ConductorConfig::default(),
            store.clone(),
            sink.clone(),
        );
        (conductor, store, sink)
    }

    #[test]
    fn test_user_turn_replaces_system_prompt() {
        let mut session = Session::new("old", 0.7, None);
        session.set_system_prompt("first");
        let turn = UserTurn {
            system_prompt: Some("second".into()),
            entry: ChatMessage::user("hi"),
            model: "new".into(),
            prompt_id: Some(3),
        };
        let snapshot = turn.apply(&mut session);

        assert_eq!(snapshot, session);
        assert_eq!(session.system_prompt(), Some("second"));
        assert_eq!(session.message_count(), 2);
        assert_eq!(session.model, "new");
        assert_eq!(session.selected_prompt_id, Some(3));
    }

    #[tokio::test]
    async fn test_set_temperature_validates_and_creates_session() {
        let (conductor, store, _) = conductor("");
        let key = ConversationKey::from("private_1");

        let err = conductor.set_temperature(&key, 1.2).await.unwrap_err();
        assert!(matches!(err, ConductorError::InvalidTemperature(_)));
        assert!(!conductor.sessions().contains(&key).await);

        conductor.set_temperature(&key, 0.25).await.unwrap();
        let session = conductor.sessions().get(&key).await.unwrap();
        assert!((session.temperature - 0.25).abs() < f32::EPSILON);
        assert!(store.saved_sessions().await.contains_key(&key));
    }

    #[tokio::test]
    async fn test_select_unknown_prompt_is_rejected() {
        let (conductor, _, _) = conductor("");
        let err = conductor.select_prompt(Some(42)).await.unwrap_err();
        assert!(matches!(err, ConductorError::UnknownPrompt(42)));
        assert_eq!(conductor.settings().snapshot().await.selected_prompt_id, None);
    }

    #[tokio::test]
    async fn test_deleting_selected_prompt_clears_selection() {
        let (conductor, _, _) = conductor("");
        let id = conductor.add_prompt(1, "Be terse.", true).await.unwrap();
        conductor.select_prompt(Some(id)).await.unwrap();

        assert!(conductor.delete_prompt(id).await.unwrap());
        assert_eq!(conductor.settings().snapshot().await.selected_prompt_id, None);
    }

    #[tokio::test]
    async fn test_backend_error_record_becomes_notice() {
        let (conductor, _, sink) = conductor("{\"error\":\"model not found\"}\n");
        let chat = ChatRef {
            id: 7,
            kind: ChatKind::Private,
            title: None,
        };
        let from = Sender {
            id: 7,
            first_name: "Ann".into(),
            last_name: None,
            is_bot: false,
        };
        let msg = InboundMessage::text(1, chat, from, "hello");

        let err = conductor.respond(&msg, None).await.unwrap_err();
        assert!(matches!(err, ConductorError::Generation(ref m) if m == "model not found"));
        assert_eq!(
            *sink.notices.lock().await,
            vec!["Something went wrong: generation failed: model not found".to_string()]
        );
        assert!(sink.pages.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_about_escapes_values() {
        let (conductor, _, _) = conductor("");
        conductor.switch_model("a<b>").await.unwrap();
        let about = conductor
            .about(&ConversationKey::from("private_1"))
            .await
            .unwrap();
        assert!(about.contains("<code>a&lt;b&gt;</code>"));
        assert!(about.contains("<b>Selected Prompt:</b> <code>None</code>"));
        assert!(about.contains("<code>0.7</code>"));
    }
}
