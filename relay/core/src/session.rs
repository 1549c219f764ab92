//! Session Model
//!
//! Per-conversation state shared between the front-end and the generation
//! backend. A session tracks the selected model, sampling temperature, the
//! selected system prompt and the ordered message history that is replayed
//! to the backend on every request.
//!
//! # Design Philosophy
//!
//! Sessions are plain data. All mutation happens through the
//! [`SessionStore`](crate::store::SessionStore), which serializes access, so
//! the methods here never need to think about concurrency.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Who authored a message in the conversation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt
    System,
    /// Human participant
    User,
    /// Model output
    Assistant,
}

impl MessageRole {
    /// Wire name of the role
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse a wire name
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::System => "System",
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message in the conversation history
///
/// The field names match the backend chat wire format so a session's history
/// can be sent without conversion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// Base64-encoded image attachments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    /// Create a message without attachments
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Attach a base64-encoded image
    #[must_use]
    pub fn with_image(mut self, image_base64: impl Into<String>) -> Self {
        self.images.push(image_base64.into());
        self
    }
}

/// Whether a conversation is one-to-one or multi-party
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    /// One user talking to the bot
    Private,
    /// Group or supergroup chat
    Group,
}

impl ChatKind {
    /// True for multi-party conversations
    #[must_use]
    pub fn is_group(self) -> bool {
        matches!(self, Self::Group)
    }
}

/// Key identifying one logical conversation
///
/// Private chats are keyed by the user, group chats by the chat, so everyone
/// in a group shares one history.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(pub String);

impl ConversationKey {
    /// Derive the key for a conversation
    #[must_use]
    pub fn derive(kind: ChatKind, user_id: i64, chat_id: i64) -> Self {
        match kind {
            ChatKind::Private => Self(format!("private_{user_id}")),
            ChatKind::Group => Self(format!("group_{chat_id}")),
        }
    }

    /// Borrow the raw key
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A conversation session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Model currently selected for this session
    pub model: String,
    /// Conversation history in order
    pub messages: Vec<ChatMessage>,
    /// Whether responses are requested as a stream
    pub stream: bool,
    /// Sampling temperature
    pub temperature: f32,
    /// Selected system prompt record, if any
    pub selected_prompt_id: Option<i64>,
}

impl Session {
    /// Create an empty streaming session
    pub fn new(model: impl Into<String>, temperature: f32, selected_prompt_id: Option<i64>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            stream: true,
            temperature,
            selected_prompt_id,
        }
    }

    /// Append a message
    ///
    /// A system message replaces the installed system prompt instead of
    /// adding a second one.
    pub fn push(&mut self, message: ChatMessage) {
        if message.role == MessageRole::System {
            self.set_system_prompt(message.content);
        } else {
            self.messages.push(message);
        }
    }

    /// Install a system prompt
    ///
    /// Replaces the content of an existing system entry in place; otherwise
    /// the entry is inserted at the front of the history.
    pub fn set_system_prompt(&mut self, content: impl Into<String>) {
        let content = content.into();
        if let Some(existing) = self
            .messages
            .iter_mut()
            .find(|m| m.role == MessageRole::System)
        {
            existing.content = content;
            existing.images.clear();
        } else {
            self.messages
                .insert(0, ChatMessage::new(MessageRole::System, content));
        }
    }

    /// The current system prompt, if one is installed
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
    }

    /// Get current message count
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Render the history as `*Role*: content` lines
    #[must_use]
    pub fn history_text(&self) -> String {
        let mut out = String::new();
        for msg in &self.messages {
            out.push_str(&format!("*{}*: {}\n", msg.role.title(), msg.content));
        }
        out
    }
}
