//! Inbound Messages
//!
//! Platform-neutral view of a received chat message, the reply policy that
//! decides whether the bot answers it, and reply-thread collection.

use std::collections::HashSet;

use rand::Rng;

use crate::delivery::ConversationTarget;
use crate::session::{ChatKind, ConversationKey};

/// Chat a message was posted in
#[derive(Clone, Debug, PartialEq)]
pub struct ChatRef {
    /// Chat id (negative for groups on Telegram)
    pub id: i64,
    /// Private or group
    pub kind: ChatKind,
    /// Group title
    pub title: Option<String>,
}

/// Author of a message
#[derive(Clone, Debug, PartialEq)]
pub struct Sender {
    /// User id
    pub id: i64,
    /// First name
    pub first_name: String,
    /// Last name
    pub last_name: Option<String>,
    /// Whether the author is a bot
    pub is_bot: bool,
}

impl Sender {
    /// "First Last", or just the first name
    #[must_use]
    pub fn full_name(&self) -> String {
        match &self.last_name {
            Some(last) => format!("{} {last}", self.first_name),
            None => self.first_name.clone(),
        }
    }
}

/// A received message
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    /// Message id
    pub id: i64,
    /// Chat it was posted in
    pub chat: ChatRef,
    /// Author
    pub from: Sender,
    /// Message text
    pub text: Option<String>,
    /// Caption of an attachment
    pub caption: Option<String>,
    /// Raw image attachment
    pub image: Option<Vec<u8>>,
    /// The message this one replies to
    pub reply_to: Option<Box<InboundMessage>>,
}

impl InboundMessage {
    /// Text message from `from` in `chat`
    pub fn text(id: i64, chat: ChatRef, from: Sender, text: impl Into<String>) -> Self {
        Self {
            id,
            chat,
            from,
            text: Some(text.into()),
            caption: None,
            image: None,
            reply_to: None,
        }
    }

    /// Set the message this one replies to
    #[must_use]
    pub fn replying_to(mut self, parent: InboundMessage) -> Self {
        self.reply_to = Some(Box::new(parent));
        self
    }

    /// Session key for this message's conversation
    #[must_use]
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::derive(self.chat.kind, self.from.id, self.chat.id)
    }

    /// Where replies to this message go
    ///
    /// Group replies quote the triggering message; private replies do not.
    #[must_use]
    pub fn target(&self) -> ConversationTarget {
        ConversationTarget {
            chat_id: self.chat.id,
            reply_to: self.chat.kind.is_group().then_some(self.id),
        }
    }

    /// Text, else caption
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }
}

/// Walk the reply chain of `message`, oldest first
///
/// The result includes `message` itself and holds at most `max_depth`
/// messages. A message id seen twice ends the walk.
#[must_use]
pub fn collect_thread(message: &InboundMessage, max_depth: usize) -> Vec<&InboundMessage> {
    let mut thread = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(message);

    while let Some(msg) = current {
        if thread.len() >= max_depth || !seen.insert(msg.id) {
            break;
        }
        thread.push(msg);
        current = msg.reply_to.as_deref();
    }

    thread.reverse();
    thread
}

/// Render a reply thread as a prompt
#[must_use]
pub fn format_thread(thread: &[&InboundMessage], bot_id: i64) -> String {
    let mut prompt = String::from("Conversation thread:\n\n");
    for msg in thread {
        let speaker = if msg.from.id == bot_id { "Bot" } else { "User" };
        let content = msg.body().unwrap_or("[No text content]");
        prompt.push_str(&format!("{speaker}: {content}\n\n"));
    }
    prompt.push_str("History:");
    prompt
}

/// What to do with an inbound message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyDecision {
    /// Stay quiet
    Ignore,
    /// Answer the message as is
    Respond,
    /// Answer with the collected reply thread as the prompt
    RespondWithThread,
}

/// When the bot speaks up in group chats
#[derive(Clone, Debug, PartialEq)]
pub struct ReplyPolicy {
    /// The bot's own user id
    pub bot_id: i64,
    /// Mention that addresses the bot, e.g. `@marvin_bot`
    pub mention: String,
    /// Word that makes the bot answer anywhere in a message
    pub trigger_word: String,
    /// Chance of answering an unaddressed group message
    pub random_reply_rate: f64,
}

impl ReplyPolicy {
    /// Decide whether to answer `msg`
    ///
    /// Private chats are always answered.
    pub fn decide<R: Rng + ?Sized>(&self, msg: &InboundMessage, rng: &mut R) -> ReplyDecision {
        if !msg.chat.kind.is_group() {
            return ReplyDecision::Respond;
        }

        if let Some(text) = &msg.text {
            let triggered = !self.trigger_word.is_empty()
                && text.to_lowercase().contains(&self.trigger_word.to_lowercase());
            if triggered || rng.gen::<f64>() < self.random_reply_rate {
                return ReplyDecision::Respond;
            }
        }

        if self.is_addressed(msg) {
            ReplyDecision::RespondWithThread
        } else {
            ReplyDecision::Ignore
        }
    }

    fn is_addressed(&self, msg: &InboundMessage) -> bool {
        let mentioned = !self.mention.is_empty()
            && [&msg.text, &msg.caption]
                .into_iter()
                .flatten()
                .any(|t| t.starts_with(&self.mention));
        let replies_to_bot = msg
            .reply_to
            .as_ref()
            .is_some_and(|parent| parent.from.id == self.bot_id);
        mentioned || replies_to_bot
    }
}
