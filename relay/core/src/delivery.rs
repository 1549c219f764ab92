//! Front-end Delivery
//!
//! The conductor talks to the chat front-end only through [`Delivery`]. A
//! front-end receives finished pages, notices, typing-indicator brackets and
//! (optionally) partial previews.

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a front-end
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The front-end rejected or could not send a message
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Where a reply goes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConversationTarget {
    /// Chat to post into
    pub chat_id: i64,
    /// Message to reply to, if any
    pub reply_to: Option<i64>,
}

impl ConversationTarget {
    /// Target a chat without replying to a specific message
    #[must_use]
    pub fn chat(chat_id: i64) -> Self {
        Self {
            chat_id,
            reply_to: None,
        }
    }
}

/// Front-end delivery collaborator
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Send pages as separate messages, in order
    async fn send_pages(
        &self,
        target: &ConversationTarget,
        pages: &[String],
    ) -> Result<(), DeliveryError>;

    /// Send a plain-text notice (errors, command replies)
    async fn send_notice(&self, target: &ConversationTarget, text: &str)
        -> Result<(), DeliveryError>;

    /// Show the typing indicator
    async fn send_typing(&self, target: &ConversationTarget) -> Result<(), DeliveryError>;

    /// Hide the typing indicator
    async fn clear_typing(&self, target: &ConversationTarget) -> Result<(), DeliveryError>;

    /// Show a partial reply while generation continues
    ///
    /// Front-ends without preview support keep the default, which does
    /// nothing.
    async fn send_preview(
        &self,
        _target: &ConversationTarget,
        _text: &str,
    ) -> Result<(), DeliveryError> {
        Ok(())
    }
}
