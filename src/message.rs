//! Chat message data model

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque unique id
    pub id: String,
    /// Message author
    pub sender: Sender,
    /// Message text; a streaming bot reply grows in place
    pub text: String,
}

impl Message {
    /// Create a user message with a fresh id
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: Sender::User,
            text: text.into(),
        }
    }

    /// Create a bot message with a fresh id
    #[must_use]
    pub fn bot(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: Sender::Bot,
            text: text.into(),
        }
    }
}

/// Ordered chat transcript.
///
/// Append-only, with two exceptions: the trailing bot reply is mutated in
/// place while it streams, and a placeholder whose reply resolved to empty
/// text is removed.
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    /// Create an empty log
    #[must_use]
    pub const fn new() -> Self {
        Self { messages: Vec::new() }
    }

    /// Create a log from previously persisted messages
    #[must_use]
    pub const fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// All messages in order
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Append a message, returning its id
    pub fn push(&mut self, message: Message) -> String {
        let id = message.id.clone();
        self.messages.push(message);
        id
    }

    /// Replace the text of the message with the given id.
    ///
    /// Returns `false` if no such message exists.
    pub fn set_text(&mut self, id: &str, text: &str) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.text = text.to_string();
                true
            }
            None => false,
        }
    }

    /// Remove the message with the given id.
    ///
    /// Returns `false` if no such message exists.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        self.messages.len() != before
    }

    /// Whether the log holds no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }
}
