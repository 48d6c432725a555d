//! The transcript: an ordered list of messages for one chat session.
//!
//! Exactly one message is ever mutable: the assistant tail of the in-flight
//! turn. Everything before it is append-only history.

use crate::protocol::{ChatMessage, ChatRole};

#[derive(Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    chat_id: Option<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// The server-assigned chat id, once known.
    pub fn chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref()
    }

    /// Adopt the server-assigned chat id. Messages created before the server
    /// answered have no `context_id` yet; backfill every one of them, not
    /// just the tail.
    pub fn adopt_chat_id(&mut self, id: &str) {
        self.chat_id = Some(id.to_string());
        for msg in self.messages.iter_mut().filter(|m| m.context_id.is_none()) {
            msg.context_id = Some(id.to_string());
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut ChatMessage> {
        self.messages.last_mut()
    }

    pub fn last_assistant_mut(&mut self) -> Option<&mut ChatMessage> {
        self.messages
            .iter_mut()
            .rev()
            .find(|m| m.role == ChatRole::Assistant)
    }

    pub fn get(&self, index: usize) -> Option<&ChatMessage> {
        self.messages.get(index)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.chat_id = None;
    }
}
