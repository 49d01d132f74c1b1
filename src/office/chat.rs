//! Chat Scope Router: which messages the local reader can see.
//!
//! Visibility is evaluated at display time against the current proximity
//! set, so a proximity message disappears once its sender walks away.
//! Storage is never touched.

use std::collections::{BTreeSet, HashSet};

use crate::models::{ChatMessage, ChatScope, ParticipantId};

/// Room messages are always visible; proximity messages only from the
/// reader themself or from a sender currently in range.
pub fn is_visible(
    message: &ChatMessage,
    near: &BTreeSet<ParticipantId>,
    local_id: &ParticipantId,
) -> bool {
    match message.scope {
        ChatScope::Room => true,
        ChatScope::Proximity => message.sender_id == *local_id || near.contains(&message.sender_id),
    }
}

/// Append-only message log as received from the message store.
#[derive(Default)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    seen: HashSet<String>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false for a duplicate delivery.
    pub fn append(&mut self, message: ChatMessage) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        self.messages.push(message);
        true
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[cfg(test)]
    pub fn all(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn visible<'a>(
        &'a self,
        near: &'a BTreeSet<ParticipantId>,
        local_id: &'a ParticipantId,
    ) -> impl Iterator<Item = &'a ChatMessage> + 'a {
        self.messages
            .iter()
            .filter(move |m| is_visible(m, near, local_id))
    }
}
