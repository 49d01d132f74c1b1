//! Message-related models

use serde::{Deserialize, Serialize};

use super::ParticipantId;

/// Who a chat message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatScope {
    /// Only readers in range of the sender see it.
    Proximity,
    /// Everyone in the room sees it.
    Room,
}

/// Chat message. Created on send and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: ParticipantId,
    pub body: String,
    pub scope: ChatScope,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn new(sender_id: ParticipantId, body: impl Into<String>, scope: ChatScope) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id,
            body: body.into(),
            scope,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
