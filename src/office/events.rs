//! Typed events emitted by the office components.
//!
//! Each component emits only its own event type; `SessionEvent` is the
//! union handed to the UI layer.

use std::fmt;

use crate::models::{ChatMessage, ParticipantId};

/// Proximity Engine transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProximityEvent {
    Enter(ParticipantId),
    Exit(ParticipantId),
}

/// Zone Tracker transitions. Exit always precedes enter within one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneEvent {
    Exit(String),
    Enter(String),
}

/// Call Fan-out Controller transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Connecting(ParticipantId),
    Connected(ParticipantId),
    /// Link torn down (exit, stale, media off or leave).
    Disconnected(ParticipantId),
    /// Negotiation failed; the link is back to `none` and eligible for retry.
    Failed { peer: ParticipantId, reason: String },
}

/// Registry membership changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Joined(ParticipantId),
    Left(ParticipantId),
    /// Removed by the staleness sweep.
    TimedOut(ParticipantId),
}

/// Everything the session reports to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Presence(PresenceEvent),
    Proximity(ProximityEvent),
    Zone(ZoneEvent),
    Call(CallEvent),
    Chat(ChatMessage),
    /// Non-fatal, user-visible notice (e.g. camera permission denied).
    Notice(String),
}

impl From<PresenceEvent> for SessionEvent {
    fn from(e: PresenceEvent) -> Self {
        Self::Presence(e)
    }
}

impl From<ProximityEvent> for SessionEvent {
    fn from(e: ProximityEvent) -> Self {
        Self::Proximity(e)
    }
}

impl From<ZoneEvent> for SessionEvent {
    fn from(e: ZoneEvent) -> Self {
        Self::Zone(e)
    }
}

impl From<CallEvent> for SessionEvent {
    fn from(e: CallEvent) -> Self {
        Self::Call(e)
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Presence(PresenceEvent::Joined(id)) => write!(f, "[JOIN] {}", id),
            Self::Presence(PresenceEvent::Left(id)) => write!(f, "[LEAVE] {}", id),
            Self::Presence(PresenceEvent::TimedOut(id)) => write!(f, "[STALE] {}", id),
            Self::Proximity(ProximityEvent::Enter(id)) => write!(f, "[NEAR] {}", id),
            Self::Proximity(ProximityEvent::Exit(id)) => write!(f, "[FAR] {}", id),
            Self::Zone(ZoneEvent::Enter(zone)) => write!(f, "[ZONE+] {}", zone),
            Self::Zone(ZoneEvent::Exit(zone)) => write!(f, "[ZONE-] {}", zone),
            Self::Call(CallEvent::Connecting(id)) => write!(f, "[CALL] connecting {}", id),
            Self::Call(CallEvent::Connected(id)) => write!(f, "[CALL] connected {}", id),
            Self::Call(CallEvent::Disconnected(id)) => write!(f, "[CALL] hung up {}", id),
            Self::Call(CallEvent::Failed { peer, reason }) => {
                write!(f, "[CALL] failed {}: {}", peer, reason)
            }
            Self::Chat(msg) => write!(f, "[CHAT] <{}> {}", msg.sender_id, msg.body),
            Self::Notice(text) => write!(f, "[NOTICE] {}", text),
        }
    }
}
