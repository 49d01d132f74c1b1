//! JSON frames exchanged over the shared channel.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, ParticipantId, PresencePatch};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireFrame {
    /// Participant state, written only by its owner.
    Presence {
        #[serde(rename = "participantId")]
        participant_id: ParticipantId,
        patch: PresencePatch,
    },
    /// Explicit (or relay-synthesized) departure.
    Leave {
        #[serde(rename = "participantId")]
        participant_id: ParticipantId,
    },
    Chat { message: ChatMessage },
}

impl WireFrame {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Merge `patch` onto `base`, newer fields winning.
pub fn merge_patch(base: &mut PresencePatch, patch: &PresencePatch) {
    if patch.display_name.is_some() {
        base.display_name.clone_from(&patch.display_name);
    }
    if patch.position.is_some() {
        base.position = patch.position;
    }
    if patch.avatar.is_some() {
        base.avatar = patch.avatar;
    }
    if patch.media.is_some() {
        base.media = patch.media;
    }
    if patch.status.is_some() {
        base.status = patch.status;
    }
    base.timestamp = base.timestamp.max(patch.timestamp);
}

/// Latest merged state per participant, replayed to late subscribers so
/// they see participants who are standing still.
#[derive(Debug, Default)]
pub struct PresenceSnapshot {
    entries: HashMap<ParticipantId, PresencePatch>,
}

impl PresenceSnapshot {
    /// Track a frame passing through. Returns the participant a presence
    /// frame belongs to.
    pub fn observe(&mut self, frame: &WireFrame) -> Option<ParticipantId> {
        match frame {
            WireFrame::Presence {
                participant_id,
                patch,
            } => {
                merge_patch(self.entries.entry(participant_id.clone()).or_default(), patch);
                Some(participant_id.clone())
            }
            WireFrame::Leave { participant_id } => {
                self.entries.remove(participant_id);
                None
            }
            WireFrame::Chat { .. } => None,
        }
    }

    pub fn remove(&mut self, id: &ParticipantId) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn frames(&self) -> Vec<WireFrame> {
        let mut frames: Vec<WireFrame> = self
            .entries
            .iter()
            .map(|(id, patch)| WireFrame::Presence {
                participant_id: id.clone(),
                patch: patch.clone(),
            })
            .collect();
        frames.sort_by(|a, b| frame_key(a).cmp(frame_key(b)));
        frames
    }
}

fn frame_key(frame: &WireFrame) -> &str {
    match frame {
        WireFrame::Presence { participant_id, .. } | WireFrame::Leave { participant_id } => {
            participant_id.as_str()
        }
        WireFrame::Chat { message } => message.id.as_str(),
    }
}
