//! Participant Registry: remote participant state materialized from the
//! shared channel.
//!
//! Updates are last-write-wins per participant key. Records without a
//! recent update are dropped by `sweep`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::models::{Participant, ParticipantId, PresencePatch};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("update for the local participant ignored")]
    LocalEcho,
    #[error("empty participant id")]
    EmptyId,
    #[error("unknown participant {0} (patch carries no position)")]
    UnknownParticipant(ParticipantId),
    #[error("non-finite position for {0}")]
    InvalidPosition(ParticipantId),
}

/// What an accepted update did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    Joined,
    Moved,
    /// Non-positional fields only (or an identical position).
    Updated,
}

pub struct ParticipantRegistry {
    local_id: ParticipantId,
    participants: HashMap<ParticipantId, Participant>,
}

impl ParticipantRegistry {
    pub fn new(local_id: ParticipantId) -> Self {
        Self {
            local_id,
            participants: HashMap::new(),
        }
    }

    /// Merge a remote patch, creating the record if new.
    ///
    /// A new record needs a position; partial patches for unknown ids are
    /// dropped. Any rejected update leaves the registry unchanged.
    pub fn apply_update(
        &mut self,
        id: &ParticipantId,
        patch: &PresencePatch,
        now: Instant,
    ) -> Result<RegistryChange, RegistryError> {
        if id.is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if *id == self.local_id {
            return Err(RegistryError::LocalEcho);
        }
        if patch.position.is_some_and(|p| !p.is_finite()) {
            return Err(RegistryError::InvalidPosition(id.clone()));
        }

        if let Some(existing) = self.participants.get_mut(id) {
            let moved = existing.apply(patch, now);
            return Ok(if moved {
                RegistryChange::Moved
            } else {
                RegistryChange::Updated
            });
        }

        let position = patch
            .position
            .ok_or_else(|| RegistryError::UnknownParticipant(id.clone()))?;
        let mut participant = Participant::new(id.clone(), position, now);
        participant.apply(patch, now);
        tracing::debug!("Participant {} joined at {}", id, position);
        self.participants.insert(id.clone(), participant);
        Ok(RegistryChange::Joined)
    }

    /// Explicit leave signal.
    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        self.participants.remove(id)
    }

    /// Drop every participant not heard from within `stale_after`.
    ///
    /// Returned ids are sorted for deterministic event order.
    pub fn sweep(&mut self, now: Instant, stale_after: Duration) -> Vec<ParticipantId> {
        let mut stale: Vec<ParticipantId> = self
            .participants
            .values()
            .filter(|p| now.saturating_duration_since(p.last_seen) > stale_after)
            .map(|p| p.id.clone())
            .collect();
        stale.sort();

        for id in &stale {
            tracing::info!("Participant {} timed out", id);
            self.participants.remove(id);
        }
        stale
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Read-only view of all remote participants.
    pub fn snapshot(&self) -> &HashMap<ParticipantId, Participant> {
        &self.participants
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn clear(&mut self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self.participants.drain().map(|(id, _)| id).collect();
        ids.sort();
        ids
    }
}
