//! In-process peer transport used by `simulate`, `join` without real media,
//! and tests.
//!
//! Outcomes are delivered through an mpsc channel, the same way a real
//! transport would report them from its own tasks.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::models::{MediaFlags, ParticipantId};

use super::{ConnectionHandle, PeerError, PeerEvent, PeerTransport};

/// How a simulated peer responds to an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerBehavior {
    Accept,
    Unreachable,
    /// Answers, but refuses the offer.
    Reject,
    /// Never answers; only the negotiation timeout resolves it.
    Silent,
}

pub struct SimulatedTransport {
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    behaviors: HashMap<ParticipantId, PeerBehavior>,
    live: HashMap<ConnectionHandle, ParticipantId>,
    next_handle: u64,
}

impl SimulatedTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Self {
            events_tx,
            behaviors: HashMap::new(),
            live: HashMap::new(),
            next_handle: 1,
        };
        (transport, events_rx)
    }

    pub fn set_behavior(&mut self, peer: ParticipantId, behavior: PeerBehavior) {
        self.behaviors.insert(peer, behavior);
    }

    #[cfg(test)]
    pub fn live_connections(&self) -> usize {
        self.live.len()
    }
}

impl PeerTransport for SimulatedTransport {
    fn initiate(
        &mut self,
        peer: &ParticipantId,
        media: MediaFlags,
    ) -> Result<ConnectionHandle, PeerError> {
        let handle = ConnectionHandle(self.next_handle);
        self.next_handle += 1;

        let behavior = self
            .behaviors
            .get(peer)
            .copied()
            .unwrap_or(PeerBehavior::Accept);
        tracing::debug!("Offer {} to {} ({}) -> {:?}", handle, peer, media, behavior);

        let event = match behavior {
            PeerBehavior::Accept => Some(PeerEvent::RemoteStream { handle }),
            PeerBehavior::Unreachable => Some(PeerEvent::Failure {
                handle,
                error: PeerError::Unreachable(peer.clone()),
            }),
            PeerBehavior::Reject => Some(PeerEvent::Failure {
                handle,
                error: PeerError::Negotiation("offer rejected".into()),
            }),
            PeerBehavior::Silent => None,
        };
        if let Some(event) = event {
            self.events_tx.send(event).map_err(|_| PeerError::Closed)?;
        }

        self.live.insert(handle, peer.clone());
        Ok(handle)
    }

    fn renegotiate(&mut self, handle: ConnectionHandle, media: MediaFlags) {
        if let Some(peer) = self.live.get(&handle) {
            tracing::debug!("Renegotiate {} with {} ({})", handle, peer, media);
        }
    }

    fn teardown(&mut self, handle: ConnectionHandle) {
        if let Some(peer) = self.live.remove(&handle) {
            tracing::debug!("Teardown {} with {}", handle, peer);
        }
    }
}
