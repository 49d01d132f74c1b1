//! Call Fan-out Controller: keeps peer media links congruent with the
//! proximity set and the local media toggles.
//!
//! Per peer: `none -> connecting -> connected`. Any failure or exit
//! returns the peer to `none`. Failures are remembered only for
//! `retry_interval`, which gates re-attempts so a flapping peer is not
//! re-offered on every update.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use crate::models::{MediaFlags, ParticipantId};
use crate::peer::{ConnectionHandle, PeerError, PeerEvent, PeerTransport};

use super::events::CallEvent;

/// Externally visible link state for one remote participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    None,
    Connecting,
    Connected,
}

enum Link {
    Connecting {
        handle: ConnectionHandle,
        started: Instant,
    },
    Connected {
        handle: ConnectionHandle,
    },
}

impl Link {
    fn handle(&self) -> ConnectionHandle {
        match self {
            Self::Connecting { handle, .. } | Self::Connected { handle } => *handle,
        }
    }
}

pub struct CallController {
    transport: Box<dyn PeerTransport>,
    media: MediaFlags,
    links: HashMap<ParticipantId, Link>,
    failed_at: HashMap<ParticipantId, Instant>,
    retry_interval: Duration,
    negotiation_timeout: Duration,
}

impl CallController {
    pub fn new(
        transport: Box<dyn PeerTransport>,
        retry_interval: Duration,
        negotiation_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            media: MediaFlags::OFF,
            links: HashMap::new(),
            failed_at: HashMap::new(),
            retry_interval,
            negotiation_timeout,
        }
    }

    pub fn media(&self) -> MediaFlags {
        self.media
    }

    pub fn state(&self, peer: &ParticipantId) -> CallState {
        match self.links.get(peer) {
            None => CallState::None,
            Some(Link::Connecting { .. }) => CallState::Connecting,
            Some(Link::Connected { .. }) => CallState::Connected,
        }
    }

    /// Peers with a link in any state, sorted.
    #[cfg(test)]
    pub fn linked_peers(&self) -> Vec<ParticipantId> {
        let mut peers: Vec<ParticipantId> = self.links.keys().cloned().collect();
        peers.sort();
        peers
    }

    pub fn on_proximity_enter(&mut self, peer: &ParticipantId, now: Instant) -> Vec<CallEvent> {
        self.try_connect(peer, now).into_iter().collect()
    }

    pub fn on_proximity_exit(&mut self, peer: &ParticipantId) -> Vec<CallEvent> {
        self.disconnect(peer).into_iter().collect()
    }

    /// Apply a local media toggle.
    ///
    /// off -> on offers to every near peer without a link; on -> off tears
    /// down every link (the proximity set itself is untouched); a change
    /// while staying on renegotiates live links.
    pub fn set_media(
        &mut self,
        media: MediaFlags,
        near: &BTreeSet<ParticipantId>,
        now: Instant,
    ) -> Vec<CallEvent> {
        let previous = self.media;
        self.media = media;

        match (previous.any(), media.any()) {
            (true, false) => self.teardown_all(),
            (false, true) => self.connect_missing(near, now),
            (true, true) if previous != media => {
                for link in self.links.values() {
                    self.transport.renegotiate(link.handle(), media);
                }
                self.connect_missing(near, now)
            }
            _ => Vec::new(),
        }
    }

    /// Resolve a connection attempt reported by the transport.
    pub fn on_peer_event(&mut self, event: PeerEvent, now: Instant) -> Vec<CallEvent> {
        let handle = event.handle();
        let Some(peer) = self
            .links
            .iter()
            .find(|(_, link)| link.handle() == handle)
            .map(|(peer, _)| peer.clone())
        else {
            tracing::debug!("Ignoring event for stale {}", handle);
            return Vec::new();
        };

        match event {
            PeerEvent::RemoteStream { .. } => match self.links.get(&peer) {
                Some(Link::Connecting { .. }) => {
                    self.links.insert(peer.clone(), Link::Connected { handle });
                    tracing::info!("Call with {} connected", peer);
                    vec![CallEvent::Connected(peer)]
                }
                _ => Vec::new(),
            },
            PeerEvent::Failure { error, .. } => vec![self.fail(&peer, error, now)],
        }
    }

    /// Periodic pass, run at the publish cadence or slower.
    ///
    /// Expires stuck negotiations, drops links to peers no longer near,
    /// and retries near peers whose failure has aged past the retry
    /// interval.
    pub fn reevaluate(&mut self, near: &BTreeSet<ParticipantId>, now: Instant) -> Vec<CallEvent> {
        let mut events = Vec::new();

        let mut timed_out: Vec<ParticipantId> = self
            .links
            .iter()
            .filter(|(_, link)| match link {
                Link::Connecting { started, .. } => {
                    now.saturating_duration_since(*started) >= self.negotiation_timeout
                }
                Link::Connected { .. } => false,
            })
            .map(|(peer, _)| peer.clone())
            .collect();
        timed_out.sort();
        for peer in timed_out {
            events.push(self.fail(&peer, PeerError::Timeout, now));
        }

        let mut strays: Vec<ParticipantId> = self
            .links
            .keys()
            .filter(|peer| !near.contains(*peer))
            .cloned()
            .collect();
        strays.sort();
        for peer in strays {
            events.extend(self.disconnect(&peer));
        }

        let retry_interval = self.retry_interval;
        self.failed_at
            .retain(|_, at| now.saturating_duration_since(*at) < retry_interval);

        events.extend(self.connect_missing(near, now));
        events
    }

    /// Tear down every link (media off or session leave).
    pub fn teardown_all(&mut self) -> Vec<CallEvent> {
        let mut peers: Vec<ParticipantId> = self.links.keys().cloned().collect();
        peers.sort();
        peers
            .iter()
            .filter_map(|peer| self.disconnect(peer))
            .collect()
    }

    fn connect_missing(&mut self, near: &BTreeSet<ParticipantId>, now: Instant) -> Vec<CallEvent> {
        near.iter()
            .filter_map(|peer| self.try_connect(peer, now))
            .collect()
    }

    fn try_connect(&mut self, peer: &ParticipantId, now: Instant) -> Option<CallEvent> {
        if !self.media.any() || self.links.contains_key(peer) {
            return None;
        }
        if let Some(at) = self.failed_at.get(peer) {
            if now.saturating_duration_since(*at) < self.retry_interval {
                return None;
            }
        }

        match self.transport.initiate(peer, self.media) {
            Ok(handle) => {
                tracing::info!("Calling {} ({})", peer, handle);
                self.failed_at.remove(peer);
                self.links.insert(
                    peer.clone(),
                    Link::Connecting {
                        handle,
                        started: now,
                    },
                );
                Some(CallEvent::Connecting(peer.clone()))
            }
            Err(e) => {
                tracing::warn!("Could not call {}: {}", peer, e);
                self.failed_at.insert(peer.clone(), now);
                Some(CallEvent::Failed {
                    peer: peer.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn disconnect(&mut self, peer: &ParticipantId) -> Option<CallEvent> {
        let link = self.links.remove(peer)?;
        self.transport.teardown(link.handle());
        tracing::info!("Hung up on {}", peer);
        Some(CallEvent::Disconnected(peer.clone()))
    }

    fn fail(&mut self, peer: &ParticipantId, error: PeerError, now: Instant) -> CallEvent {
        if let Some(link) = self.links.remove(peer) {
            self.transport.teardown(link.handle());
        }
        tracing::warn!("Call with {} failed: {}", peer, error);
        self.failed_at.insert(peer.clone(), now);
        CallEvent::Failed {
            peer: peer.clone(),
            reason: error.to_string(),
        }
    }
}
