//! In-process channel hub: every endpoint sees every other endpoint's
//! frames. Backs `join --offline` and the session tests.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::models::ParticipantId;

use super::frame::PresenceSnapshot;
use super::{ChannelError, SharedChannel, Subscription, WireFrame};

struct Subscriber {
    owner: ParticipantId,
    tx: mpsc::UnboundedSender<WireFrame>,
}

#[derive(Default)]
struct HubInner {
    subscribers: Vec<Subscriber>,
    snapshot: PresenceSnapshot,
    offline: bool,
    epoch: u64,
}

#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn endpoint(&self, owner: ParticipantId) -> MemoryEndpoint {
        MemoryEndpoint {
            hub: self.clone(),
            owner,
        }
    }

    /// Simulate a transport outage: sends fail until set back.
    #[cfg(test)]
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Forget all presence, as a restarted relay would, and tell every
    /// endpoint it has reconnected.
    #[cfg(test)]
    pub fn restart(&self) {
        let mut inner = self.lock();
        inner.snapshot = PresenceSnapshot::default();
        inner.epoch += 1;
    }

    /// Drop an endpoint's subscriptions without a leave frame, as an
    /// ungraceful disconnect would.
    #[cfg(test)]
    pub fn disconnect(&self, owner: &ParticipantId) {
        self.lock().subscribers.retain(|s| s.owner != *owner);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct MemoryEndpoint {
    hub: MemoryHub,
    owner: ParticipantId,
}

impl SharedChannel for MemoryEndpoint {
    fn send_frame(&self, frame: WireFrame) -> Result<(), ChannelError> {
        let mut inner = self.hub.lock();
        if inner.offline {
            return Err(ChannelError::Disconnected);
        }
        inner.snapshot.observe(&frame);
        inner
            .subscribers
            .retain(|s| s.owner == self.owner || s.tx.send(frame.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.hub.lock();
        for frame in inner.snapshot.frames() {
            if matches!(&frame, WireFrame::Presence { participant_id, .. } if *participant_id == self.owner)
            {
                continue;
            }
            let _ = tx.send(frame);
        }
        inner.subscribers.push(Subscriber {
            owner: self.owner.clone(),
            tx,
        });
        Subscription::new(rx)
    }

    fn epoch(&self) -> u64 {
        self.hub.lock().epoch
    }
}
