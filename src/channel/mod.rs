//! Shared real-time channel and message store.
//!
//! Every participant writes only its own presence key and reads everyone
//! else's, so no locking is needed across writers. Chat messages travel on
//! the same connection as a separate frame kind.

pub mod frame;
pub mod memory;
pub mod relay;
pub mod websocket;

use tokio::sync::mpsc;

use crate::models::{ChatMessage, ParticipantId, PresencePatch};

pub use frame::WireFrame;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("relay connection down; reconnecting")]
    Disconnected,
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid relay url {0}")]
    InvalidUrl(String),
}

/// Stream of frames from other participants.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<WireFrame>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<WireFrame>) -> Self {
        Self { rx }
    }

    /// Suspends until the next frame. `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<WireFrame> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<WireFrame> {
        self.rx.try_recv().ok()
    }
}

/// Presence broadcast: positions, media flags, status, leave.
pub trait SharedChannel: Send + Sync {
    /// Non-blocking; queues the frame for delivery.
    fn send_frame(&self, frame: WireFrame) -> Result<(), ChannelError>;

    fn subscribe(&self) -> Subscription;

    /// Bumped each time the transport comes back after an outage. Remote
    /// state may have been lost meanwhile, so publishers resend in full.
    fn epoch(&self) -> u64 {
        0
    }

    fn publish(&self, participant_id: &ParticipantId, patch: PresencePatch) -> Result<(), ChannelError> {
        self.send_frame(WireFrame::Presence {
            participant_id: participant_id.clone(),
            patch,
        })
    }

    fn leave(&self, participant_id: &ParticipantId) -> Result<(), ChannelError> {
        self.send_frame(WireFrame::Leave {
            participant_id: participant_id.clone(),
        })
    }
}

/// Append-only chat store. New messages arrive on the channel
/// subscription as `WireFrame::Chat`; scope filtering happens client-side.
pub trait MessageStore: Send + Sync {
    fn send(&self, message: ChatMessage) -> Result<(), ChannelError>;
}

impl<T: SharedChannel + ?Sized> MessageStore for T {
    fn send(&self, message: ChatMessage) -> Result<(), ChannelError> {
        self.send_frame(WireFrame::Chat { message })
    }
}
