//! Peer media transport: the collaborator the call controller drives.
//!
//! `initiate` starts negotiation and returns a handle immediately; the
//! outcome arrives later as a `PeerEvent`. Negotiation itself (SDP, ICE,
//! media streams) lives behind the trait.

pub mod devices;
pub mod simulated;

use std::fmt;

use crate::models::{MediaFlags, ParticipantId};

/// Identifies one peer connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PeerError {
    #[error("peer {0} unreachable")]
    Unreachable(ParticipantId),
    #[error("negotiation timed out")]
    Timeout,
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("peer transport closed")]
    Closed,
}

/// Asynchronous outcome of a connection attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Remote side accepted; media is flowing.
    RemoteStream { handle: ConnectionHandle },
    Failure {
        handle: ConnectionHandle,
        error: PeerError,
    },
}

impl PeerEvent {
    pub fn handle(&self) -> ConnectionHandle {
        match self {
            Self::RemoteStream { handle } | Self::Failure { handle, .. } => *handle,
        }
    }
}

pub trait PeerTransport: Send {
    /// Start negotiating with `peer`. Must not block.
    fn initiate(
        &mut self,
        peer: &ParticipantId,
        media: MediaFlags,
    ) -> Result<ConnectionHandle, PeerError>;

    /// Push new local media flags to an existing connection.
    fn renegotiate(&mut self, handle: ConnectionHandle, media: MediaFlags);

    /// Close a connection in any state. Unknown handles are ignored.
    fn teardown(&mut self, handle: ConnectionHandle);
}
