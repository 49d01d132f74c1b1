//! WebSocket relay: the shared channel server.
//!
//! Fans every frame out to all other connections and keeps the latest
//! presence per participant so late joiners see everyone. A connection may
//! only write its own participant key. When a socket drops without a
//! leave frame, the relay broadcasts one on its behalf, unless another
//! socket is still bound to the same participant.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::models::ParticipantId;

use super::frame::PresenceSnapshot;
use super::WireFrame;

struct Conn {
    tx: mpsc::UnboundedSender<Message>,
    participant: Option<ParticipantId>,
}

#[derive(Default)]
struct RelayState {
    next_id: u64,
    conns: HashMap<u64, Conn>,
    snapshot: PresenceSnapshot,
}

#[derive(Clone, Default)]
struct SharedState(Arc<Mutex<RelayState>>);

impl SharedState {
    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct Relay {
    listener: TcpListener,
    state: SharedState,
}

impl Relay {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind relay on {}", addr))?;
        Ok(Self {
            listener,
            state: SharedState::default(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read relay address")
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Relay listening on {}", self.local_addr()?);
        loop {
            let (tcp, peer) = self
                .listener
                .accept()
                .await
                .context("Failed to accept connection")?;
            tokio::spawn(handle_conn(self.state.clone(), tcp, peer));
        }
    }
}

async fn handle_conn(state: SharedState, tcp: TcpStream, peer: SocketAddr) {
    let ws = match tokio_tungstenite::accept_async(tcp).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let conn_id = {
        let mut s = state.lock();
        let id = s.next_id;
        s.next_id += 1;
        for frame in s.snapshot.frames() {
            if let Ok(text) = frame.encode() {
                let _ = tx.send(Message::Text(text));
            }
        }
        s.conns.insert(
            id,
            Conn {
                tx,
                participant: None,
            },
        );
        id
    };
    tracing::info!("Connection {} from {}", conn_id, peer);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match WireFrame::decode(&text) {
                Ok(frame) => relay_frame(&state, conn_id, frame),
                Err(e) => tracing::warn!("Connection {}: bad frame: {}", conn_id, e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("Connection {} read error: {}", conn_id, e);
                break;
            }
        }
    }

    let synthesized = {
        let mut s = state.lock();
        match s.conns.remove(&conn_id).and_then(|conn| conn.participant) {
            // A reconnect already bound a newer socket to this participant.
            Some(pid) if s.conns.values().any(|c| c.participant.as_ref() == Some(&pid)) => {
                tracing::info!("Connection {} closed; {} is still connected", conn_id, pid);
                None
            }
            Some(pid) if s.snapshot.remove(&pid) => Some(WireFrame::Leave {
                participant_id: pid,
            }),
            _ => None,
        }
    };
    if let Some(frame) = synthesized {
        tracing::info!("Connection {} dropped without leave; broadcasting one", conn_id);
        broadcast(&mut state.lock(), None, &frame);
    }
    tracing::info!("Connection {} closed", conn_id);
    writer.abort();
}

fn relay_frame(state: &SharedState, from: u64, frame: WireFrame) {
    let mut s = state.lock();
    let owner = match &frame {
        WireFrame::Presence { participant_id, .. } | WireFrame::Leave { participant_id } => {
            participant_id.clone()
        }
        WireFrame::Chat { message } => message.sender_id.clone(),
    };

    let Some(conn) = s.conns.get_mut(&from) else {
        return;
    };
    match conn.participant {
        None => conn.participant = Some(owner),
        Some(ref bound) if *bound != owner => {
            tracing::warn!(
                "Connection {} (bound to {}) tried to write as {}; dropped",
                from,
                bound,
                owner
            );
            return;
        }
        Some(_) => {}
    }

    s.snapshot.observe(&frame);
    broadcast(&mut s, Some(from), &frame);
}

fn broadcast(s: &mut RelayState, except: Option<u64>, frame: &WireFrame) {
    let text = match frame.encode() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to encode frame: {}", e);
            return;
        }
    };
    for (id, conn) in &s.conns {
        if Some(*id) != except {
            let _ = conn.tx.send(Message::Text(text.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::channel::websocket::WsChannel;
    use crate::channel::{SharedChannel, Subscription};
    use crate::config::SessionConfig;
    use crate::models::{AvatarId, Position, PresencePatch};
    use crate::office::events::PresenceEvent;
    use crate::office::zones::ZoneLayout;
    use crate::office::{Identity, OfficeSession, SessionEvent, SessionHandle};
    use crate::peer::devices::SimulatedDevices;
    use crate::peer::simulated::SimulatedTransport;

    async fn next(sub: &mut Subscription) -> WireFrame {
        tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("subscription closed")
    }

    async fn start_relay() -> String {
        let relay = Relay::bind("127.0.0.1:0").await.unwrap();
        let addr = relay.local_addr().unwrap();
        tokio::spawn(relay.run());
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_relay_fans_out_and_synthesizes_leave() {
        let url = start_relay().await;
        let a = WsChannel::connect(&url).await.unwrap();
        let b = WsChannel::connect(&url).await.unwrap();
        let mut sub_b = b.subscribe();

        a.publish(&"a".into(), PresencePatch::position(Position::new(7.0, 8.0)))
            .unwrap();
        match next(&mut sub_b).await {
            WireFrame::Presence {
                participant_id,
                patch,
            } => {
                assert_eq!(participant_id.as_str(), "a");
                assert_eq!(patch.position, Some(Position::new(7.0, 8.0)));
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        drop(a);
        match next(&mut sub_b).await {
            WireFrame::Leave { participant_id } => assert_eq!(participant_id.as_str(), "a"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_late_joiner_receives_snapshot() {
        let url = start_relay().await;
        let mut a = WsChannel::connect(&url).await.unwrap();
        let mut sub_a = a.subscribe();
        a.publish(&"a".into(), PresencePatch::position(Position::new(1.0, 1.0)))
            .unwrap();

        // Round-trip through a second client so the relay has seen a's frame.
        let probe = WsChannel::connect(&url).await.unwrap();
        let mut sub_probe = probe.subscribe();
        assert!(matches!(next(&mut sub_probe).await, WireFrame::Presence { .. }));

        let c = WsChannel::connect(&url).await.unwrap();
        let mut sub_c = c.subscribe();
        match next(&mut sub_c).await {
            WireFrame::Presence { participant_id, .. } => {
                assert_eq!(participant_id.as_str(), "a")
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        // a never sees its own frames.
        a.close().await;
        assert!(sub_a.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_connection_cannot_write_other_key() {
        let url = start_relay().await;
        let a = WsChannel::connect(&url).await.unwrap();
        let b = WsChannel::connect(&url).await.unwrap();
        let mut sub_b = b.subscribe();

        a.publish(&"a".into(), PresencePatch::position(Position::default()))
            .unwrap();
        a.publish(&"mallory".into(), PresencePatch::position(Position::default()))
            .unwrap();
        a.leave(&"a".into()).unwrap();

        assert!(matches!(next(&mut sub_b).await, WireFrame::Presence { .. }));
        match next(&mut sub_b).await {
            WireFrame::Leave { participant_id } => assert_eq!(participant_id.as_str(), "a"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_second_socket_keeps_participant_alive() {
        let url = start_relay().await;
        let first = WsChannel::connect(&url).await.unwrap();
        let second = WsChannel::connect(&url).await.unwrap();
        let b = WsChannel::connect(&url).await.unwrap();
        let mut sub_b = b.subscribe();

        first
            .publish(&"a".into(), PresencePatch::position(Position::new(7.0, 8.0)))
            .unwrap();
        assert!(matches!(next(&mut sub_b).await, WireFrame::Presence { .. }));
        second
            .publish(&"a".into(), PresencePatch::position(Position::new(9.0, 9.0)))
            .unwrap();
        assert!(matches!(next(&mut sub_b).await, WireFrame::Presence { .. }));

        drop(first);
        tokio::time::sleep(Duration::from_millis(200)).await;
        second
            .publish(&"a".into(), PresencePatch::position(Position::new(1.0, 1.0)))
            .unwrap();
        match next(&mut sub_b).await {
            WireFrame::Presence { patch, .. } => {
                assert_eq!(patch.position, Some(Position::new(1.0, 1.0)))
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_reappears_after_relay_restart() {
        // Stands in for a relay that accepts one client and then dies.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("ws://{}", addr);
        let doomed = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(ws);
        });

        let channel = Arc::new(WsChannel::connect(&url).await.unwrap());
        let (transport, peer_rx) = SimulatedTransport::new();
        let session = OfficeSession::new(
            Identity {
                id: "a".into(),
                display_name: "A".into(),
                avatar: AvatarId::default(),
            },
            Position::new(0.0, 0.0),
            SessionConfig::default().settings().unwrap(),
            ZoneLayout::default_office(),
            Box::new(transport),
            Box::new(SimulatedDevices::new()),
        )
        .unwrap();
        let mut handle = SessionHandle::start(session, channel.clone(), peer_rx);
        doomed.await.unwrap();

        let relay = Relay::bind(&addr.to_string()).await.unwrap();
        tokio::spawn(relay.run());

        let b = WsChannel::connect(&url).await.unwrap();
        let mut sub_b = b.subscribe();
        match next(&mut sub_b).await {
            WireFrame::Presence { participant_id, .. } => assert_eq!(participant_id.as_str(), "a"),
            other => panic!("unexpected frame: {:?}", other),
        }
        assert_eq!(channel.epoch(), 1);

        // The session's subscription survived the outage.
        b.publish(&"b".into(), PresencePatch::position(Position::new(600.0, 400.0)))
            .unwrap();
        let joined = SessionEvent::Presence(PresenceEvent::Joined("b".into()));
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = handle.recv().await {
                if event == joined {
                    return;
                }
            }
            panic!("session ended");
        })
        .await
        .expect("timed out waiting for b");
    }
}
