//! Async driver: bridges a UI loop with an `OfficeSession`.
//!
//! Uses an mpsc channel pair. The UI sends `SessionCommand` values, and a
//! background tokio task applies them together with channel frames, peer
//! outcomes and timers, and sends `SessionEvent` values back.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::channel::{ChannelError, MessageStore, SharedChannel};
use crate::models::{ChatMessage, ChatScope, MediaFlags, Participant, Position, Status};
use crate::peer::PeerEvent;

use super::calls::CallState;
use super::events::SessionEvent;
use super::session::OfficeSession;

/// Commands sent from the UI to the session task.
pub enum SessionCommand {
    Move { x: f64, y: f64 },
    SetWebcam(bool),
    SetMic(bool),
    SetStatus(Status),
    Say { body: String, scope: ChatScope },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Leave,
}

/// One remote participant as the local user sees them.
#[derive(Debug, Clone)]
pub struct PeerView {
    pub participant: Participant,
    pub distance: f64,
    pub near: bool,
    pub call: CallState,
}

/// Point-in-time view for rendering.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub position: Position,
    pub zone: Option<String>,
    pub media: MediaFlags,
    pub status: Status,
    pub peers: Vec<PeerView>,
    pub visible_chat: Vec<ChatMessage>,
}

/// Handle for interacting with a running session.
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    event_rx: mpsc::UnboundedReceiver<SessionEvent>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Spawn the session task.
    pub fn start(
        session: OfficeSession,
        channel: Arc<dyn SharedChannel>,
        peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(session_loop(session, channel, peer_events, cmd_rx, event_tx));

        Self {
            cmd_tx,
            event_rx,
            task,
        }
    }

    /// Send a command (non-blocking).
    pub fn send(&self, cmd: SessionCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::error!("Session task gone -- command dropped");
        }
    }

    /// Next event. `None` once the session has ended and the queue is drained.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.event_rx.recv().await
    }

    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(tx));
        rx.await.ok()
    }

    /// Leave the office and wait for the task to finish. Events emitted
    /// during the leave are returned.
    pub async fn leave(mut self) -> Vec<SessionEvent> {
        self.send(SessionCommand::Leave);
        if let Err(e) = (&mut self.task).await {
            tracing::error!("Session task failed: {}", e);
        }
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

async fn session_loop(
    mut session: OfficeSession,
    channel: Arc<dyn SharedChannel>,
    mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    let emit = |events: Vec<SessionEvent>| {
        for event in events {
            let _ = event_tx.send(event);
        }
    };

    let settings = *session.settings();
    let mut subscription = channel.subscribe();
    let mut channel_open = true;
    let mut peers_open = true;
    let mut epoch = channel.epoch();

    let mut cadence = time::interval(settings.publish_interval);
    cadence.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sweep = time::interval(settings.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
    sweep.tick().await;

    tracing::info!("Joined as {} at {}", session.local_id(), session.position());
    emit(session.join());
    publish(&mut session, channel.as_ref(), Instant::now());

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                let now = Instant::now();
                match cmd {
                    SessionCommand::Move { x, y } => match session.move_to(x, y, now) {
                        Ok(events) => emit(events),
                        Err(e) => emit(vec![SessionEvent::Notice(e.to_string())]),
                    },
                    SessionCommand::SetWebcam(on) => {
                        let wanted = MediaFlags { webcam_on: on, ..session.media() };
                        emit(session.set_media(wanted, now));
                    }
                    SessionCommand::SetMic(on) => {
                        let wanted = MediaFlags { mic_on: on, ..session.media() };
                        emit(session.set_media(wanted, now));
                    }
                    SessionCommand::SetStatus(status) => session.set_status(status),
                    SessionCommand::Say { body, scope } => {
                        let message = session.say(body, scope);
                        match channel.send(message.clone()) {
                            Ok(()) => emit(vec![SessionEvent::Chat(message)]),
                            Err(e) => {
                                tracing::warn!("Failed to send message: {}", e);
                                emit(vec![SessionEvent::Notice(format!("message not sent: {}", e))]);
                            }
                        }
                    }
                    SessionCommand::Snapshot(reply) => {
                        let _ = reply.send(snapshot(&session));
                    }
                    SessionCommand::Leave => break,
                }
                publish(&mut session, channel.as_ref(), now);
            }
            frame = subscription.recv(), if channel_open => {
                match frame {
                    Some(frame) => emit(session.apply_frame(frame, Instant::now())),
                    None => {
                        tracing::warn!("Shared channel closed; continuing locally");
                        emit(vec![SessionEvent::Notice("connection to the office lost".into())]);
                        channel_open = false;
                    }
                }
            }
            event = peer_events.recv(), if peers_open => {
                match event {
                    Some(event) => emit(session.on_peer_event(event, Instant::now())),
                    None => peers_open = false,
                }
            }
            _ = cadence.tick() => {
                let now = Instant::now();
                if channel.epoch() != epoch {
                    epoch = channel.epoch();
                    tracing::info!("Shared channel reconnected; republishing presence");
                    emit(vec![SessionEvent::Notice("reconnected to the office".into())]);
                    session.republish();
                }
                publish(&mut session, channel.as_ref(), now);
                emit(session.reevaluate_calls(now));
            }
            _ = sweep.tick() => {
                emit(session.sweep(Instant::now()));
            }
        }
    }

    // Calls and publishing stop before devices are released; the leave
    // frame goes out last.
    emit(session.leave(Instant::now()));
    if let Err(e) = channel.leave(session.local_id()) {
        tracing::warn!("Failed to announce leave: {}", e);
    }
    tracing::info!("Left the office");
}

fn publish(session: &mut OfficeSession, channel: &dyn SharedChannel, now: Instant) {
    let Some(patch) = session.poll_publish(now) else {
        return;
    };
    match channel.publish(session.local_id(), patch) {
        Ok(()) => {}
        Err(ChannelError::Disconnected) => {
            tracing::debug!("Presence publish deferred until the channel is back");
            session.publish_failed();
        }
        Err(e) => {
            tracing::warn!("Presence publish failed, will retry: {}", e);
            session.publish_failed();
        }
    }
}

fn snapshot(session: &OfficeSession) -> SessionSnapshot {
    let here = session.position();
    let peers = session
        .participants()
        .into_iter()
        .map(|participant| PeerView {
            distance: here.distance_to(participant.position),
            near: session.near_set().contains(&participant.id),
            call: session.call_state(&participant.id),
            participant,
        })
        .collect();

    SessionSnapshot {
        position: here,
        zone: session.zone().map(|z| z.name.clone()),
        media: session.media(),
        status: session.status(),
        peers,
        visible_chat: session.visible_messages(),
    }
}
