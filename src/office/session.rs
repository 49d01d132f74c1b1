//! Session-scoped context: one local participant and everything it owns.
//!
//! Each component is owned here and reached only through this type. The
//! Position Store owns the local coordinate, the Registry owns the remote
//! map, the Call Controller owns the links. All methods are synchronous
//! and take `now` explicitly; `runtime` drives them from timers and
//! channels.

use std::collections::BTreeSet;
use std::time::Instant;

use crate::channel::WireFrame;
use crate::config::SessionSettings;
use crate::models::{
    AvatarId, ChatMessage, ChatScope, MediaFlags, Participant, ParticipantId, Position,
    PresencePatch, Status, Zone,
};
use crate::peer::devices::{acquire_flags, release_flags, MediaDevices};
use crate::peer::{PeerEvent, PeerTransport};

use super::calls::{CallController, CallState};
use super::chat::{is_visible, ChatLog};
use super::events::{PresenceEvent, ProximityEvent, SessionEvent};
use super::position::{PositionError, PositionStore};
use super::proximity::ProximityEngine;
use super::registry::{ParticipantRegistry, RegistryChange, RegistryError};
use super::zones::{ZoneLayout, ZoneTracker};

/// Who the local participant is.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: ParticipantId,
    pub display_name: String,
    pub avatar: AvatarId,
}

pub struct OfficeSession {
    identity: Identity,
    status: Status,
    settings: SessionSettings,
    position: PositionStore,
    registry: ParticipantRegistry,
    proximity: ProximityEngine,
    zones: ZoneTracker,
    calls: CallController,
    chat: ChatLog,
    devices: Box<dyn MediaDevices>,
    left: bool,
}

impl OfficeSession {
    pub fn new(
        identity: Identity,
        start: Position,
        settings: SessionSettings,
        layout: ZoneLayout,
        transport: Box<dyn PeerTransport>,
        devices: Box<dyn MediaDevices>,
    ) -> Result<Self, PositionError> {
        if !start.is_finite() {
            return Err(PositionError::NonFinite {
                x: start.x,
                y: start.y,
            });
        }
        Ok(Self {
            position: PositionStore::new(
                start,
                settings.publish_interval,
                settings.heartbeat_interval,
            ),
            registry: ParticipantRegistry::new(identity.id.clone()),
            proximity: ProximityEngine::new(settings.proximity_radius),
            zones: ZoneTracker::new(layout),
            calls: CallController::new(
                transport,
                settings.retry_interval,
                settings.negotiation_timeout,
            ),
            chat: ChatLog::new(),
            devices,
            identity,
            status: Status::Online,
            settings,
            left: false,
        })
    }

    /// Attribute the starting coordinate to its zone.
    pub fn join(&mut self) -> Vec<SessionEvent> {
        self.zones
            .update(self.position.position())
            .into_iter()
            .map(SessionEvent::from)
            .collect()
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.identity.id
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn position(&self) -> Position {
        self.position.position()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn media(&self) -> MediaFlags {
        self.calls.media()
    }

    pub fn zone(&self) -> Option<&Zone> {
        self.zones.current()
    }

    pub fn near_set(&self) -> &BTreeSet<ParticipantId> {
        self.proximity.near_set()
    }

    #[cfg(test)]
    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn call_state(&self, peer: &ParticipantId) -> CallState {
        self.calls.state(peer)
    }

    #[cfg(test)]
    pub fn has_left(&self) -> bool {
        self.left
    }

    /// Local movement. Rendering state changes immediately; publication is
    /// throttled separately.
    pub fn move_to(&mut self, x: f64, y: f64, now: Instant) -> Result<Vec<SessionEvent>, PositionError> {
        if self.left || !self.position.set_position(x, y)? {
            return Ok(Vec::new());
        }

        let here = self.position.position();
        let mut events: Vec<SessionEvent> = self
            .zones
            .update(here)
            .into_iter()
            .map(SessionEvent::from)
            .collect();
        events.extend(self.recompute_proximity(now));
        Ok(events)
    }

    /// Apply one frame from the shared channel.
    pub fn apply_frame(&mut self, frame: WireFrame, now: Instant) -> Vec<SessionEvent> {
        if self.left {
            return Vec::new();
        }

        match frame {
            WireFrame::Presence {
                participant_id,
                patch,
            } => match self.registry.apply_update(&participant_id, &patch, now) {
                Ok(RegistryChange::Joined) => {
                    let mut events = vec![SessionEvent::Presence(PresenceEvent::Joined(
                        participant_id,
                    ))];
                    events.extend(self.recompute_proximity(now));
                    events
                }
                Ok(RegistryChange::Moved) => self.recompute_proximity(now),
                Ok(RegistryChange::Updated) => Vec::new(),
                Err(RegistryError::LocalEcho) => Vec::new(),
                Err(e) => {
                    tracing::warn!("Dropping presence update: {}", e);
                    Vec::new()
                }
            },
            WireFrame::Leave { participant_id } => {
                if self.registry.remove(&participant_id).is_none() {
                    return Vec::new();
                }
                tracing::info!("Participant {} left", participant_id);
                let mut events = vec![SessionEvent::Presence(PresenceEvent::Left(participant_id))];
                events.extend(self.recompute_proximity(now));
                events
            }
            WireFrame::Chat { message } => {
                let visible = is_visible(&message, self.proximity.near_set(), &self.identity.id);
                if self.chat.append(message.clone()) && visible {
                    vec![SessionEvent::Chat(message)]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// Local media toggle. Devices that refuse are treated as off and
    /// reported as a notice.
    pub fn set_media(&mut self, wanted: MediaFlags, now: Instant) -> Vec<SessionEvent> {
        if self.left {
            return Vec::new();
        }
        let current = self.calls.media();
        let (granted, errors) = acquire_flags(self.devices.as_mut(), current, wanted);

        let mut events: Vec<SessionEvent> = errors
            .into_iter()
            .map(|e| SessionEvent::Notice(format!("{}; continuing without it", e)))
            .collect();
        if granted != current {
            events.extend(
                self.calls
                    .set_media(granted, self.proximity.near_set(), now)
                    .into_iter()
                    .map(SessionEvent::from),
            );
            // Links are gone or renegotiated; now the devices can go.
            release_flags(self.devices.as_mut(), current, granted);
            self.position.mark_dirty();
        }
        events
    }

    pub fn set_status(&mut self, status: Status) {
        if self.status != status {
            self.status = status;
            self.position.mark_dirty();
        }
    }

    pub fn on_peer_event(&mut self, event: PeerEvent, now: Instant) -> Vec<SessionEvent> {
        self.calls
            .on_peer_event(event, now)
            .into_iter()
            .map(SessionEvent::from)
            .collect()
    }

    /// Full presence patch if the throttle (or heartbeat) says it is time.
    pub fn poll_publish(&mut self, now: Instant) -> Option<PresencePatch> {
        let position = self.position.poll_publish(now)?;
        Some(PresencePatch {
            display_name: Some(self.identity.display_name.clone()),
            position: Some(position),
            avatar: Some(self.identity.avatar),
            media: Some(self.calls.media()),
            status: Some(self.status),
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }

    pub fn publish_failed(&mut self) {
        self.position.publish_failed();
    }

    /// The channel came back after an outage; resend full presence.
    pub fn republish(&mut self) {
        if !self.left {
            self.position.mark_dirty();
        }
    }

    /// Drop stale participants; exits follow for any that were near.
    pub fn sweep(&mut self, now: Instant) -> Vec<SessionEvent> {
        let stale = self.registry.sweep(now, self.settings.stale_after);
        if stale.is_empty() {
            return Vec::new();
        }
        let mut events: Vec<SessionEvent> = stale
            .into_iter()
            .map(|id| SessionEvent::Presence(PresenceEvent::TimedOut(id)))
            .collect();
        events.extend(self.recompute_proximity(now));
        events
    }

    /// Retry failed calls and expire stuck negotiations.
    pub fn reevaluate_calls(&mut self, now: Instant) -> Vec<SessionEvent> {
        self.calls
            .reevaluate(self.proximity.near_set(), now)
            .into_iter()
            .map(SessionEvent::from)
            .collect()
    }

    /// Create a message from the local participant and record it locally;
    /// the store does not echo our own frames back.
    pub fn say(&mut self, body: impl Into<String>, scope: ChatScope) -> ChatMessage {
        let message = ChatMessage::new(self.identity.id.clone(), body, scope);
        self.chat.append(message.clone());
        message
    }

    /// Messages visible right now, oldest first.
    pub fn visible_messages(&self) -> Vec<ChatMessage> {
        self.chat
            .visible(self.proximity.near_set(), &self.identity.id)
            .cloned()
            .collect()
    }

    pub fn participants(&self) -> Vec<Participant> {
        let mut all: Vec<Participant> = self.registry.snapshot().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Tear down every call and stop publishing, then release devices.
    /// The caller sends the leave frame afterwards.
    pub fn leave(&mut self, now: Instant) -> Vec<SessionEvent> {
        if self.left {
            return Vec::new();
        }
        self.left = true;

        let mut events: Vec<SessionEvent> = self
            .calls
            .teardown_all()
            .into_iter()
            .map(SessionEvent::from)
            .collect();
        self.position.stop();

        let media = self.calls.media();
        self.calls.set_media(MediaFlags::OFF, &BTreeSet::new(), now);
        release_flags(self.devices.as_mut(), media, MediaFlags::OFF);

        events.extend(self.proximity.clear().into_iter().map(SessionEvent::from));
        events.extend(self.zones.clear().into_iter().map(SessionEvent::from));
        self.registry.clear();
        events
    }

    fn recompute_proximity(&mut self, now: Instant) -> Vec<SessionEvent> {
        let here = self.position.position();
        let transitions = self
            .proximity
            .recompute(here, self.registry.iter().map(|p| (&p.id, p.position)));

        let mut events = Vec::with_capacity(transitions.len());
        for transition in transitions {
            let calls = match &transition {
                ProximityEvent::Enter(id) => self.calls.on_proximity_enter(id, now),
                ProximityEvent::Exit(id) => self.calls.on_proximity_exit(id),
            };
            events.push(SessionEvent::Proximity(transition));
            events.extend(calls.into_iter().map(SessionEvent::from));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::config::SessionConfig;
    use crate::models::ZoneKind;
    use crate::office::events::{CallEvent, ZoneEvent};
    use crate::peer::devices::{MediaError, MediaKind, SimulatedDevices};
    use crate::peer::simulated::{PeerBehavior, SimulatedTransport};
    use crate::peer::{ConnectionHandle, PeerError};

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Initiate(ParticipantId),
        Teardown(ConnectionHandle),
        Acquire(MediaKind),
        Release(MediaKind),
    }

    /// Transport and devices writing into one shared log, so the order of
    /// hang-ups and device releases can be checked.
    #[derive(Clone, Default)]
    struct Journal(Arc<Mutex<Vec<Op>>>);

    impl Journal {
        fn ops(&self) -> Vec<Op> {
            self.0.lock().unwrap().clone()
        }

        fn push(&self, op: Op) {
            self.0.lock().unwrap().push(op);
        }

        fn position(&self, pred: impl Fn(&Op) -> bool) -> Option<usize> {
            self.ops().iter().position(pred)
        }

        fn last_position(&self, pred: impl Fn(&Op) -> bool) -> Option<usize> {
            self.ops().iter().rposition(pred)
        }

        fn held(&self, kind: MediaKind) -> bool {
            self.ops().iter().fold(false, |held, op| match op {
                Op::Acquire(k) if *k == kind => true,
                Op::Release(k) if *k == kind => false,
                _ => held,
            })
        }
    }

    struct JournalTransport {
        journal: Journal,
        next: u64,
    }

    impl PeerTransport for JournalTransport {
        fn initiate(
            &mut self,
            peer: &ParticipantId,
            _media: MediaFlags,
        ) -> Result<ConnectionHandle, PeerError> {
            self.next += 1;
            self.journal.push(Op::Initiate(peer.clone()));
            Ok(ConnectionHandle(self.next))
        }

        fn renegotiate(&mut self, _handle: ConnectionHandle, _media: MediaFlags) {}

        fn teardown(&mut self, handle: ConnectionHandle) {
            self.journal.push(Op::Teardown(handle));
        }
    }

    struct JournalDevices(Journal);

    impl MediaDevices for JournalDevices {
        fn acquire(&mut self, kind: MediaKind) -> Result<(), MediaError> {
            self.0.push(Op::Acquire(kind));
            Ok(())
        }

        fn release(&mut self, kind: MediaKind) {
            self.0.push(Op::Release(kind));
        }
    }

    fn journaled_session() -> (OfficeSession, Journal) {
        let journal = Journal::default();
        let session = OfficeSession::new(
            Identity {
                id: "me".into(),
                display_name: "Me".into(),
                avatar: AvatarId::Ash,
            },
            Position::new(0.0, 0.0),
            settings(),
            layout(),
            Box::new(JournalTransport {
                journal: journal.clone(),
                next: 0,
            }),
            Box::new(JournalDevices(journal.clone())),
        )
        .unwrap();
        (session, journal)
    }

    fn settings() -> SessionSettings {
        SessionConfig::default().settings().unwrap()
    }

    fn layout() -> ZoneLayout {
        let zone = |id: &str, x: f64| Zone {
            id: id.into(),
            name: id.to_uppercase(),
            x,
            y: 0.0,
            width: 100.0,
            height: 100.0,
            kind: ZoneKind::Meeting,
        };
        ZoneLayout::new(vec![zone("a", 0.0), zone("b", 200.0)]).unwrap()
    }

    fn session_with(
        devices: SimulatedDevices,
    ) -> (OfficeSession, mpsc::UnboundedReceiver<PeerEvent>) {
        let (transport, peer_rx) = SimulatedTransport::new();
        session_with_transport(transport, devices, peer_rx)
    }

    fn session_with_transport(
        transport: SimulatedTransport,
        devices: SimulatedDevices,
        peer_rx: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> (OfficeSession, mpsc::UnboundedReceiver<PeerEvent>) {
        let identity = Identity {
            id: "me".into(),
            display_name: "Me".into(),
            avatar: AvatarId::Ash,
        };
        let session = OfficeSession::new(
            identity,
            Position::new(0.0, 0.0),
            settings(),
            layout(),
            Box::new(transport),
            Box::new(devices),
        )
        .unwrap();
        (session, peer_rx)
    }

    fn presence(id: &str, x: f64, y: f64) -> WireFrame {
        WireFrame::Presence {
            participant_id: id.into(),
            patch: PresencePatch::position(Position::new(x, y)),
        }
    }

    fn drain_peer(
        session: &mut OfficeSession,
        rx: &mut mpsc::UnboundedReceiver<PeerEvent>,
        now: Instant,
    ) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.extend(session.on_peer_event(ev, now));
        }
        events
    }

    #[test]
    fn test_literal_scenario_with_call() {
        let (mut s, mut peer_rx) = session_with(SimulatedDevices::new());
        let now = Instant::now();
        let a: ParticipantId = "A".into();
        s.set_media(MediaFlags::new(true, true), now);

        let events = s.apply_frame(presence("A", 50.0, 0.0), now);
        assert_eq!(
            events,
            vec![
                SessionEvent::Presence(PresenceEvent::Joined(a.clone())),
                SessionEvent::Proximity(ProximityEvent::Enter(a.clone())),
                SessionEvent::Call(CallEvent::Connecting(a.clone())),
            ]
        );
        assert_eq!(
            drain_peer(&mut s, &mut peer_rx, now),
            vec![SessionEvent::Call(CallEvent::Connected(a.clone()))]
        );
        assert_eq!(s.call_state(&a), CallState::Connected);

        let events = s.apply_frame(presence("A", 150.0, 0.0), now);
        assert_eq!(
            events,
            vec![
                SessionEvent::Proximity(ProximityEvent::Exit(a.clone())),
                SessionEvent::Call(CallEvent::Disconnected(a.clone())),
            ]
        );
        assert_eq!(s.call_state(&a), CallState::None);

        let events = s.apply_frame(presence("A", 100.0, 0.0), now);
        assert_eq!(events[0], SessionEvent::Proximity(ProximityEvent::Enter(a.clone())));
    }

    #[test]
    fn test_repeated_identical_frame_emits_nothing() {
        let (mut s, _rx) = session_with(SimulatedDevices::new());
        let now = Instant::now();
        s.apply_frame(presence("A", 10.0, 0.0), now);
        assert!(s.apply_frame(presence("A", 10.0, 0.0), now).is_empty());
        assert!(s.move_to(0.0, 0.0, now).unwrap().is_empty());
    }

    #[test]
    fn test_zone_crossing_exit_before_enter() {
        let (mut s, _rx) = session_with(SimulatedDevices::new());
        let now = Instant::now();
        assert_eq!(s.join(), vec![SessionEvent::Zone(ZoneEvent::Enter("a".into()))]);

        let events = s.move_to(250.0, 50.0, now).unwrap();
        assert_eq!(
            events,
            vec![
                SessionEvent::Zone(ZoneEvent::Exit("a".into())),
                SessionEvent::Zone(ZoneEvent::Enter("b".into())),
            ]
        );
        assert_eq!(s.zone().unwrap().id, "b");
    }

    #[test]
    fn test_invalid_move_leaves_state() {
        let (mut s, _rx) = session_with(SimulatedDevices::new());
        assert!(s.move_to(f64::NAN, 0.0, Instant::now()).is_err());
        assert_eq!(s.position(), Position::new(0.0, 0.0));
    }

    #[test]
    fn test_staleness_sweep_exits_and_hangs_up() {
        let (mut s, mut peer_rx) = session_with(SimulatedDevices::new());
        let t0 = Instant::now();
        let a: ParticipantId = "A".into();
        s.set_media(MediaFlags::new(false, true), t0);
        s.apply_frame(presence("A", 10.0, 10.0), t0);
        drain_peer(&mut s, &mut peer_rx, t0);

        assert!(s.sweep(t0 + Duration::from_secs(30)).is_empty());

        let events = s.sweep(t0 + Duration::from_secs(46));
        assert_eq!(
            events,
            vec![
                SessionEvent::Presence(PresenceEvent::TimedOut(a.clone())),
                SessionEvent::Proximity(ProximityEvent::Exit(a.clone())),
                SessionEvent::Call(CallEvent::Disconnected(a.clone())),
            ]
        );
        assert!(s.registry().is_empty());
    }

    #[test]
    fn test_explicit_leave_frame() {
        let (mut s, _rx) = session_with(SimulatedDevices::new());
        let now = Instant::now();
        s.apply_frame(presence("A", 10.0, 10.0), now);
        let events = s.apply_frame(
            WireFrame::Leave {
                participant_id: "A".into(),
            },
            now,
        );
        assert_eq!(events.len(), 2);
        assert!(s.near_set().is_empty());
        // Unknown leave is ignored.
        assert!(s
            .apply_frame(
                WireFrame::Leave {
                    participant_id: "A".into()
                },
                now
            )
            .is_empty());
    }

    #[test]
    fn test_proximity_message_visibility_flips() {
        let (mut s, _rx) = session_with(SimulatedDevices::new());
        let now = Instant::now();
        s.apply_frame(presence("S", 10.0, 0.0), now);

        let msg = ChatMessage {
            id: "m1".into(),
            sender_id: "S".into(),
            body: "psst".into(),
            scope: ChatScope::Proximity,
            timestamp: 0,
        };
        let events = s.apply_frame(WireFrame::Chat { message: msg.clone() }, now);
        assert_eq!(events, vec![SessionEvent::Chat(msg.clone())]);
        assert_eq!(s.visible_messages(), vec![msg.clone()]);

        s.apply_frame(presence("S", 500.0, 0.0), now);
        assert!(s.visible_messages().is_empty());

        s.apply_frame(presence("S", 20.0, 0.0), now);
        assert_eq!(s.visible_messages(), vec![msg]);
    }

    #[test]
    fn test_permission_denied_is_a_notice() {
        let (mut s, _rx) = session_with(SimulatedDevices::new().deny(MediaKind::Webcam));
        let now = Instant::now();
        s.apply_frame(presence("A", 10.0, 0.0), now);

        let events = s.set_media(MediaFlags::new(true, false), now);
        assert!(matches!(&events[..], [SessionEvent::Notice(_)]));
        assert_eq!(s.media(), MediaFlags::OFF);
        assert_eq!(s.call_state(&"A".into()), CallState::None);

        let events = s.set_media(MediaFlags::new(true, true), now);
        assert!(matches!(events[0], SessionEvent::Notice(_)));
        assert_eq!(s.media(), MediaFlags::new(false, true));
        assert_eq!(s.call_state(&"A".into()), CallState::Connecting);
    }

    #[test]
    fn test_unreachable_peer_retries_on_cadence() {
        let (mut transport, peer_rx) = SimulatedTransport::new();
        transport.set_behavior("A".into(), PeerBehavior::Unreachable);
        let (mut s, mut peer_rx) =
            session_with_transport(transport, SimulatedDevices::new(), peer_rx);
        let t0 = Instant::now();
        s.set_media(MediaFlags::new(false, true), t0);
        s.apply_frame(presence("A", 10.0, 0.0), t0);

        let events = drain_peer(&mut s, &mut peer_rx, t0);
        assert!(matches!(
            &events[..],
            [SessionEvent::Call(CallEvent::Failed { .. })]
        ));
        assert!(s.reevaluate_calls(t0 + Duration::from_millis(200)).is_empty());
        assert_eq!(
            s.reevaluate_calls(t0 + Duration::from_secs(1)),
            vec![SessionEvent::Call(CallEvent::Connecting("A".into()))]
        );
    }

    #[test]
    fn test_publish_carries_full_state() {
        let (mut s, _rx) = session_with(SimulatedDevices::new());
        let t0 = Instant::now();
        let patch = s.poll_publish(t0).unwrap();
        assert_eq!(patch.display_name.as_deref(), Some("Me"));
        assert_eq!(patch.avatar, Some(AvatarId::Ash));
        assert_eq!(patch.status, Some(Status::Online));

        s.set_status(Status::Busy);
        assert!(s.poll_publish(t0 + Duration::from_millis(50)).is_none());
        let patch = s.poll_publish(t0 + Duration::from_millis(200)).unwrap();
        assert_eq!(patch.status, Some(Status::Busy));
    }

    #[test]
    fn test_leave_tears_down_then_stops() {
        let (mut s, mut peer_rx) = session_with(SimulatedDevices::new());
        let now = Instant::now();
        s.set_media(MediaFlags::new(true, true), now);
        s.apply_frame(presence("A", 10.0, 0.0), now);
        s.apply_frame(presence("B", 0.0, 10.0), now);
        drain_peer(&mut s, &mut peer_rx, now);

        let events = s.leave(now);
        assert_eq!(
            &events[..2],
            &[
                SessionEvent::Call(CallEvent::Disconnected("A".into())),
                SessionEvent::Call(CallEvent::Disconnected("B".into())),
            ]
        );
        assert!(s.poll_publish(now + Duration::from_secs(60)).is_none());
        assert_eq!(s.media(), MediaFlags::OFF);
        assert!(s.has_left());
        assert!(s.apply_frame(presence("C", 1.0, 1.0), now).is_empty());
        assert!(s.leave(now).is_empty());
    }

    #[test]
    fn test_leave_releases_devices_after_hangup() {
        let (mut s, journal) = journaled_session();
        let now = Instant::now();
        s.set_media(MediaFlags::new(true, true), now);
        s.apply_frame(presence("A", 10.0, 0.0), now);
        s.apply_frame(presence("B", 0.0, 10.0), now);
        assert!(journal.held(MediaKind::Webcam));
        assert!(journal.held(MediaKind::Mic));

        let before = journal.ops().len();
        s.leave(now);

        let last_teardown = journal
            .last_position(|op| matches!(op, Op::Teardown(_)))
            .unwrap();
        let first_release = journal
            .position(|op| matches!(op, Op::Release(_)))
            .unwrap();
        assert!(last_teardown >= before);
        assert!(last_teardown < first_release);
        assert_eq!(
            journal.ops()[before..]
                .iter()
                .filter(|op| matches!(op, Op::Teardown(_)))
                .count(),
            2
        );
        assert!(!journal.held(MediaKind::Webcam));
        assert!(!journal.held(MediaKind::Mic));
        assert!(s.poll_publish(now + Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_media_off_hangs_up_before_release() {
        let (mut s, journal) = journaled_session();
        let now = Instant::now();
        s.set_media(MediaFlags::new(false, true), now);
        s.apply_frame(presence("A", 10.0, 0.0), now);
        assert_eq!(
            journal.ops(),
            vec![Op::Acquire(MediaKind::Mic), Op::Initiate("A".into())]
        );

        let events = s.set_media(MediaFlags::OFF, now);
        assert_eq!(events, vec![SessionEvent::Call(CallEvent::Disconnected("A".into()))]);
        assert_eq!(
            journal.ops()[2..],
            [Op::Teardown(ConnectionHandle(1)), Op::Release(MediaKind::Mic)]
        );
        assert_eq!(s.media(), MediaFlags::OFF);
    }
}
