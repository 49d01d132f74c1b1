//! Scripted offline sessions for the `simulate` command.
//!
//! A scenario drives one `OfficeSession` on a virtual clock. Remote
//! participants exist only as the frames the script injects; calls go
//! through the simulated transport and devices.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::channel::WireFrame;
use crate::config::SessionConfig;
use crate::models::{
    AvatarId, ChatMessage, ChatScope, MediaFlags, ParticipantId, Position, PresencePatch, Status,
};
use crate::office::session::{Identity, OfficeSession};
use crate::office::zones::ZoneLayout;
use crate::office::SessionEvent;
use crate::peer::devices::{MediaKind, SimulatedDevices};
use crate::peer::simulated::{PeerBehavior, SimulatedTransport};

#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub local: LocalSpec,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default, rename = "peer")]
    pub peers: Vec<PeerSpec>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct LocalSpec {
    pub id: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub webcam: bool,
    #[serde(default)]
    pub mic: bool,
    /// Devices that refuse permission, e.g. `["webcam"]`.
    #[serde(default)]
    pub deny: Vec<DeviceSpec>,
    /// Devices that are not attached at all.
    #[serde(default)]
    pub missing: Vec<DeviceSpec>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSpec {
    Webcam,
    Mic,
}

#[derive(Debug, Deserialize)]
pub struct PeerSpec {
    pub id: String,
    pub behavior: BehaviorSpec,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BehaviorSpec {
    Accept,
    Unreachable,
    Reject,
    Silent,
}

#[derive(Debug, Deserialize)]
pub struct Step {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Action {
    /// A remote participant publishes a position.
    Presence { participant: String, x: f64, y: f64 },
    Leave { participant: String },
    /// The local participant moves.
    Move { x: f64, y: f64 },
    Media { webcam: bool, mic: bool },
    Status { status: Status },
    /// A message arrives from `from`, or is sent locally when omitted.
    Chat {
        from: Option<String>,
        body: String,
        scope: ChatScope,
    },
    /// Only let time pass.
    Tick,
}

/// One emitted event and when it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    pub at_ms: u64,
    pub event: SessionEvent,
}

impl Scenario {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse scenario")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        Self::parse(&content)
    }

    /// Replay every step in order and collect the events.
    pub fn run(&self, layout: ZoneLayout) -> Result<Vec<TimedEvent>> {
        let settings = self.session.settings()?;

        let (mut transport, mut peer_rx) = SimulatedTransport::new();
        for peer in &self.peers {
            transport.set_behavior(peer.id.as_str().into(), peer.behavior.into());
        }
        let devices = self
            .local
            .deny
            .iter()
            .fold(SimulatedDevices::new(), |d, kind| d.deny((*kind).into()));
        let devices = self
            .local
            .missing
            .iter()
            .fold(devices, |d, kind| d.unplug((*kind).into()));

        let identity = Identity {
            id: ParticipantId::new(self.local.id.clone()),
            display_name: self.local.id.clone(),
            avatar: AvatarId::default(),
        };
        let mut session = OfficeSession::new(
            identity,
            Position::new(self.local.x, self.local.y),
            settings,
            layout,
            Box::new(transport),
            Box::new(devices),
        )?;

        let start = Instant::now();
        let mut out = Vec::new();
        let mut record = |at_ms: u64, events: Vec<SessionEvent>| {
            out.extend(events.into_iter().map(|event| TimedEvent { at_ms, event }));
        };

        record(0, session.join());
        let media = MediaFlags::new(self.local.webcam, self.local.mic);
        if media.any() {
            record(0, session.set_media(media, start));
        }

        let mut steps: Vec<&Step> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.at_ms);

        for step in steps {
            let now = start + Duration::from_millis(step.at_ms);
            let events = match &step.action {
                Action::Presence { participant, x, y } => session.apply_frame(
                    WireFrame::Presence {
                        participant_id: participant.as_str().into(),
                        patch: PresencePatch::position(Position::new(*x, *y)),
                    },
                    now,
                ),
                Action::Leave { participant } => session.apply_frame(
                    WireFrame::Leave {
                        participant_id: participant.as_str().into(),
                    },
                    now,
                ),
                Action::Move { x, y } => session
                    .move_to(*x, *y, now)
                    .with_context(|| format!("Step at {} ms", step.at_ms))?,
                Action::Media { webcam, mic } => {
                    session.set_media(MediaFlags::new(*webcam, *mic), now)
                }
                Action::Status { status } => {
                    session.set_status(*status);
                    Vec::new()
                }
                Action::Chat { from, body, scope } => match from {
                    Some(sender) => {
                        let message = ChatMessage::new(sender.as_str().into(), body.clone(), *scope);
                        session.apply_frame(WireFrame::Chat { message }, now)
                    }
                    None => vec![SessionEvent::Chat(session.say(body.clone(), *scope))],
                },
                Action::Tick => Vec::new(),
            };
            record(step.at_ms, events);

            while let Ok(event) = peer_rx.try_recv() {
                record(step.at_ms, session.on_peer_event(event, now));
            }
            record(step.at_ms, session.reevaluate_calls(now));
            record(step.at_ms, session.sweep(now));
        }

        Ok(out)
    }
}

impl From<BehaviorSpec> for PeerBehavior {
    fn from(b: BehaviorSpec) -> Self {
        match b {
            BehaviorSpec::Accept => Self::Accept,
            BehaviorSpec::Unreachable => Self::Unreachable,
            BehaviorSpec::Reject => Self::Reject,
            BehaviorSpec::Silent => Self::Silent,
        }
    }
}

impl From<DeviceSpec> for MediaKind {
    fn from(d: DeviceSpec) -> Self {
        match d {
            DeviceSpec::Webcam => Self::Webcam,
            DeviceSpec::Mic => Self::Mic,
        }
    }
}
