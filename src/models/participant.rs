//! Participant-related models

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Opaque participant identifier, unique per session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random identifier for a fresh session.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A point in map coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Euclidean distance. `hypot` is symmetric in its arguments, so
    /// `a.distance_to(b) == b.distance_to(a)` holds exactly.
    pub fn distance_to(&self, other: Position) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Character skin shown on the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AvatarId {
    #[default]
    Adam,
    Ash,
    Lucy,
    Nancy,
}

impl std::str::FromStr for AvatarId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "adam" => Ok(Self::Adam),
            "ash" => Ok(Self::Ash),
            "lucy" => Ok(Self::Lucy),
            "nancy" => Ok(Self::Nancy),
            other => Err(format!(
                "Unknown avatar: {}. Use: adam, ash, lucy, nancy",
                other
            )),
        }
    }
}

/// Local webcam/mic state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFlags {
    pub webcam_on: bool,
    pub mic_on: bool,
}

impl MediaFlags {
    pub const OFF: MediaFlags = MediaFlags {
        webcam_on: false,
        mic_on: false,
    };

    pub fn new(webcam_on: bool, mic_on: bool) -> Self {
        Self { webcam_on, mic_on }
    }

    /// True if either device is on; calls are only placed while this holds.
    pub fn any(&self) -> bool {
        self.webcam_on || self.mic_on
    }
}

impl fmt::Display for MediaFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let on_off = |b: bool| if b { "on" } else { "off" };
        write!(
            f,
            "cam {} / mic {}",
            on_off(self.webcam_on),
            on_off(self.mic_on)
        )
    }
}

/// Participant availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    #[default]
    Online,
    Away,
    Busy,
    Offline,
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" | "available" => Ok(Self::Online),
            "away" => Ok(Self::Away),
            "busy" => Ok(Self::Busy),
            "offline" => Ok(Self::Offline),
            other => Err(format!(
                "Unknown status: {}. Use: online, away, busy, offline",
                other
            )),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Busy => "busy",
            Self::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Partial participant state as carried on the shared channel.
///
/// Every field is optional; absent fields leave the stored record untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<AvatarId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaFlags>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Sender wall-clock time in milliseconds since the epoch.
    #[serde(default)]
    pub timestamp: i64,
}

impl PresencePatch {
    pub fn position(position: Position) -> Self {
        Self {
            position: Some(position),
            timestamp: chrono::Utc::now().timestamp_millis(),
            ..Self::default()
        }
    }
}

/// One connected session actor as materialized from the shared channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub position: Position,
    pub avatar: AvatarId,
    pub media: MediaFlags,
    pub status: Status,
    /// Local receive time of the last update; staleness is judged on this,
    /// never on the sender's clock.
    pub last_seen: Instant,
}

impl Participant {
    pub fn new(id: ParticipantId, position: Position, now: Instant) -> Self {
        Self {
            display_name: id.to_string(),
            id,
            position,
            avatar: AvatarId::default(),
            media: MediaFlags::OFF,
            status: Status::Online,
            last_seen: now,
        }
    }

    /// Merge a patch into this record. Returns true if the position changed.
    pub fn apply(&mut self, patch: &PresencePatch, now: Instant) -> bool {
        if let Some(ref name) = patch.display_name {
            self.display_name = name.clone();
        }
        if let Some(avatar) = patch.avatar {
            self.avatar = avatar;
        }
        if let Some(media) = patch.media {
            self.media = media;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        self.last_seen = now;

        match patch.position {
            Some(pos) if pos != self.position => {
                self.position = pos;
                true
            }
            _ => false,
        }
    }
}
