//! Zone Tracker: attributes the local coordinate to a named region.
//!
//! Zone membership is informational and independent of proximity. When
//! rectangles overlap, the first zone in layout order wins.

use std::path::Path;

use serde::Deserialize;

use crate::models::{Position, Zone, ZoneKind};

use super::events::ZoneEvent;

#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    #[error("failed to read layout file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse layout file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("zone {id}: {reason}")]
    InvalidZone { id: String, reason: &'static str },
    #[error("duplicate zone id {0}")]
    DuplicateId(String),
}

/// Static zone list, loaded once per session.
#[derive(Debug, Clone, Default)]
pub struct ZoneLayout {
    zones: Vec<Zone>,
}

#[derive(Deserialize)]
struct LayoutFile {
    #[serde(default, rename = "zone")]
    zones: Vec<Zone>,
}

impl ZoneLayout {
    pub fn new(zones: Vec<Zone>) -> Result<Self, LayoutError> {
        let mut seen = std::collections::HashSet::new();
        for zone in &zones {
            if zone.id.is_empty() {
                return Err(LayoutError::InvalidZone {
                    id: zone.name.clone(),
                    reason: "empty id",
                });
            }
            if !(zone.x.is_finite()
                && zone.y.is_finite()
                && zone.width.is_finite()
                && zone.height.is_finite())
            {
                return Err(LayoutError::InvalidZone {
                    id: zone.id.clone(),
                    reason: "non-finite geometry",
                });
            }
            if zone.width < 0.0 || zone.height < 0.0 {
                return Err(LayoutError::InvalidZone {
                    id: zone.id.clone(),
                    reason: "negative size",
                });
            }
            if !seen.insert(zone.id.as_str()) {
                return Err(LayoutError::DuplicateId(zone.id.clone()));
            }
        }

        for (i, a) in zones.iter().enumerate() {
            for b in &zones[i + 1..] {
                if a.overlaps(b) {
                    tracing::warn!(
                        "Zones {} and {} overlap; {} takes precedence",
                        a.id,
                        b.id,
                        a.id
                    );
                }
            }
        }

        Ok(Self { zones })
    }

    /// Parse a TOML layout made of `[[zone]]` tables.
    pub fn from_toml(content: &str) -> Result<Self, LayoutError> {
        let file: LayoutFile = toml::from_str(content)?;
        Self::new(file.zones)
    }

    pub fn load(path: &Path) -> Result<Self, LayoutError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Built-in floor plan used when no layout file is configured.
    pub fn default_office() -> Self {
        let zone = |id: &str, name: &str, x, y, width, height, kind| Zone {
            id: id.into(),
            name: name.into(),
            x,
            y,
            width,
            height,
            kind,
        };
        Self {
            zones: vec![
                zone("meeting-a", "Meeting Room A", 0.0, 0.0, 300.0, 200.0, ZoneKind::Meeting),
                zone("meeting-b", "Meeting Room B", 320.0, 0.0, 300.0, 200.0, ZoneKind::Meeting),
                zone("desks", "Open Desks", 0.0, 240.0, 620.0, 260.0, ZoneKind::Desk),
                zone("lounge", "Lounge", 660.0, 0.0, 240.0, 240.0, ZoneKind::Relax),
                zone("kitchen", "Kitchen", 660.0, 280.0, 240.0, 220.0, ZoneKind::Kitchen),
            ],
        }
    }

    /// First zone in layout order containing the point.
    pub fn classify(&self, p: Position) -> Option<&Zone> {
        self.zones.iter().find(|z| z.contains(p))
    }

    pub fn get(&self, id: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id == id)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }
}

pub struct ZoneTracker {
    layout: ZoneLayout,
    current: Option<String>,
}

impl ZoneTracker {
    pub fn new(layout: ZoneLayout) -> Self {
        Self {
            layout,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&Zone> {
        self.current.as_deref().and_then(|id| self.layout.get(id))
    }

    /// Reclassify the local coordinate. On change, emits the exit of the old
    /// zone (if any) followed by the enter of the new one (if any).
    pub fn update(&mut self, p: Position) -> Vec<ZoneEvent> {
        let next = self.layout.classify(p).map(|z| z.id.clone());
        if next == self.current {
            return Vec::new();
        }

        let mut events = Vec::with_capacity(2);
        if let Some(old) = self.current.take() {
            events.push(ZoneEvent::Exit(old));
        }
        if let Some(ref new) = next {
            events.push(ZoneEvent::Enter(new.clone()));
        }
        self.current = next;
        events
    }

    /// Leave whatever zone we are in (session leave).
    pub fn clear(&mut self) -> Vec<ZoneEvent> {
        self.current.take().map(ZoneEvent::Exit).into_iter().collect()
    }
}
