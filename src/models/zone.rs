//! Zone-related models

use serde::{Deserialize, Serialize};

use super::Position;

/// What a zone is used for. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneKind {
    Meeting,
    Desk,
    Relax,
    Kitchen,
    #[serde(other)]
    Other,
}

/// Static rectangular region of the office map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub kind: ZoneKind,
}

impl Zone {
    /// Closed-rectangle containment: edges belong to the zone.
    pub fn contains(&self, p: Position) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }

    pub fn overlaps(&self, other: &Zone) -> bool {
        self.x <= other.x + other.width
            && other.x <= self.x + self.width
            && self.y <= other.y + other.height
            && other.y <= self.y + self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(x: f64, y: f64, w: f64, h: f64) -> Zone {
        Zone {
            id: "z".into(),
            name: "Z".into(),
            x,
            y,
            width: w,
            height: h,
            kind: ZoneKind::Desk,
        }
    }

    #[test]
    fn test_contains_is_edge_inclusive() {
        let z = zone(10.0, 10.0, 20.0, 20.0);
        assert!(z.contains(Position::new(10.0, 10.0)));
        assert!(z.contains(Position::new(30.0, 30.0)));
        assert!(z.contains(Position::new(20.0, 15.0)));
        assert!(!z.contains(Position::new(30.1, 15.0)));
        assert!(!z.contains(Position::new(9.9, 15.0)));
    }

    #[test]
    fn test_overlaps() {
        let a = zone(0.0, 0.0, 10.0, 10.0);
        assert!(a.overlaps(&zone(5.0, 5.0, 10.0, 10.0)));
        assert!(!a.overlaps(&zone(11.0, 0.0, 5.0, 5.0)));
    }

    #[test]
    fn test_unknown_kind_parses_as_other() {
        let z: Zone = serde_json::from_str(
            r#"{"id":"g","name":"Gym","x":0,"y":0,"width":1,"height":1,"kind":"gym"}"#,
        )
        .unwrap();
        assert_eq!(z.kind, ZoneKind::Other);
    }
}
