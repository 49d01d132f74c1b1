//! Local capture devices (camera, microphone).
//!
//! Permission denial is not fatal: the session treats the device as off
//! and shows a notice.

use std::collections::HashSet;
use std::fmt;

use crate::models::MediaFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Webcam,
    Mic,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Webcam => f.write_str("camera"),
            Self::Mic => f.write_str("microphone"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("{0} permission denied")]
    PermissionDenied(MediaKind),
    #[error("{0} unavailable")]
    Unavailable(MediaKind),
}

pub trait MediaDevices: Send {
    fn acquire(&mut self, kind: MediaKind) -> Result<(), MediaError>;
    fn release(&mut self, kind: MediaKind);
}

/// Acquire the devices `wanted` turns on, collecting the refusals.
///
/// Devices being turned off are left alone; `release_flags` drops them
/// once nothing uses them any more.
pub fn acquire_flags(
    devices: &mut dyn MediaDevices,
    current: MediaFlags,
    wanted: MediaFlags,
) -> (MediaFlags, Vec<MediaError>) {
    let mut granted = wanted;
    let mut errors = Vec::new();

    let mut step = |kind: MediaKind, was: bool, want: bool, slot: &mut bool| {
        if want && !was {
            if let Err(e) = devices.acquire(kind) {
                *slot = false;
                errors.push(e);
            }
        }
    };
    step(
        MediaKind::Webcam,
        current.webcam_on,
        wanted.webcam_on,
        &mut granted.webcam_on,
    );
    step(MediaKind::Mic, current.mic_on, wanted.mic_on, &mut granted.mic_on);

    (granted, errors)
}

/// Release every device on in `from` but off in `to`.
pub fn release_flags(devices: &mut dyn MediaDevices, from: MediaFlags, to: MediaFlags) {
    if from.webcam_on && !to.webcam_on {
        devices.release(MediaKind::Webcam);
    }
    if from.mic_on && !to.mic_on {
        devices.release(MediaKind::Mic);
    }
}

/// In-process devices: every kind is available unless explicitly denied.
#[derive(Debug, Default)]
pub struct SimulatedDevices {
    denied: HashSet<MediaKind>,
    missing: HashSet<MediaKind>,
    held: HashSet<MediaKind>,
}

impl SimulatedDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(mut self, kind: MediaKind) -> Self {
        self.denied.insert(kind);
        self
    }

    /// No such device is attached.
    pub fn unplug(mut self, kind: MediaKind) -> Self {
        self.missing.insert(kind);
        self
    }

    #[cfg(test)]
    pub fn is_held(&self, kind: MediaKind) -> bool {
        self.held.contains(&kind)
    }
}

impl MediaDevices for SimulatedDevices {
    fn acquire(&mut self, kind: MediaKind) -> Result<(), MediaError> {
        if self.missing.contains(&kind) {
            return Err(MediaError::Unavailable(kind));
        }
        if self.denied.contains(&kind) {
            return Err(MediaError::PermissionDenied(kind));
        }
        tracing::debug!("Acquired {}", kind);
        self.held.insert(kind);
        Ok(())
    }

    fn release(&mut self, kind: MediaKind) {
        if self.held.remove(&kind) {
            tracing::debug!("Released {}", kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_flags_grants_and_releases() {
        let mut dev = SimulatedDevices::new();
        let (granted, errors) = acquire_flags(&mut dev, MediaFlags::OFF, MediaFlags::new(true, true));
        assert_eq!(granted, MediaFlags::new(true, true));
        assert!(errors.is_empty());
        assert!(dev.is_held(MediaKind::Webcam));

        let (next, _) = acquire_flags(&mut dev, granted, MediaFlags::new(false, true));
        assert_eq!(next, MediaFlags::new(false, true));
        // Turning off does not release by itself.
        assert!(dev.is_held(MediaKind::Webcam));

        release_flags(&mut dev, granted, next);
        assert!(!dev.is_held(MediaKind::Webcam));
        assert!(dev.is_held(MediaKind::Mic));
    }

    #[test]
    fn test_permission_denied_turns_flag_off() {
        let mut dev = SimulatedDevices::new().deny(MediaKind::Webcam);
        let (granted, errors) = acquire_flags(&mut dev, MediaFlags::OFF, MediaFlags::new(true, true));
        assert_eq!(granted, MediaFlags::new(false, true));
        assert_eq!(errors, vec![MediaError::PermissionDenied(MediaKind::Webcam)]);
    }

    #[test]
    fn test_missing_device_is_unavailable() {
        let mut dev = SimulatedDevices::new().unplug(MediaKind::Mic);
        let (granted, errors) = acquire_flags(&mut dev, MediaFlags::OFF, MediaFlags::new(false, true));
        assert_eq!(granted, MediaFlags::OFF);
        assert_eq!(errors, vec![MediaError::Unavailable(MediaKind::Mic)]);
        assert!(!dev.is_held(MediaKind::Mic));
    }
}
