//! Position Store: owns the local coordinate and throttles its publication.
//!
//! Local state updates immediately; publishing is a trailing-edge throttle
//! that emits at most one update per interval and always the latest value.
//! A participant standing still republishes every `heartbeat` so remote
//! registries do not sweep it as stale. Publish failures never block local
//! movement.

use std::time::{Duration, Instant};

use crate::models::Position;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PositionError {
    #[error("non-finite coordinates ({x}, {y})")]
    NonFinite { x: f64, y: f64 },
}

pub struct PositionStore {
    position: Position,
    interval: Duration,
    heartbeat: Duration,
    last_published: Option<Instant>,
    dirty: bool,
    stopped: bool,
}

impl PositionStore {
    pub fn new(start: Position, interval: Duration, heartbeat: Duration) -> Self {
        Self {
            position: start,
            interval,
            heartbeat,
            last_published: None,
            // Announce the starting position on the first poll.
            dirty: true,
            stopped: false,
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Update the local coordinate. Invalid input leaves state unchanged.
    ///
    /// Returns true if the coordinate actually changed.
    pub fn set_position(&mut self, x: f64, y: f64) -> Result<bool, PositionError> {
        let next = Position::new(x, y);
        if !next.is_finite() {
            return Err(PositionError::NonFinite { x, y });
        }
        if next == self.position {
            return Ok(false);
        }
        self.position = next;
        self.dirty = true;
        Ok(true)
    }

    /// Flag a non-positional change (media, status) for the next publish.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Take the pending publish if the throttle window allows it.
    pub fn poll_publish(&mut self, now: Instant) -> Option<Position> {
        if self.stopped {
            return None;
        }
        let due = match self.last_published {
            None => true,
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                (self.dirty && elapsed >= self.interval) || elapsed >= self.heartbeat
            }
        };
        if !due {
            return None;
        }
        self.dirty = false;
        self.last_published = Some(now);
        Some(self.position)
    }

    /// When the next publish (pending update or heartbeat) becomes due.
    #[cfg(test)]
    pub fn next_publish_at(&self) -> Option<Instant> {
        if self.stopped {
            return None;
        }
        match self.last_published {
            Some(last) if self.dirty => Some(last + self.interval),
            Some(last) => Some(last + self.heartbeat),
            None => Some(Instant::now()),
        }
    }

    /// The transport rejected the last publish; resend on the next cycle.
    pub fn publish_failed(&mut self) {
        if !self.stopped {
            self.dirty = true;
        }
    }

    /// Stop publishing for good (session leave).
    pub fn stop(&mut self) {
        self.stopped = true;
        self.dirty = false;
    }
}
