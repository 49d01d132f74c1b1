//! Proximity Engine: who is within talking distance of the local participant.
//!
//! The near set is recomputed from scratch on every trigger and diffed
//! against the previous one. Client-side scale is tens of participants, so
//! a full pass is cheaper than keeping an incremental index correct.

use std::collections::BTreeSet;

use crate::models::{ParticipantId, Position};

use super::events::ProximityEvent;

pub struct ProximityEngine {
    radius: f64,
    near: BTreeSet<ParticipantId>,
}

impl ProximityEngine {
    pub fn new(radius: f64) -> Self {
        Self {
            radius,
            near: BTreeSet::new(),
        }
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Non-strict: a participant exactly `radius` away is near.
    pub fn within(&self, local: Position, remote: Position) -> bool {
        local.distance_to(remote) <= self.radius
    }

    /// Reclassify every remote participant and emit the transitions.
    ///
    /// Exits come first, then enters, each sorted by id. Participants
    /// missing from `remotes` count as removed. Identical inputs emit
    /// nothing.
    pub fn recompute<'a, I>(&mut self, local: Position, remotes: I) -> Vec<ProximityEvent>
    where
        I: IntoIterator<Item = (&'a ParticipantId, Position)>,
    {
        let next: BTreeSet<ParticipantId> = remotes
            .into_iter()
            .filter(|(_, pos)| self.within(local, *pos))
            .map(|(id, _)| id.clone())
            .collect();

        let mut events: Vec<ProximityEvent> = self
            .near
            .difference(&next)
            .cloned()
            .map(ProximityEvent::Exit)
            .collect();
        events.extend(next.difference(&self.near).cloned().map(ProximityEvent::Enter));

        self.near = next;
        events
    }

    /// Forget everyone (session leave). Emits exits for the current set.
    pub fn clear(&mut self) -> Vec<ProximityEvent> {
        std::mem::take(&mut self.near)
            .into_iter()
            .map(ProximityEvent::Exit)
            .collect()
    }

    pub fn is_near(&self, id: &ParticipantId) -> bool {
        self.near.contains(id)
    }

    pub fn near_set(&self) -> &BTreeSet<ParticipantId> {
        &self.near
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    #[test]
    fn test_literal_scenario() {
        let mut engine = ProximityEngine::new(100.0);
        let local = Position::new(0.0, 0.0);
        let a = id("A");

        let events = engine.recompute(local, [(&a, Position::new(50.0, 0.0))]);
        assert_eq!(events, vec![ProximityEvent::Enter(a.clone())]);

        let events = engine.recompute(local, [(&a, Position::new(150.0, 0.0))]);
        assert_eq!(events, vec![ProximityEvent::Exit(a.clone())]);

        let events = engine.recompute(local, [(&a, Position::new(100.0, 0.0))]);
        assert_eq!(events, vec![ProximityEvent::Enter(a.clone())]);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let mut engine = ProximityEngine::new(100.0);
        let local = Position::new(10.0, 10.0);
        let (a, b) = (id("a"), id("b"));
        let remotes = [(&a, Position::new(20.0, 20.0)), (&b, Position::new(500.0, 0.0))];

        assert_eq!(engine.recompute(local, remotes).len(), 1);
        assert!(engine.recompute(local, remotes).is_empty());
        assert!(engine.recompute(local, remotes).is_empty());
    }

    #[test]
    fn test_boundary_is_symmetric() {
        let engine = ProximityEngine::new(100.0);
        let p = Position::new(3.0, 4.0);
        let q = Position::new(63.0, 84.0);
        assert_eq!(p.distance_to(q), 100.0);
        assert!(engine.within(p, q));
        assert!(engine.within(q, p));

        // Each side runs its own engine with itself as local.
        let (me, other) = (id("p"), id("q"));
        let mut on_p = ProximityEngine::new(100.0);
        let mut on_q = ProximityEngine::new(100.0);
        assert_eq!(on_p.recompute(p, [(&other, q)]), vec![ProximityEvent::Enter(other.clone())]);
        assert_eq!(on_q.recompute(q, [(&me, p)]), vec![ProximityEvent::Enter(me.clone())]);
    }

    #[test]
    fn test_removed_participant_exits() {
        let mut engine = ProximityEngine::new(100.0);
        let local = Position::default();
        let a = id("a");
        engine.recompute(local, [(&a, Position::new(1.0, 1.0))]);

        let none: [(&ParticipantId, Position); 0] = [];
        assert_eq!(engine.recompute(local, none), vec![ProximityEvent::Exit(a.clone())]);
        assert!(!engine.is_near(&a));
    }

    #[test]
    fn test_local_move_triggers_transitions() {
        let mut engine = ProximityEngine::new(100.0);
        let a = id("a");
        let remote = Position::new(300.0, 0.0);

        assert!(engine.recompute(Position::new(0.0, 0.0), [(&a, remote)]).is_empty());
        assert_eq!(
            engine.recompute(Position::new(250.0, 0.0), [(&a, remote)]),
            vec![ProximityEvent::Enter(a.clone())]
        );
    }

    #[test]
    fn test_exits_before_enters_sorted() {
        let mut engine = ProximityEngine::new(10.0);
        let (a, b, c, d) = (id("a"), id("b"), id("c"), id("d"));
        let origin = Position::default();
        let far = Position::new(100.0, 0.0);

        engine.recompute(origin, [(&a, origin), (&b, origin), (&c, far), (&d, far)]);
        let events = engine.recompute(origin, [(&a, far), (&b, far), (&c, origin), (&d, origin)]);
        assert_eq!(
            events,
            vec![
                ProximityEvent::Exit(a),
                ProximityEvent::Exit(b),
                ProximityEvent::Enter(c),
                ProximityEvent::Enter(d),
            ]
        );
    }

    #[test]
    fn test_clear_exits_everyone() {
        let mut engine = ProximityEngine::new(10.0);
        let a = id("a");
        engine.recompute(Position::default(), [(&a, Position::default())]);
        assert_eq!(engine.clear(), vec![ProximityEvent::Exit(a)]);
        assert!(engine.near_set().is_empty());
    }
}
