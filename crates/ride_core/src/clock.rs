//! Event clock for the matching coordinator.
//!
//! All coordinator time is expressed in milliseconds since engine start. Work is
//! driven by [Event]s popped in timestamp order; timeouts are ordinary events
//! scheduled in the future, so nothing ever sleeps or blocks.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bevy_ecs::prelude::{Entity, Resource};

use crate::pool::CandidateId;

pub const ONE_SEC_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventKind {
    SearchCandidates,
    OfferAccepted,
    OfferDeclined,
    OfferTimeout,
    CandidateCancelled,
    RiderCancel,
    SearchDeadline,
    TripStarted,
    TripCompleted,
}

/// What an event is about. Offer-scoped events carry the candidate so stale
/// responses (for an offer that has since moved on) can be ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSubject {
    Session(Entity),
    Offer(Entity, CandidateId),
}

impl EventSubject {
    pub fn session(&self) -> Entity {
        match self {
            EventSubject::Session(entity) | EventSubject::Offer(entity, _) => *entity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub timestamp: u64,
    pub kind: EventKind,
    pub subject: Option<EventSubject>,
    /// Insertion order; breaks ties between events at the same timestamp.
    pub seq: u64,
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering to make BinaryHeap a min-heap by timestamp.
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The event currently being processed by the schedule.
#[derive(Debug, Clone, Copy, Resource)]
pub struct CurrentEvent(pub Event);

#[derive(Debug, Default, Resource)]
pub struct SimulationClock {
    now: u64,
    next_seq: u64,
    events: BinaryHeap<Event>,
}

impl SimulationClock {
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn schedule_at(&mut self, timestamp: u64, kind: EventKind, subject: Option<EventSubject>) {
        debug_assert!(
            timestamp >= self.now,
            "event timestamp must be >= current time"
        );
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(Event {
            timestamp: timestamp.max(self.now),
            kind,
            subject,
            seq,
        });
    }

    pub fn schedule_in(&mut self, delay_ms: u64, kind: EventKind, subject: Option<EventSubject>) {
        self.schedule_at(self.now.saturating_add(delay_ms), kind, subject);
    }

    pub fn schedule_in_secs(&mut self, secs: u64, kind: EventKind, subject: Option<EventSubject>) {
        self.schedule_in(secs.saturating_mul(ONE_SEC_MS), kind, subject);
    }

    pub fn next_event_time(&self) -> Option<u64> {
        self.events.peek().map(|event| event.timestamp)
    }

    pub fn pop_next(&mut self) -> Option<Event> {
        let event = self.events.pop()?;
        self.now = event.timestamp;
        Some(event)
    }

    /// Moves the clock forward to `timestamp` without processing events.
    /// Callers drain due events first (see [crate::runner::run_due]).
    pub fn advance_to(&mut self, timestamp: u64) {
        debug_assert!(
            self.next_event_time().map_or(true, |next| next > timestamp),
            "advancing past pending events"
        );
        self.now = self.now.max(timestamp);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_pops_events_in_time_order() {
        let mut clock = SimulationClock::default();
        clock.schedule_at(10, EventKind::SearchCandidates, None);
        clock.schedule_at(5, EventKind::OfferTimeout, None);
        clock.schedule_at(20, EventKind::RiderCancel, None);

        let first = clock.pop_next().expect("first event");
        assert_eq!(first.timestamp, 5);
        assert_eq!(clock.now(), 5);

        let second = clock.pop_next().expect("second event");
        assert_eq!(second.timestamp, 10);
        assert_eq!(clock.now(), 10);

        let third = clock.pop_next().expect("third event");
        assert_eq!(third.timestamp, 20);
        assert_eq!(clock.now(), 20);

        assert!(clock.pop_next().is_none());
        assert!(clock.is_empty());
    }

    #[test]
    fn same_timestamp_events_keep_insertion_order() {
        let mut clock = SimulationClock::default();
        clock.schedule_at(7, EventKind::TripCompleted, None);
        clock.schedule_at(7, EventKind::SearchCandidates, None);
        clock.schedule_at(7, EventKind::OfferAccepted, None);

        let kinds: Vec<_> = std::iter::from_fn(|| clock.pop_next())
            .map(|event| event.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::TripCompleted,
                EventKind::SearchCandidates,
                EventKind::OfferAccepted
            ]
        );
    }

    #[test]
    fn schedule_in_secs_is_relative_to_now() {
        let mut clock = SimulationClock::default();
        clock.schedule_at(2_000, EventKind::SearchCandidates, None);
        clock.pop_next().expect("event");
        clock.schedule_in_secs(30, EventKind::OfferTimeout, None);
        assert_eq!(clock.next_event_time(), Some(32_000));
    }

    #[test]
    fn advance_to_never_moves_backwards() {
        let mut clock = SimulationClock::default();
        clock.advance_to(5_000);
        clock.advance_to(1_000);
        assert_eq!(clock.now(), 5_000);
    }
}
