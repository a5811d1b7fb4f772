//! Runner: advances the clock and routes events into the ECS.
//!
//! Each step pops the next event from [SimulationClock], inserts it as
//! [CurrentEvent], then runs the schedule. Only the systems gated on that
//! event's kind do any work.

use bevy_ecs::prelude::{Res, Schedule, World};
use bevy_ecs::schedule::{apply_deferred, IntoSystemConfigs};

use crate::clock::{CurrentEvent, EventKind, SimulationClock};
use crate::systems::{
    candidate_cancel::candidate_cancel_system,
    respond::{offer_accepted_system, offer_declined_system, offer_timeout_system},
    rider_cancel::rider_cancel_system,
    search::search_system,
    search_deadline::search_deadline_system,
    trip::{trip_completed_system, trip_started_system},
};

fn is_kind(event: &Option<Res<CurrentEvent>>, kind: EventKind) -> bool {
    event.as_ref().is_some_and(|e| e.0.kind == kind)
}

fn is_search_candidates(event: Option<Res<CurrentEvent>>) -> bool {
    is_kind(&event, EventKind::SearchCandidates)
}

fn is_offer_accepted(event: Option<Res<CurrentEvent>>) -> bool {
    is_kind(&event, EventKind::OfferAccepted)
}

fn is_offer_declined(event: Option<Res<CurrentEvent>>) -> bool {
    is_kind(&event, EventKind::OfferDeclined)
}

fn is_offer_timeout(event: Option<Res<CurrentEvent>>) -> bool {
    is_kind(&event, EventKind::OfferTimeout)
}

fn is_candidate_cancelled(event: Option<Res<CurrentEvent>>) -> bool {
    is_kind(&event, EventKind::CandidateCancelled)
}

fn is_rider_cancel(event: Option<Res<CurrentEvent>>) -> bool {
    is_kind(&event, EventKind::RiderCancel)
}

fn is_search_deadline(event: Option<Res<CurrentEvent>>) -> bool {
    is_kind(&event, EventKind::SearchDeadline)
}

fn is_trip_started(event: Option<Res<CurrentEvent>>) -> bool {
    is_kind(&event, EventKind::TripStarted)
}

fn is_trip_completed(event: Option<Res<CurrentEvent>>) -> bool {
    is_kind(&event, EventKind::TripCompleted)
}

/// Builds the coordinator schedule: one gated system per event kind, then
/// [apply_deferred].
pub fn match_schedule() -> Schedule {
    let mut schedule = Schedule::default();
    schedule.add_systems((
        search_system.run_if(is_search_candidates),
        offer_accepted_system.run_if(is_offer_accepted),
        offer_declined_system.run_if(is_offer_declined),
        offer_timeout_system.run_if(is_offer_timeout),
        candidate_cancel_system.run_if(is_candidate_cancelled),
        rider_cancel_system.run_if(is_rider_cancel),
        search_deadline_system.run_if(is_search_deadline),
        trip_started_system.run_if(is_trip_started),
        trip_completed_system.run_if(is_trip_completed),
        apply_deferred,
    ));
    schedule
}

/// Runs one step: pops the next event, inserts it as [CurrentEvent], then runs
/// the schedule. Returns `false` if the clock was empty.
pub fn run_next_event(world: &mut World, schedule: &mut Schedule) -> bool {
    let event = match world.resource_mut::<SimulationClock>().pop_next() {
        Some(e) => e,
        None => return false,
    };
    world.insert_resource(CurrentEvent(event));
    schedule.run(world);
    true
}

/// Processes every event due at or before `until_ms`, then moves the clock to
/// `until_ms`. Returns the number of steps executed.
pub fn run_due(world: &mut World, schedule: &mut Schedule, until_ms: u64) -> usize {
    let mut steps = 0;
    loop {
        let due = world
            .resource::<SimulationClock>()
            .next_event_time()
            .is_some_and(|ts| ts <= until_ms);
        if !due || !run_next_event(world, schedule) {
            break;
        }
        steps += 1;
    }
    world.resource_mut::<SimulationClock>().advance_to(until_ms);
    steps
}
