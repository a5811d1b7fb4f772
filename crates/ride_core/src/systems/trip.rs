use bevy_ecs::prelude::{Query, Res, ResMut};

use crate::clock::{CurrentEvent, EventKind, SimulationClock};
use crate::config::MatchingConfig;
use crate::ecs::{MatchResults, MatchSession, SessionStatus};
use crate::pool::CandidatePoolResource;
use crate::telemetry::MatchTelemetry;

use super::lifecycle::Coordinator;

/// Pickup happened: the assignment is frozen and standby holds are released.
#[allow(clippy::too_many_arguments)]
pub fn trip_started_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<SimulationClock>,
    config: Res<MatchingConfig>,
    pool: Res<CandidatePoolResource>,
    mut telemetry: ResMut<MatchTelemetry>,
    mut results: ResMut<MatchResults>,
    mut sessions: Query<&mut MatchSession>,
) {
    if event.0.kind != EventKind::TripStarted {
        return;
    }
    let Some(subject) = event.0.subject else {
        return;
    };
    let entity = subject.session();
    let Ok(mut session) = sessions.get_mut(entity) else {
        return;
    };
    if session.status != SessionStatus::Accepted {
        return;
    }

    let mut coordinator = Coordinator {
        entity,
        now: clock.now(),
        pool: &**pool,
        clock: &mut clock,
        config: &config,
        telemetry: &mut telemetry,
        results: &mut results,
    };
    coordinator.release_standbys(&mut session);
    session.candidate_queue.clear();
    session.transition(SessionStatus::InProgress, coordinator.now);
}

#[allow(clippy::too_many_arguments)]
pub fn trip_completed_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<SimulationClock>,
    config: Res<MatchingConfig>,
    pool: Res<CandidatePoolResource>,
    mut telemetry: ResMut<MatchTelemetry>,
    mut results: ResMut<MatchResults>,
    mut sessions: Query<&mut MatchSession>,
) {
    if event.0.kind != EventKind::TripCompleted {
        return;
    }
    let Some(subject) = event.0.subject else {
        return;
    };
    let entity = subject.session();
    let Ok(mut session) = sessions.get_mut(entity) else {
        return;
    };
    if session.status != SessionStatus::InProgress {
        return;
    }

    let mut coordinator = Coordinator {
        entity,
        now: clock.now(),
        pool: &**pool,
        clock: &mut clock,
        config: &config,
        telemetry: &mut telemetry,
        results: &mut results,
    };
    coordinator.complete(&mut session);
}
