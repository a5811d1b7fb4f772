use bevy_ecs::prelude::{Query, Res, ResMut};

use crate::clock::{CurrentEvent, EventKind, SimulationClock};
use crate::config::MatchingConfig;
use crate::ecs::{FailureReason, MatchResults, MatchSession, SessionStatus};
use crate::pool::CandidatePoolResource;
use crate::telemetry::MatchTelemetry;

use super::lifecycle::Coordinator;

/// Expires sessions still looking for a candidate when their deadline fires.
/// A session holding a pending offer is left alone; if that offer lapses, the
/// next search round sees the deadline has passed.
#[allow(clippy::too_many_arguments)]
pub fn search_deadline_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<SimulationClock>,
    config: Res<MatchingConfig>,
    pool: Res<CandidatePoolResource>,
    mut telemetry: ResMut<MatchTelemetry>,
    mut results: ResMut<MatchResults>,
    mut sessions: Query<&mut MatchSession>,
) {
    if event.0.kind != EventKind::SearchDeadline {
        return;
    }
    let Some(subject) = event.0.subject else {
        return;
    };
    let entity = subject.session();
    let Ok(mut session) = sessions.get_mut(entity) else {
        return;
    };
    if !matches!(
        session.status,
        SessionStatus::Searching | SessionStatus::Reallocating
    ) {
        return;
    }
    // Reallocation moves the deadline; the one armed at creation is stale.
    if clock.now() < session.search_deadline_ms {
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
    coordinator.fail(&mut session, SessionStatus::Expired, FailureReason::SearchTimedOut);
}
