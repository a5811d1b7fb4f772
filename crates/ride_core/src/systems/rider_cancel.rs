use bevy_ecs::prelude::{Query, Res, ResMut};

use crate::clock::{CurrentEvent, EventKind, SimulationClock};
use crate::config::MatchingConfig;
use crate::ecs::{CancelRequest, FailureReason, MatchResults, MatchSession, SessionStatus};
use crate::pool::CandidatePoolResource;
use crate::telemetry::MatchTelemetry;

use super::lifecycle::Coordinator;

/// Rider withdrew the request. Honored in any state before the trip starts;
/// every held candidate goes back to the pool.
#[allow(clippy::too_many_arguments)]
pub fn rider_cancel_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<SimulationClock>,
    config: Res<MatchingConfig>,
    pool: Res<CandidatePoolResource>,
    mut telemetry: ResMut<MatchTelemetry>,
    mut results: ResMut<MatchResults>,
    mut sessions: Query<(&mut MatchSession, Option<&CancelRequest>)>,
) {
    if event.0.kind != EventKind::RiderCancel {
        return;
    }
    let Some(subject) = event.0.subject else {
        return;
    };
    let entity = subject.session();
    let Ok((mut session, request)) = sessions.get_mut(entity) else {
        return;
    };
    if !session.status.is_rider_cancellable() {
        return;
    }

    let note = request.map(|r| r.0.clone()).unwrap_or_default();
    let mut coordinator = Coordinator {
        entity,
        now: clock.now(),
        pool: &**pool,
        clock: &mut clock,
        config: &config,
        telemetry: &mut telemetry,
        results: &mut results,
    };
    coordinator.fail(
        &mut session,
        SessionStatus::Aborted,
        FailureReason::RiderCancelled { note },
    );
}
