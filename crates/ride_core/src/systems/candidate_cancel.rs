use bevy_ecs::prelude::{Query, Res, ResMut};

use crate::clock::{CurrentEvent, EventKind, EventSubject, SimulationClock};
use crate::config::MatchingConfig;
use crate::ecs::{MatchResults, MatchSession, SessionStatus};
use crate::pool::CandidatePoolResource;
use crate::telemetry::MatchTelemetry;

use super::lifecycle::Coordinator;

/// The assigned candidate backed out after accepting.
///
/// Scheduled rides fall back on their backup chain. Immediate rides go
/// through `driver_cancelled` into `reallocating` and search again with a
/// fresh search window.
#[allow(clippy::too_many_arguments)]
pub fn candidate_cancel_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<SimulationClock>,
    config: Res<MatchingConfig>,
    pool: Res<CandidatePoolResource>,
    mut telemetry: ResMut<MatchTelemetry>,
    mut results: ResMut<MatchResults>,
    mut sessions: Query<&mut MatchSession>,
) {
    if event.0.kind != EventKind::CandidateCancelled {
        return;
    }
    let Some(EventSubject::Offer(entity, candidate)) = event.0.subject else {
        return;
    };
    let Ok(mut session) = sessions.get_mut(entity) else {
        return;
    };
    if session.active_id() != Some(candidate) || !candidate_may_cancel(&session) {
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
    tracing::debug!(session = %session.id, %candidate, "candidate cancelled");
    coordinator.pool.release(candidate);
    coordinator.telemetry.candidate_cancellations =
        coordinator.telemetry.candidate_cancellations.saturating_add(1);

    if session.has_backup_chain() {
        coordinator.promote_next_backup(&mut session, candidate);
        return;
    }

    let now = coordinator.now;
    session.active = None;
    session.offer = None;
    session.committed_at_ms = None;
    session.cancelled.insert(candidate);
    session.transition(SessionStatus::DriverCancelled, now);
    session.transition(SessionStatus::Reallocating, now);
    coordinator.restart_search_window(&mut session);
    coordinator.telemetry.reallocations = coordinator.telemetry.reallocations.saturating_add(1);
    coordinator.search_now();
}

/// Accepted candidates can cancel; so can a promoted backup still confirming.
pub(crate) fn candidate_may_cancel(session: &MatchSession) -> bool {
    match session.status {
        SessionStatus::Accepted => true,
        SessionStatus::Found => session.has_backup_chain(),
        _ => false,
    }
}
