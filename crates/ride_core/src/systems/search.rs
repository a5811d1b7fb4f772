use bevy_ecs::prelude::{Query, Res, ResMut};

use crate::clock::{CurrentEvent, EventKind, EventSubject, SimulationClock};
use crate::config::MatchingConfig;
use crate::ecs::{FailureReason, MatchResults, MatchSession, SessionStatus};
use crate::matching::RankingResource;
use crate::pool::{Candidate, CandidatePoolResource};
use crate::telemetry::MatchTelemetry;

use super::lifecycle::Coordinator;

/// One search round: list, rank, then reserve the best candidate and offer it.
///
/// Reservations lost to other sessions fall through to the next-ranked
/// candidate, up to `max_reserve_attempts`; after that the round is retried
/// later instead of failing the session.
#[allow(clippy::too_many_arguments)]
pub fn search_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<SimulationClock>,
    config: Res<MatchingConfig>,
    pool: Res<CandidatePoolResource>,
    ranking: Res<RankingResource>,
    mut telemetry: ResMut<MatchTelemetry>,
    mut results: ResMut<MatchResults>,
    mut sessions: Query<&mut MatchSession>,
) {
    if event.0.kind != EventKind::SearchCandidates {
        return;
    }
    let Some(subject) = event.0.subject else {
        return;
    };
    let entity = subject.session();
    let Ok(mut session) = sessions.get_mut(entity) else {
        return;
    };
    let status = session.status;
    if !matches!(status, SessionStatus::Searching | SessionStatus::Reallocating) {
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

    if coordinator.now >= session.search_deadline_ms {
        coordinator.fail(&mut session, SessionStatus::Expired, FailureReason::SearchTimedOut);
        return;
    }

    session.search_rounds = session.search_rounds.saturating_add(1);
    coordinator.telemetry.search_rounds = coordinator.telemetry.search_rounds.saturating_add(1);

    let filter = session.filter(coordinator.config);
    let listed: Vec<Candidate> = coordinator
        .pool
        .list_available(&filter)
        .into_iter()
        .filter(|candidate| !session.is_excluded(candidate.id))
        .collect();

    if listed.is_empty() {
        let (terminal, reason) = match status {
            SessionStatus::Reallocating => {
                (SessionStatus::Expired, FailureReason::ReallocationFailed)
            }
            _ => (SessionStatus::Aborted, FailureReason::NoCandidatesAvailable),
        };
        coordinator.fail(&mut session, terminal, reason);
        return;
    }

    let ranked = ranking.rank(listed, &session.ranking_context(coordinator.config));
    let mut ranked = ranked.into_iter();
    for _ in 0..coordinator.config.max_reserve_attempts {
        let Some(candidate) = ranked.next() else {
            break;
        };
        if coordinator.pool.reserve(candidate.id) {
            session.candidate_queue = ranked.collect();
            coordinator.offer(&mut session, candidate);
            return;
        }
        tracing::warn!(
            session = %session.id,
            candidate = %candidate.id,
            "candidate reserved elsewhere, trying next"
        );
        coordinator.telemetry.reserve_conflicts =
            coordinator.telemetry.reserve_conflicts.saturating_add(1);
    }

    session.candidate_queue.clear();
    let retry_secs = coordinator.config.search_retry_secs;
    coordinator.clock.schedule_in_secs(
        retry_secs,
        EventKind::SearchCandidates,
        Some(EventSubject::Session(entity)),
    );
}
