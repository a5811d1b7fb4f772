use bevy_ecs::prelude::{Query, Res, ResMut};

use crate::clock::{CurrentEvent, EventKind, EventSubject, SimulationClock};
use crate::config::MatchingConfig;
use crate::ecs::{MatchResults, MatchSession, SessionStatus};
use crate::matching::RankingResource;
use crate::pool::{CandidateId, CandidatePoolResource};
use crate::telemetry::MatchTelemetry;

use super::lifecycle::Coordinator;

/// Candidate confirmed the pending offer. Scheduled rides get their backup
/// chain on first acceptance.
#[allow(clippy::too_many_arguments)]
pub fn offer_accepted_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<SimulationClock>,
    config: Res<MatchingConfig>,
    pool: Res<CandidatePoolResource>,
    ranking: Res<RankingResource>,
    mut telemetry: ResMut<MatchTelemetry>,
    mut results: ResMut<MatchResults>,
    mut sessions: Query<&mut MatchSession>,
) {
    if event.0.kind != EventKind::OfferAccepted {
        return;
    }
    let Some(EventSubject::Offer(entity, candidate)) = event.0.subject else {
        return;
    };
    let Ok(mut session) = sessions.get_mut(entity) else {
        return;
    };
    if !has_pending_offer(&session, candidate) {
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
    session.offer = None;
    session.committed_at_ms = Some(coordinator.now);
    session.transition(SessionStatus::Accepted, coordinator.now);
    coordinator.telemetry.offers_accepted = coordinator.telemetry.offers_accepted.saturating_add(1);

    if session.is_scheduled() && !session.has_backup_chain() {
        coordinator.build_backup_chain(&mut session, &**ranking);
    }
}

/// Candidate turned the offer down.
#[allow(clippy::too_many_arguments)]
pub fn offer_declined_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<SimulationClock>,
    config: Res<MatchingConfig>,
    pool: Res<CandidatePoolResource>,
    mut telemetry: ResMut<MatchTelemetry>,
    mut results: ResMut<MatchResults>,
    mut sessions: Query<&mut MatchSession>,
) {
    if event.0.kind != EventKind::OfferDeclined {
        return;
    }
    let Some(EventSubject::Offer(entity, candidate)) = event.0.subject else {
        return;
    };
    let Ok(mut session) = sessions.get_mut(entity) else {
        return;
    };
    if !has_pending_offer(&session, candidate) {
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
    coordinator.telemetry.offers_declined = coordinator.telemetry.offers_declined.saturating_add(1);
    reject_offer(&mut coordinator, &mut session, candidate);
}

/// Offer went unanswered. Treated exactly like a decline.
#[allow(clippy::too_many_arguments)]
pub fn offer_timeout_system(
    event: Res<CurrentEvent>,
    mut clock: ResMut<SimulationClock>,
    config: Res<MatchingConfig>,
    pool: Res<CandidatePoolResource>,
    mut telemetry: ResMut<MatchTelemetry>,
    mut results: ResMut<MatchResults>,
    mut sessions: Query<&mut MatchSession>,
) {
    if event.0.kind != EventKind::OfferTimeout {
        return;
    }
    let Some(EventSubject::Offer(entity, candidate)) = event.0.subject else {
        return;
    };
    let Ok(mut session) = sessions.get_mut(entity) else {
        return;
    };
    // A timeout armed for an earlier offer is stale once that offer resolved.
    let armed_for_this_offer = session.offer.is_some_and(|offer| {
        offer.candidate == candidate && offer.expires_at_ms == event.0.timestamp
    });
    if !has_pending_offer(&session, candidate) || !armed_for_this_offer {
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
    tracing::debug!(session = %session.id, %candidate, "offer timed out");
    coordinator.telemetry.offers_timed_out =
        coordinator.telemetry.offers_timed_out.saturating_add(1);
    reject_offer(&mut coordinator, &mut session, candidate);
}

fn has_pending_offer(session: &MatchSession, candidate: CandidateId) -> bool {
    session.status == SessionStatus::Found
        && session
            .offer
            .is_some_and(|offer| offer.candidate == candidate)
}

/// Frees the candidate and moves on. A promoted backup that declines counts
/// as a cancellation of its chain entry; otherwise the session searches again
/// without that candidate.
fn reject_offer(
    coordinator: &mut Coordinator<'_>,
    session: &mut MatchSession,
    candidate: CandidateId,
) {
    coordinator.pool.release(candidate);
    session.offer = None;

    if session.has_backup_chain() {
        coordinator.telemetry.candidate_cancellations =
            coordinator.telemetry.candidate_cancellations.saturating_add(1);
        coordinator.promote_next_backup(session, candidate);
        return;
    }

    session.active = None;
    session.declined.insert(candidate);
    session.transition(SessionStatus::Declined, coordinator.now);
    session.transition(SessionStatus::Searching, coordinator.now);
    coordinator.search_now();
}
