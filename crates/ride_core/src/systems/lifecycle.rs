//! Session transitions shared by several systems: offering, promoting backups,
//! and closing a session with a result.

use bevy_ecs::prelude::Entity;

use crate::clock::{EventKind, EventSubject, SimulationClock, ONE_SEC_MS};
use crate::config::MatchingConfig;
use crate::ecs::{
    BackupEntry, BackupStatus, FailureReason, MatchResult, MatchResults, MatchSession, PendingOffer,
    SessionStatus,
};
use crate::matching::CandidateRanking;
use crate::pool::{Candidate, CandidateId, CandidatePool};
use crate::telemetry::MatchTelemetry;

/// Everything a system needs to move one session forward at the current instant.
pub(crate) struct Coordinator<'a> {
    pub entity: Entity,
    pub now: u64,
    pub pool: &'a dyn CandidatePool,
    pub clock: &'a mut SimulationClock,
    pub config: &'a MatchingConfig,
    pub telemetry: &'a mut MatchTelemetry,
    pub results: &'a mut MatchResults,
}

impl Coordinator<'_> {
    /// Offers an already reserved candidate and arms its timeout.
    pub fn offer(&mut self, session: &mut MatchSession, candidate: Candidate) {
        let expires_at_ms = self
            .now
            .saturating_add(self.config.offer_timeout_secs.saturating_mul(ONE_SEC_MS));
        let id = candidate.id;
        session.offer = Some(PendingOffer {
            candidate: id,
            offered_at_ms: self.now,
            expires_at_ms,
        });
        session.active = Some(candidate);
        session.transition(SessionStatus::Found, self.now);
        self.telemetry.offers_made = self.telemetry.offers_made.saturating_add(1);
        self.clock.schedule_at(
            expires_at_ms,
            EventKind::OfferTimeout,
            Some(EventSubject::Offer(self.entity, id)),
        );
    }

    /// Queues a search round for this session at the current instant.
    pub fn search_now(&mut self) {
        self.clock.schedule_at(
            self.now,
            EventKind::SearchCandidates,
            Some(EventSubject::Session(self.entity)),
        );
    }

    /// Gives the session a fresh `max_search_secs` window from now and arms
    /// its deadline. Earlier deadline events go stale.
    pub fn restart_search_window(&mut self, session: &mut MatchSession) {
        let deadline = self
            .now
            .saturating_add(self.config.max_search_secs.saturating_mul(ONE_SEC_MS));
        session.search_deadline_ms = deadline;
        self.clock.schedule_at(
            deadline,
            EventKind::SearchDeadline,
            Some(EventSubject::Session(self.entity)),
        );
    }

    /// Reserves standbys behind the accepted candidate. The chain holds
    /// `backup_capacity` entries in total, the first being the active one.
    pub fn build_backup_chain(
        &mut self,
        session: &mut MatchSession,
        ranking: &dyn CandidateRanking,
    ) {
        let Some(active) = session.active.clone() else {
            return;
        };
        session.backup_chain.clear();
        session.backup_chain.push(BackupEntry {
            candidate: active.clone(),
            sequence: 1,
            status: BackupStatus::Active,
        });

        let filter = session.filter(self.config);
        let listed: Vec<Candidate> = self
            .pool
            .list_available(&filter)
            .into_iter()
            .filter(|candidate| candidate.id != active.id && !session.is_excluded(candidate.id))
            .collect();
        let ranked = ranking.rank(listed, &session.ranking_context(self.config));

        for candidate in ranked {
            if session.backup_chain.len() >= self.config.backup_capacity {
                break;
            }
            if !self.pool.reserve(candidate.id) {
                self.telemetry.reserve_conflicts =
                    self.telemetry.reserve_conflicts.saturating_add(1);
                continue;
            }
            let sequence = session.backup_chain.len() as u32 + 1;
            session.backup_chain.push(BackupEntry {
                candidate,
                sequence,
                status: BackupStatus::Standby,
            });
        }
        session.candidate_queue.clear();
        tracing::debug!(
            session = %session.id,
            entries = session.backup_chain.len(),
            "backup chain built"
        );
    }

    /// Cancels the active chain entry and offers the next standby. The caller
    /// has already released the cancelled candidate.
    pub fn promote_next_backup(&mut self, session: &mut MatchSession, cancelled: CandidateId) {
        for entry in session
            .backup_chain
            .iter_mut()
            .filter(|entry| entry.status == BackupStatus::Active)
        {
            entry.status = BackupStatus::Cancelled;
        }
        session.cancelled.insert(cancelled);
        session.active = None;
        session.offer = None;
        session.committed_at_ms = None;

        let Some(index) = session.next_standby() else {
            self.fail(session, SessionStatus::Aborted, FailureReason::BackupExhausted);
            return;
        };
        let entry = &mut session.backup_chain[index];
        entry.status = BackupStatus::Active;
        let candidate = entry.candidate.clone();
        tracing::debug!(session = %session.id, candidate = %candidate.id, "backup promoted");
        self.telemetry.backup_promotions = self.telemetry.backup_promotions.saturating_add(1);
        self.offer(session, candidate);
    }

    /// Returns standby holds to the pool and drops them from the chain.
    pub fn release_standbys(&mut self, session: &mut MatchSession) {
        for entry in &session.backup_chain {
            if entry.status == BackupStatus::Standby {
                self.pool.release(entry.candidate.id);
            }
        }
        session
            .backup_chain
            .retain(|entry| entry.status != BackupStatus::Standby);
    }

    /// Releases every hold, moves the session to a terminal `status` and
    /// publishes the failure.
    pub fn fail(
        &mut self,
        session: &mut MatchSession,
        status: SessionStatus,
        reason: FailureReason,
    ) {
        if let Some(active) = session.active.take() {
            self.pool.release(active.id);
        }
        self.release_standbys(session);
        session.offer = None;
        session.candidate_queue.clear();
        session.failure = Some(reason.clone());
        session.transition(status, self.now);

        tracing::info!(session = %session.id, ?status, ?reason, "match session failed");
        self.telemetry.record_failure(&reason);
        self.results.push(MatchResult::Failed {
            session_id: session.id,
            quote_id: session.quote_id,
            status,
            reason,
            at_ms: self.now,
        });
    }

    /// Releases the assigned candidate and publishes the committed result.
    pub fn complete(&mut self, session: &mut MatchSession) {
        let Some(candidate) = session.active.clone() else {
            return;
        };
        self.pool.release(candidate.id);
        self.release_standbys(session);
        session.transition(SessionStatus::Completed, self.now);

        tracing::info!(
            session = %session.id,
            candidate = %candidate.id,
            fare = session.fare,
            "match session completed"
        );
        self.telemetry.record_completed();
        self.results.push(MatchResult::Assigned {
            session_id: session.id,
            quote_id: session.quote_id,
            candidate,
            fare: session.fare,
            committed_at_ms: session.committed_at_ms.unwrap_or(self.now),
            completed_at_ms: self.now,
        });
    }
}
