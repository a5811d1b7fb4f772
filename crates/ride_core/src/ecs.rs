use std::collections::{BTreeSet, HashMap};
use std::fmt;

use bevy_ecs::prelude::{Component, Resource};
use h3o::CellIndex;
use serde::{Deserialize, Serialize};

use crate::config::MatchingConfig;
use crate::fare::VehicleClass;
use crate::matching::RankingContext;
use crate::pool::{Accommodations, Candidate, CandidateFilter, CandidateId, CandidateRole, Gender};
use crate::quotes::{Quote, QuoteId};
use crate::spatial::cell_serde;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Searching,
    Found,
    Accepted,
    InProgress,
    Completed,
    Declined,
    DriverCancelled,
    Reallocating,
    Expired,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Expired | SessionStatus::Aborted
        )
    }

    /// Riders may cancel at any point before the trip starts.
    pub fn is_rider_cancellable(self) -> bool {
        !self.is_terminal() && self != SessionStatus::InProgress
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenderPolicy {
    #[default]
    Any,
    SameGender(Gender),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideTiming {
    #[default]
    Now,
    Scheduled { pickup_at_ms: u64 },
}

impl RideTiming {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, RideTiming::Scheduled { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Decline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub quote_id: QuoteId,
    #[serde(with = "cell_serde")]
    pub pickup: CellIndex,
    #[serde(with = "cell_serde")]
    pub dropoff: CellIndex,
    #[serde(default)]
    pub accommodations: Accommodations,
    #[serde(default = "default_role")]
    pub role: CandidateRole,
    #[serde(default)]
    pub gender_policy: GenderPolicy,
    #[serde(default)]
    pub timing: RideTiming,
    /// Offered first when it passes the filter (e.g. a favorite driver).
    #[serde(default)]
    pub preferred_candidate: Option<CandidateId>,
}

fn default_role() -> CandidateRole {
    CandidateRole::Driver
}

impl MatchRequest {
    pub fn new(quote_id: QuoteId, pickup: CellIndex, dropoff: CellIndex) -> Self {
        Self {
            quote_id,
            pickup,
            dropoff,
            accommodations: Accommodations::default(),
            role: default_role(),
            gender_policy: GenderPolicy::Any,
            timing: RideTiming::Now,
            preferred_candidate: None,
        }
    }

    pub fn with_role(mut self, role: CandidateRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_accommodations(mut self, accommodations: Accommodations) -> Self {
        self.accommodations = accommodations;
        self
    }

    pub fn with_gender_policy(mut self, policy: GenderPolicy) -> Self {
        self.gender_policy = policy;
        self
    }

    pub fn scheduled(mut self, pickup_at_ms: u64) -> Self {
        self.timing = RideTiming::Scheduled { pickup_at_ms };
        self
    }

    pub fn with_preferred_candidate(mut self, candidate: CandidateId) -> Self {
        self.preferred_candidate = Some(candidate);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOffer {
    pub candidate: CandidateId,
    pub offered_at_ms: u64,
    pub expires_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Active,
    Standby,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub candidate: Candidate,
    /// 1-based position in the chain.
    pub sequence: u32,
    pub status: BackupStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub at_ms: u64,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    NoCandidatesAvailable,
    BackupExhausted,
    RiderCancelled { note: String },
    SearchTimedOut,
    ReallocationFailed,
}

/// Rider-supplied cancellation note, attached to a session just before its
/// `RiderCancel` event is processed.
#[derive(Debug, Clone, Component)]
pub struct CancelRequest(pub String);

/// Per-request matching state. Owned by the coordinator; only systems mutate it.
#[derive(Debug, Clone, Component)]
pub struct MatchSession {
    pub id: SessionId,
    pub quote_id: QuoteId,
    /// Binding fare from the quote.
    pub fare: u64,
    pub vehicle_class: VehicleClass,
    pub is_shared: bool,
    pub request: MatchRequest,
    pub status: SessionStatus,
    /// Ranked candidates left over from the latest search round.
    pub candidate_queue: Vec<Candidate>,
    pub active: Option<Candidate>,
    pub offer: Option<PendingOffer>,
    pub backup_chain: Vec<BackupEntry>,
    pub declined: BTreeSet<CandidateId>,
    pub cancelled: BTreeSet<CandidateId>,
    pub created_at_ms: u64,
    pub search_deadline_ms: u64,
    pub search_rounds: u32,
    pub committed_at_ms: Option<u64>,
    pub history: Vec<StatusChange>,
    pub failure: Option<FailureReason>,
}

impl MatchSession {
    pub fn new(
        id: SessionId,
        quote: &Quote,
        request: MatchRequest,
        now_ms: u64,
        max_search_ms: u64,
    ) -> Self {
        Self {
            id,
            quote_id: quote.id,
            fare: quote.total_fare(),
            vehicle_class: quote.fare.vehicle_class,
            is_shared: quote.fare.is_shared,
            request,
            status: SessionStatus::Searching,
            candidate_queue: Vec::new(),
            active: None,
            offer: None,
            backup_chain: Vec::new(),
            declined: BTreeSet::new(),
            cancelled: BTreeSet::new(),
            created_at_ms: now_ms,
            search_deadline_ms: now_ms.saturating_add(max_search_ms),
            search_rounds: 0,
            committed_at_ms: None,
            history: vec![StatusChange {
                at_ms: now_ms,
                status: SessionStatus::Searching,
            }],
            failure: None,
        }
    }

    pub fn transition(&mut self, status: SessionStatus, at_ms: u64) {
        tracing::debug!(
            session = %self.id,
            from = ?self.status,
            to = ?status,
            at_ms,
            "session transition"
        );
        self.status = status;
        self.history.push(StatusChange { at_ms, status });
    }

    pub fn is_scheduled(&self) -> bool {
        self.request.timing.is_scheduled()
    }

    pub fn active_id(&self) -> Option<CandidateId> {
        self.active.as_ref().map(|candidate| candidate.id)
    }

    /// Declined and cancelled candidates are never offered again in this session.
    pub fn is_excluded(&self, id: CandidateId) -> bool {
        self.declined.contains(&id) || self.cancelled.contains(&id)
    }

    pub fn has_backup_chain(&self) -> bool {
        !self.backup_chain.is_empty()
    }

    pub fn next_standby(&self) -> Option<usize> {
        self.backup_chain
            .iter()
            .position(|entry| entry.status == BackupStatus::Standby)
    }

    pub fn filter(&self, config: &MatchingConfig) -> CandidateFilter {
        let gender = match self.request.gender_policy {
            GenderPolicy::Any => None,
            GenderPolicy::SameGender(gender) => Some(gender),
        };
        let vehicle_class = match self.request.role {
            CandidateRole::Driver => Some(self.vehicle_class),
            CandidateRole::CoPassenger => None,
        };
        CandidateFilter {
            role: self.request.role,
            pickup: self.request.pickup,
            vehicle_class,
            required: self.request.accommodations.required_capabilities(),
            gender,
            match_radius: config.match_radius,
            eta_speed_kmh: config.eta_speed_kmh,
        }
    }

    pub fn ranking_context(&self, config: &MatchingConfig) -> RankingContext {
        RankingContext {
            shared: self.is_shared,
            accommodations: self.request.accommodations,
            preferred: self.request.preferred_candidate,
            seed: config
                .seed
                .wrapping_add(self.id.0)
                .wrapping_add(u64::from(self.search_rounds) << 32),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            quote_id: self.quote_id,
            status: self.status,
            role: self.request.role,
            timing: self.request.timing,
            fare: self.fare,
            active: self.active.clone(),
            offer: self.offer,
            candidate_queue: self.candidate_queue.iter().map(|c| c.id).collect(),
            backup_chain: self.backup_chain.clone(),
            declined: self.declined.iter().copied().collect(),
            cancelled: self.cancelled.iter().copied().collect(),
            search_deadline_ms: self.search_deadline_ms,
            history: self.history.clone(),
            failure: self.failure.clone(),
        }
    }
}

/// Read-only view of a session for callers polling its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub quote_id: QuoteId,
    pub status: SessionStatus,
    pub role: CandidateRole,
    pub timing: RideTiming,
    pub fare: u64,
    pub active: Option<Candidate>,
    pub offer: Option<PendingOffer>,
    pub candidate_queue: Vec<CandidateId>,
    pub backup_chain: Vec<BackupEntry>,
    pub declined: Vec<CandidateId>,
    pub cancelled: Vec<CandidateId>,
    pub search_deadline_ms: u64,
    pub history: Vec<StatusChange>,
    pub failure: Option<FailureReason>,
}

impl SessionSnapshot {
    pub fn passed_through(&self, status: SessionStatus) -> bool {
        self.history.iter().any(|change| change.status == status)
    }

    /// Candidates this session holds in the pool: the active one, then standbys.
    pub fn held_candidates(&self) -> Vec<CandidateId> {
        let mut held: Vec<CandidateId> = self.active.iter().map(|c| c.id).collect();
        held.extend(
            self.backup_chain
                .iter()
                .filter(|entry| entry.status == BackupStatus::Standby)
                .map(|entry| entry.candidate.id),
        );
        held
    }

    /// Number of chain entries currently marked active. Never more than one.
    pub fn active_assignments(&self) -> usize {
        self.backup_chain
            .iter()
            .filter(|entry| entry.status == BackupStatus::Active)
            .count()
    }
}

/// Final outcome of a session, delivered once it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchResult {
    Assigned {
        session_id: SessionId,
        quote_id: QuoteId,
        candidate: Candidate,
        fare: u64,
        committed_at_ms: u64,
        completed_at_ms: u64,
    },
    Failed {
        session_id: SessionId,
        quote_id: QuoteId,
        status: SessionStatus,
        reason: FailureReason,
        at_ms: u64,
    },
}

impl MatchResult {
    pub fn session_id(&self) -> SessionId {
        match self {
            MatchResult::Assigned { session_id, .. } | MatchResult::Failed { session_id, .. } => {
                *session_id
            }
        }
    }
}

/// Results of sessions that reached a terminal state, waiting to be taken by the caller.
#[derive(Debug, Default, Resource)]
pub struct MatchResults(pub HashMap<SessionId, MatchResult>);

impl MatchResults {
    pub fn push(&mut self, result: MatchResult) {
        self.0.insert(result.session_id(), result);
    }

    pub fn take(&mut self, session: SessionId) -> Option<MatchResult> {
        self.0.remove(&session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_not_rider_cancellable() {
        for status in [
            SessionStatus::Completed,
            SessionStatus::Expired,
            SessionStatus::Aborted,
            SessionStatus::InProgress,
        ] {
            assert!(!status.is_rider_cancellable(), "{status:?}");
        }
        for status in [
            SessionStatus::Searching,
            SessionStatus::Found,
            SessionStatus::Accepted,
            SessionStatus::Reallocating,
        ] {
            assert!(status.is_rider_cancellable(), "{status:?}");
        }
    }

    #[test]
    fn failure_reason_serializes_with_tag() {
        let json = serde_json::to_string(&FailureReason::BackupExhausted).expect("json");
        assert_eq!(json, r#"{"reason":"backup_exhausted"}"#);
    }
}
