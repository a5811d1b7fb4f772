//! Telemetry: running counters for quotes and match sessions.

use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::ecs::FailureReason;

/// Outcome counters, keyed by terminal reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub completed: u64,
    pub no_candidates: u64,
    pub backup_exhausted: u64,
    pub rider_cancelled: u64,
    pub search_timed_out: u64,
    pub reallocation_failed: u64,
}

/// Collects coordinator telemetry. All counters saturate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Resource)]
pub struct MatchTelemetry {
    pub quotes_issued: u64,
    pub quotes_rejected: u64,
    pub sessions_opened: u64,
    pub search_rounds: u64,
    pub offers_made: u64,
    pub offers_accepted: u64,
    pub offers_declined: u64,
    pub offers_timed_out: u64,
    /// Reservations lost to another session between listing and reserving.
    pub reserve_conflicts: u64,
    pub candidate_cancellations: u64,
    pub backup_promotions: u64,
    pub reallocations: u64,
    pub outcomes: OutcomeCounts,
}

impl MatchTelemetry {
    pub fn record_failure(&mut self, reason: &FailureReason) {
        let counter = match reason {
            FailureReason::NoCandidatesAvailable => &mut self.outcomes.no_candidates,
            FailureReason::BackupExhausted => &mut self.outcomes.backup_exhausted,
            FailureReason::RiderCancelled { .. } => &mut self.outcomes.rider_cancelled,
            FailureReason::SearchTimedOut => &mut self.outcomes.search_timed_out,
            FailureReason::ReallocationFailed => &mut self.outcomes.reallocation_failed,
        };
        *counter = counter.saturating_add(1);
    }

    pub fn record_completed(&mut self) {
        self.outcomes.completed = self.outcomes.completed.saturating_add(1);
    }

    /// Sessions that reached a terminal state.
    pub fn sessions_closed(&self) -> u64 {
        let o = &self.outcomes;
        [
            o.completed,
            o.no_candidates,
            o.backup_exhausted,
            o.rider_cancelled,
            o.search_timed_out,
            o.reallocation_failed,
        ]
        .iter()
        .fold(0u64, |acc, n| acc.saturating_add(*n))
    }

    /// Adds another shard's counters into this one.
    pub fn merge(&mut self, other: &MatchTelemetry) {
        let pairs = [
            (&mut self.quotes_issued, other.quotes_issued),
            (&mut self.quotes_rejected, other.quotes_rejected),
            (&mut self.sessions_opened, other.sessions_opened),
            (&mut self.search_rounds, other.search_rounds),
            (&mut self.offers_made, other.offers_made),
            (&mut self.offers_accepted, other.offers_accepted),
            (&mut self.offers_declined, other.offers_declined),
            (&mut self.offers_timed_out, other.offers_timed_out),
            (&mut self.reserve_conflicts, other.reserve_conflicts),
            (&mut self.candidate_cancellations, other.candidate_cancellations),
            (&mut self.backup_promotions, other.backup_promotions),
            (&mut self.reallocations, other.reallocations),
            (&mut self.outcomes.completed, other.outcomes.completed),
            (&mut self.outcomes.no_candidates, other.outcomes.no_candidates),
            (&mut self.outcomes.backup_exhausted, other.outcomes.backup_exhausted),
            (&mut self.outcomes.rider_cancelled, other.outcomes.rider_cancelled),
            (&mut self.outcomes.search_timed_out, other.outcomes.search_timed_out),
            (&mut self.outcomes.reallocation_failed, other.outcomes.reallocation_failed),
        ];
        for (mine, theirs) in pairs {
            *mine = mine.saturating_add(theirs);
        }
    }
}
