//! Error types for quoting, matching and configuration.

use thiserror::Error;

use crate::ecs::{SessionId, SessionStatus};
use crate::pool::CandidateId;
use crate::quotes::QuoteId;

/// Reasons a quote cannot be produced. Each variant is reported to the caller
/// as-is; none of them are retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FareError {
    #[error("unknown vehicle class `{0}`")]
    UnknownVehicleClass(String),

    #[error("demand multiplier must be a positive number, got {0}")]
    InvalidMultiplier(f64),

    #[error("trip estimate must be positive and finite (distance {distance}, duration {duration})")]
    InvalidTripEstimate { distance: f64, duration: f64 },

    #[error("fare {0} is beyond the largest quotable amount")]
    FareOutOfRange(f64),

    #[error("invalid coupon code `{0}`")]
    InvalidCouponCode(String),

    #[error("coupon `{0}` has expired")]
    ExpiredCoupon(String),

    #[error("coupon `{code}` requires a minimum fare of {min_fare}, quoted fare is {fare}")]
    CouponMinFareNotMet { code: String, min_fare: u64, fare: u64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    #[error("quote {0} not found")]
    QuoteNotFound(QuoteId),

    #[error("quote {0} has expired")]
    QuoteExpired(QuoteId),

    #[error("quote {0} was already used for a match")]
    QuoteAlreadyConsumed(QuoteId),

    #[error("match session {0} not found")]
    SessionNotFound(SessionId),

    #[error("candidate {candidate} does not hold the active offer for session {session}")]
    NotActiveCandidate {
        session: SessionId,
        candidate: CandidateId,
    },

    #[error("cannot {action} session {session} while it is {status:?}")]
    InvalidTransition {
        session: SessionId,
        status: SessionStatus,
        action: &'static str,
    },

    #[error("co-passenger matching and gender policies require a shared-ride quote")]
    SharedRideRequired,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
