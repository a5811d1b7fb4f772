#![allow(dead_code)]

use std::sync::Arc;

use ride_core::ecs::{MatchRequest, SessionId, SessionSnapshot, SessionStatus};
use ride_core::engine::RideEngine;
use ride_core::fare::{QuoteRequest, VehicleClass};
use ride_core::pool::{CandidateId, SharedCandidatePool};
use ride_core::quotes::Quote;
use ride_core::test_helpers::{test_cell, test_distant_cell, test_engine};

/// The reference trip: mini, 10 km, 30 min. Quotes 240 solo, 150 shared.
pub fn mini_trip() -> QuoteRequest {
    QuoteRequest::new(VehicleClass::Mini, 10.0, 30.0)
}

/// Engine over `pool` plus a handle to the same pool for assertions.
pub fn engine_with(pool: Arc<SharedCandidatePool>) -> (RideEngine, Arc<SharedCandidatePool>) {
    (test_engine(Arc::clone(&pool)), pool)
}

pub fn quote(engine: &mut RideEngine, shared: bool) -> Quote {
    engine
        .quote(&mini_trip().shared(shared))
        .expect("reference trip quotes")
}

pub fn ride_request(quote: &Quote) -> MatchRequest {
    MatchRequest::new(quote.id, test_cell(), test_distant_cell())
}

/// Quotes the reference trip and opens a session for it.
pub fn open_session(engine: &mut RideEngine) -> SessionId {
    let quote = quote(engine, false);
    engine
        .request_match(ride_request(&quote))
        .expect("session opens")
}

pub fn open_scheduled_session(engine: &mut RideEngine, pickup_at_ms: u64) -> SessionId {
    let quote = quote(engine, false);
    engine
        .request_match(ride_request(&quote).scheduled(pickup_at_ms))
        .expect("session opens")
}

pub fn snapshot(engine: &RideEngine, session: SessionId) -> SessionSnapshot {
    engine.match_status(session).expect("session exists")
}

pub fn status(engine: &RideEngine, session: SessionId) -> SessionStatus {
    snapshot(engine, session).status
}

/// Candidate holding the pending offer or assignment.
pub fn active(engine: &RideEngine, session: SessionId) -> CandidateId {
    snapshot(engine, session)
        .active
        .map(|candidate| candidate.id)
        .expect("session has an active candidate")
}
