mod support;

use ride_core::ecs::{Decision, FailureReason, MatchResult, SessionId, SessionStatus};
use ride_core::error::MatchError;
use ride_core::fare::VehicleClass;
use ride_core::pool::CandidateId;
use ride_core::test_helpers::ranked_driver_pool;
use support::{engine_with, open_scheduled_session, open_session, status};

#[test]
fn cancel_before_acceptance_restores_the_pool() {
    let (mut engine, pool) = engine_with(ranked_driver_pool(3, VehicleClass::Mini));
    let session = open_session(&mut engine);
    assert_eq!(pool.available_count(), 2);

    engine
        .match_cancel(session, "found another ride")
        .expect("cancel");

    assert_eq!(status(&engine, session), SessionStatus::Aborted);
    assert_eq!(pool.available_count(), 3);
    match engine.take_result(session) {
        Some(MatchResult::Failed { reason, .. }) => assert_eq!(
            reason,
            FailureReason::RiderCancelled {
                note: "found another ride".into()
            }
        ),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(engine.telemetry().outcomes.rider_cancelled, 1);
}

#[test]
fn cancel_after_acceptance_releases_the_whole_chain() {
    let (mut engine, pool) = engine_with(ranked_driver_pool(4, VehicleClass::Mini));
    let session = open_scheduled_session(&mut engine, 7_200_000);
    engine
        .match_respond(session, CandidateId(1), Decision::Accept)
        .expect("accept");
    assert_eq!(pool.available_count(), 1);

    engine.match_cancel(session, "plans changed").expect("cancel");
    assert_eq!(pool.available_count(), 4);
    assert!(engine.match_status(session).expect("status").backup_chain.iter().all(
        |entry| entry.status != ride_core::ecs::BackupStatus::Standby
    ));
}

#[test]
fn cancel_is_rejected_once_the_trip_started() {
    let (mut engine, _pool) = engine_with(ranked_driver_pool(1, VehicleClass::Mini));
    let session = open_session(&mut engine);
    engine
        .match_respond(session, CandidateId(1), Decision::Accept)
        .expect("accept");
    engine.trip_started(session).expect("start");

    assert_eq!(
        engine.match_cancel(session, "too late"),
        Err(MatchError::InvalidTransition {
            session,
            status: SessionStatus::InProgress,
            action: "cancel",
        })
    );
}

#[test]
fn cancel_of_unknown_session_fails() {
    let (mut engine, _pool) = engine_with(ranked_driver_pool(1, VehicleClass::Mini));
    assert_eq!(
        engine.match_cancel(SessionId(77), "?"),
        Err(MatchError::SessionNotFound(SessionId(77)))
    );
}
