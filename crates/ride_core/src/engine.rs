//! In-process API over the fare engine and the matching coordinator.
//!
//! [RideEngine] owns one ECS [World]. Every call validates its input against
//! the current session state, schedules an event at the current engine time,
//! and drains whatever is due. Nothing blocks: offer timeouts and search
//! deadlines only fire when the caller moves time forward with
//! [RideEngine::advance_to] or [RideEngine::advance_by_secs].

use std::collections::HashMap;
use std::sync::Arc;

use bevy_ecs::prelude::{Entity, Schedule, World};
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::catalog::PricingCatalog;
use crate::clock::{EventKind, EventSubject, SimulationClock, ONE_SEC_MS};
use crate::config::{EngineConfig, MatchingConfig};
use crate::ecs::{
    CancelRequest, Decision, GenderPolicy, MatchRequest, MatchResult, MatchResults, MatchSession,
    SessionId, SessionSnapshot, SessionStatus,
};
use crate::error::{ConfigError, FareError, MatchError};
use crate::fare::{QuoteRequest, SharingComparison};
use crate::matching::{CandidateRanking, RankingResource};
use crate::pool::{CandidateId, CandidatePool, CandidatePoolResource, CandidateRole};
use crate::quotes::{Quote, QuoteBook};
use crate::runner::{match_schedule, run_due};
use crate::systems::candidate_cancel::candidate_may_cancel;
use crate::telemetry::MatchTelemetry;

pub struct RideEngine {
    world: World,
    schedule: Schedule,
    epoch: DateTime<Utc>,
    sessions: HashMap<SessionId, Entity>,
    next_session: u64,
}

impl RideEngine {
    pub fn new(config: EngineConfig, pool: Arc<dyn CandidatePool>) -> Result<Self, ConfigError> {
        config.validate()?;
        let epoch = match config.epoch_ms {
            Some(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| ConfigError::Invalid(format!("epoch_ms {ms} is out of range")))?,
            None => Utc::now(),
        };

        let mut world = World::new();
        world.insert_resource(SimulationClock::default());
        world.insert_resource(config.fare.catalog());
        world.insert_resource(config.matching);
        world.insert_resource(QuoteBook::default());
        world.insert_resource(MatchTelemetry::default());
        world.insert_resource(MatchResults::default());
        world.insert_resource(CandidatePoolResource::new(pool));
        world.insert_resource(RankingResource::default());

        Ok(Self {
            world,
            schedule: match_schedule(),
            epoch,
            sessions: HashMap::new(),
            next_session: 0,
        })
    }

    /// Replaces the default nearest-by-ETA ranking.
    pub fn with_ranking(mut self, ranking: Box<dyn CandidateRanking>) -> Self {
        self.world.insert_resource(RankingResource::new(ranking));
        self
    }

    /// Engine time in ms since the epoch.
    pub fn now_ms(&self) -> u64 {
        self.world.resource::<SimulationClock>().now()
    }

    /// Wall-clock time corresponding to [RideEngine::now_ms], clamped to the
    /// latest representable instant.
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = i64::try_from(self.now_ms()).unwrap_or(i64::MAX);
        self.epoch
            .checked_add_signed(Duration::milliseconds(elapsed))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn matching_config(&self) -> MatchingConfig {
        *self.world.resource::<MatchingConfig>()
    }

    pub fn catalog(&self) -> &PricingCatalog {
        self.world.resource::<PricingCatalog>()
    }

    pub fn quote(&mut self, request: &QuoteRequest) -> Result<Quote, FareError> {
        let now = self.now();
        let now_ms = self.now_ms();
        let ttl_ms = self
            .matching_config()
            .quote_ttl_secs
            .saturating_mul(ONE_SEC_MS);

        let priced = self.catalog().quote(request, now);
        let fare = match priced {
            Ok(fare) => fare,
            Err(err) => {
                tracing::debug!(error = %err, class = %request.vehicle_class, "quote rejected");
                let mut telemetry = self.world.resource_mut::<MatchTelemetry>();
                telemetry.quotes_rejected = telemetry.quotes_rejected.saturating_add(1);
                return Err(err);
            }
        };
        let quote = {
            let mut book = self.world.resource_mut::<QuoteBook>();
            book.purge_expired(now_ms);
            book.issue(fare, now, now_ms, ttl_ms)
        };
        let mut telemetry = self.world.resource_mut::<MatchTelemetry>();
        telemetry.quotes_issued = telemetry.quotes_issued.saturating_add(1);
        tracing::debug!(quote = %quote.id, total = quote.total_fare(), "quote issued");
        Ok(quote)
    }

    pub fn sharing_comparison(
        &self,
        request: &QuoteRequest,
    ) -> Result<SharingComparison, FareError> {
        self.catalog().sharing_comparison(request, self.now())
    }

    /// Quotes still held by the engine. Expired ones are dropped as time moves.
    pub fn quote_count(&self) -> usize {
        self.world.resource::<QuoteBook>().len()
    }

    /// Opens a match session for a quoted ride and runs its first search.
    pub fn request_match(&mut self, request: MatchRequest) -> Result<SessionId, MatchError> {
        let now_ms = self.now_ms();
        let is_shared = self
            .world
            .resource::<QuoteBook>()
            .lookup(request.quote_id, now_ms)?
            .fare
            .is_shared;
        let needs_shared = request.role == CandidateRole::CoPassenger
            || request.gender_policy != GenderPolicy::Any;
        if needs_shared && !is_shared {
            return Err(MatchError::SharedRideRequired);
        }
        let quote = self
            .world
            .resource_mut::<QuoteBook>()
            .claim(request.quote_id, now_ms)?;

        let config = self.matching_config();
        self.next_session += 1;
        let id = SessionId(self.next_session);
        let session = MatchSession::new(
            id,
            &quote,
            request,
            now_ms,
            config.max_search_secs.saturating_mul(ONE_SEC_MS),
        );
        let deadline = session.search_deadline_ms;
        let entity = self.world.spawn(session).id();
        self.sessions.insert(id, entity);

        {
            let mut telemetry = self.world.resource_mut::<MatchTelemetry>();
            telemetry.sessions_opened = telemetry.sessions_opened.saturating_add(1);
        }
        tracing::debug!(session = %id, quote = %quote.id, "match session opened");

        {
            let mut clock = self.world.resource_mut::<SimulationClock>();
            clock.schedule_at(
                now_ms,
                EventKind::SearchCandidates,
                Some(EventSubject::Session(entity)),
            );
            clock.schedule_at(
                deadline,
                EventKind::SearchDeadline,
                Some(EventSubject::Session(entity)),
            );
        }
        self.run_due();
        Ok(id)
    }

    pub fn match_status(&self, id: SessionId) -> Result<SessionSnapshot, MatchError> {
        Ok(self.session(id)?.snapshot())
    }

    /// Candidate's answer to the pending offer.
    pub fn match_respond(
        &mut self,
        id: SessionId,
        candidate: CandidateId,
        decision: Decision,
    ) -> Result<(), MatchError> {
        let (entity, session) = self.session_entry(id)?;
        if session.status != SessionStatus::Found {
            return Err(MatchError::InvalidTransition {
                session: id,
                status: session.status,
                action: "respond to",
            });
        }
        if session.offer.map(|offer| offer.candidate) != Some(candidate) {
            return Err(MatchError::NotActiveCandidate {
                session: id,
                candidate,
            });
        }
        let kind = match decision {
            Decision::Accept => EventKind::OfferAccepted,
            Decision::Decline => EventKind::OfferDeclined,
        };
        self.dispatch_now(kind, EventSubject::Offer(entity, candidate));
        Ok(())
    }

    /// Rider cancellation. Allowed in any state before the trip starts.
    pub fn match_cancel(
        &mut self,
        id: SessionId,
        reason: impl Into<String>,
    ) -> Result<(), MatchError> {
        let (entity, session) = self.session_entry(id)?;
        if !session.status.is_rider_cancellable() {
            return Err(MatchError::InvalidTransition {
                session: id,
                status: session.status,
                action: "cancel",
            });
        }
        self.world.entity_mut(entity).insert(CancelRequest(reason.into()));
        self.dispatch_now(EventKind::RiderCancel, EventSubject::Session(entity));
        Ok(())
    }

    /// The assigned candidate backs out.
    pub fn candidate_cancel(
        &mut self,
        id: SessionId,
        candidate: CandidateId,
    ) -> Result<(), MatchError> {
        let (entity, session) = self.session_entry(id)?;
        if !candidate_may_cancel(session) {
            return Err(MatchError::InvalidTransition {
                session: id,
                status: session.status,
                action: "cancel the candidate of",
            });
        }
        if session.active_id() != Some(candidate) {
            return Err(MatchError::NotActiveCandidate {
                session: id,
                candidate,
            });
        }
        self.dispatch_now(
            EventKind::CandidateCancelled,
            EventSubject::Offer(entity, candidate),
        );
        Ok(())
    }

    pub fn trip_started(&mut self, id: SessionId) -> Result<(), MatchError> {
        self.lifecycle_event(id, SessionStatus::Accepted, EventKind::TripStarted, "start")
    }

    pub fn trip_completed(&mut self, id: SessionId) -> Result<(), MatchError> {
        self.lifecycle_event(id, SessionStatus::InProgress, EventKind::TripCompleted, "complete")
    }

    /// Moves engine time forward, firing every event due on the way.
    /// Returns the number of events processed.
    pub fn advance_to(&mut self, ms: u64) -> usize {
        let target = ms.max(self.now_ms());
        let processed = run_due(&mut self.world, &mut self.schedule, target);
        let purged = self.world.resource_mut::<QuoteBook>().purge_expired(target);
        if purged > 0 {
            tracing::debug!(purged, "expired quotes dropped");
        }
        processed
    }

    pub fn advance_by_secs(&mut self, secs: u64) -> usize {
        let target = self
            .now_ms()
            .saturating_add(secs.saturating_mul(ONE_SEC_MS));
        self.advance_to(target)
    }

    /// Takes the final result of a terminal session and forgets the session.
    pub fn take_result(&mut self, id: SessionId) -> Option<MatchResult> {
        let result = self.world.resource_mut::<MatchResults>().take(id)?;
        if let Some(entity) = self.sessions.remove(&id) {
            self.world.despawn(entity);
        }
        Some(result)
    }

    pub fn telemetry(&self) -> MatchTelemetry {
        *self.world.resource::<MatchTelemetry>()
    }

    /// Sessions not yet taken with [RideEngine::take_result].
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn session(&self, id: SessionId) -> Result<&MatchSession, MatchError> {
        self.session_entry(id).map(|(_, session)| session)
    }

    fn session_entry(&self, id: SessionId) -> Result<(Entity, &MatchSession), MatchError> {
        let entity = *self
            .sessions
            .get(&id)
            .ok_or(MatchError::SessionNotFound(id))?;
        let session = self
            .world
            .get::<MatchSession>(entity)
            .ok_or(MatchError::SessionNotFound(id))?;
        Ok((entity, session))
    }

    fn lifecycle_event(
        &mut self,
        id: SessionId,
        required: SessionStatus,
        kind: EventKind,
        action: &'static str,
    ) -> Result<(), MatchError> {
        let (entity, session) = self.session_entry(id)?;
        if session.status != required {
            return Err(MatchError::InvalidTransition {
                session: id,
                status: session.status,
                action,
            });
        }
        self.dispatch_now(kind, EventSubject::Session(entity));
        Ok(())
    }

    fn dispatch_now(&mut self, kind: EventKind, subject: EventSubject) {
        {
            let mut clock = self.world.resource_mut::<SimulationClock>();
            let now = clock.now();
            clock.schedule_at(now, kind, Some(subject));
        }
        self.run_due();
    }

    fn run_due(&mut self) -> usize {
        let now = self.now_ms();
        run_due(&mut self.world, &mut self.schedule, now)
    }
}
