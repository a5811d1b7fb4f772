//! Candidate pool: the drivers and co-passengers a session can be matched with.
//!
//! The pool is shared by every session (and every engine shard). Listing never
//! takes a lock: the roster is fixed at construction and each slot carries an
//! atomic `reserved` flag. Reserving is a single compare-exchange, so two
//! sessions can never hold an offer for the same candidate at once.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bevy_ecs::prelude::Resource;
use h3o::CellIndex;
use serde::{Deserialize, Serialize};

use crate::fare::VehicleClass;
use crate::spatial::{cell_serde, distance_km_between_cells, pickup_eta_ms, within_grid_radius};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub u64);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    WheelchairAccessible,
    ServiceAnimalFriendly,
    VisualAssistance,
    HearingAssistance,
    MobilityAid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

/// Rider accessibility needs. For co-passengers this is also their stated
/// preference, used to group compatible riders on shared trips.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Accommodations {
    pub wheelchair_access: bool,
    pub visual_assistance: bool,
    pub hearing_assistance: bool,
    pub mobility_aid: bool,
    pub service_animal: bool,
}

impl Accommodations {
    pub fn wheelchair() -> Self {
        Self {
            wheelchair_access: true,
            ..Self::default()
        }
    }

    /// Capabilities a candidate needs to serve these accommodations.
    pub fn required_capabilities(&self) -> BTreeSet<Capability> {
        [
            (self.wheelchair_access, Capability::WheelchairAccessible),
            (self.visual_assistance, Capability::VisualAssistance),
            (self.hearing_assistance, Capability::HearingAssistance),
            (self.mobility_aid, Capability::MobilityAid),
            (self.service_animal, Capability::ServiceAnimalFriendly),
        ]
        .into_iter()
        .filter_map(|(needed, capability)| needed.then_some(capability))
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateRole {
    Driver,
    CoPassenger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CandidateKind {
    Driver { vehicle_class: VehicleClass },
    CoPassenger,
}

impl CandidateKind {
    pub fn role(&self) -> CandidateRole {
        match self {
            CandidateKind::Driver { .. } => CandidateRole::Driver,
            CandidateKind::CoPassenger => CandidateRole::CoPassenger,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub kind: CandidateKind,
    pub rating: f32,
    #[serde(with = "cell_serde")]
    pub location: CellIndex,
    /// Filled in by the pool relative to the requested pickup.
    pub eta_to_pickup_ms: u64,
    pub capabilities: BTreeSet<Capability>,
    pub gender: Option<Gender>,
    pub accommodations: Accommodations,
}

impl Candidate {
    pub fn driver(id: u64, vehicle_class: VehicleClass, location: CellIndex) -> Self {
        Self::new(id, CandidateKind::Driver { vehicle_class }, location)
    }

    pub fn co_passenger(id: u64, location: CellIndex) -> Self {
        Self::new(id, CandidateKind::CoPassenger, location)
    }

    fn new(id: u64, kind: CandidateKind, location: CellIndex) -> Self {
        Self {
            id: CandidateId(id),
            kind,
            rating: 5.0,
            location,
            eta_to_pickup_ms: 0,
            capabilities: BTreeSet::new(),
            gender: None,
            accommodations: Accommodations::default(),
        }
    }

    pub fn with_rating(mut self, rating: f32) -> Self {
        self.rating = rating;
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_gender(mut self, gender: Gender) -> Self {
        self.gender = Some(gender);
        self
    }

    pub fn with_accommodations(mut self, accommodations: Accommodations) -> Self {
        self.accommodations = accommodations;
        self
    }

    pub fn role(&self) -> CandidateRole {
        self.kind.role()
    }
}

/// What a session needs from a candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFilter {
    pub role: CandidateRole,
    pub pickup: CellIndex,
    /// Drivers must operate this class; ignored for co-passengers.
    pub vehicle_class: Option<VehicleClass>,
    pub required: BTreeSet<Capability>,
    /// Only candidates declaring this gender pass.
    pub gender: Option<Gender>,
    pub match_radius: u32,
    pub eta_speed_kmh: f64,
}

impl CandidateFilter {
    pub fn matches(&self, candidate: &Candidate) -> bool {
        if candidate.role() != self.role {
            return false;
        }
        if let (CandidateKind::Driver { vehicle_class }, Some(wanted)) =
            (candidate.kind, self.vehicle_class)
        {
            if vehicle_class != wanted {
                return false;
            }
        }
        if !self.required.is_subset(&candidate.capabilities) {
            return false;
        }
        if self.gender.is_some() && candidate.gender != self.gender {
            return false;
        }
        within_grid_radius(self.pickup, candidate.location, self.match_radius)
    }

    pub fn eta_from(&self, location: CellIndex) -> u64 {
        pickup_eta_ms(
            distance_km_between_cells(location, self.pickup),
            self.eta_speed_kmh,
        )
    }
}

/// Source of candidates for matching sessions.
pub trait CandidatePool: Send + Sync {
    /// Unreserved candidates passing `filter`, with `eta_to_pickup_ms` filled in.
    /// The result is a snapshot; a listed candidate may be reserved by another
    /// session before this one calls [CandidatePool::reserve].
    fn list_available(&self, filter: &CandidateFilter) -> Vec<Candidate>;

    /// Atomically marks the candidate as held by the caller. Returns `false`
    /// when it is already held or unknown.
    fn reserve(&self, id: CandidateId) -> bool;

    /// Returns a held candidate to the pool. Releasing an unheld candidate is a no-op.
    fn release(&self, id: CandidateId);
}

#[derive(Debug)]
struct PoolSlot {
    candidate: Candidate,
    reserved: AtomicBool,
}

/// In-memory pool over a fixed roster.
#[derive(Debug, Default)]
pub struct SharedCandidatePool {
    slots: Vec<PoolSlot>,
    index: HashMap<CandidateId, usize>,
}

impl SharedCandidatePool {
    /// Builds the roster. Later duplicates of an id are ignored.
    pub fn new(candidates: impl IntoIterator<Item = Candidate>) -> Self {
        let mut pool = Self::default();
        for candidate in candidates {
            if pool.index.contains_key(&candidate.id) {
                tracing::warn!(candidate = %candidate.id, "duplicate candidate id ignored");
                continue;
            }
            pool.index.insert(candidate.id, pool.slots.len());
            pool.slots.push(PoolSlot {
                candidate,
                reserved: AtomicBool::new(false),
            });
        }
        pool
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of candidates not currently reserved.
    pub fn available_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| !slot.reserved.load(Ordering::Acquire))
            .count()
    }

    pub fn is_reserved(&self, id: CandidateId) -> bool {
        self.slot(id)
            .is_some_and(|slot| slot.reserved.load(Ordering::Acquire))
    }

    fn slot(&self, id: CandidateId) -> Option<&PoolSlot> {
        self.index.get(&id).map(|&i| &self.slots[i])
    }
}

impl CandidatePool for SharedCandidatePool {
    fn list_available(&self, filter: &CandidateFilter) -> Vec<Candidate> {
        self.slots
            .iter()
            .filter(|slot| !slot.reserved.load(Ordering::Acquire))
            .filter(|slot| filter.matches(&slot.candidate))
            .map(|slot| {
                let mut candidate = slot.candidate.clone();
                candidate.eta_to_pickup_ms = filter.eta_from(candidate.location);
                candidate
            })
            .collect()
    }

    fn reserve(&self, id: CandidateId) -> bool {
        self.slot(id).is_some_and(|slot| {
            slot.reserved
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    fn release(&self, id: CandidateId) {
        match self.slot(id) {
            Some(slot) => slot.reserved.store(false, Ordering::Release),
            None => tracing::warn!(candidate = %id, "release of unknown candidate"),
        }
    }
}

/// Resource wrapper for the shared pool trait object.
#[derive(Resource, Clone)]
pub struct CandidatePoolResource(pub Arc<dyn CandidatePool>);

impl CandidatePoolResource {
    pub fn new(pool: Arc<dyn CandidatePool>) -> Self {
        Self(pool)
    }
}

impl std::ops::Deref for CandidatePoolResource {
    type Target = dyn CandidatePool;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{test_cell, test_distant_cell, test_neighbor_cell};
    use rayon::prelude::*;

    fn driver_filter() -> CandidateFilter {
        CandidateFilter {
            role: CandidateRole::Driver,
            pickup: test_cell(),
            vehicle_class: Some(VehicleClass::Mini),
            required: BTreeSet::new(),
            gender: None,
            match_radius: 1,
            eta_speed_kmh: 40.0,
        }
    }

    #[test]
    fn listing_filters_by_role_class_and_radius() {
        let pool = SharedCandidatePool::new([
            Candidate::driver(1, VehicleClass::Mini, test_cell()),
            Candidate::driver(2, VehicleClass::Sedan, test_cell()),
            Candidate::co_passenger(3, test_cell()),
            Candidate::driver(4, VehicleClass::Mini, test_neighbor_cell()),
        ]);
        let ids: Vec<_> = pool
            .list_available(&driver_filter())
            .into_iter()
            .map(|c| c.id.0)
            .collect();
        assert_eq!(ids, vec![1, 4]);
    }

    #[test]
    fn listing_fills_in_pickup_eta() {
        let pool = SharedCandidatePool::new([
            Candidate::driver(1, VehicleClass::Mini, test_cell()),
            Candidate::driver(2, VehicleClass::Mini, test_distant_cell()),
        ]);
        let mut filter = driver_filter();
        filter.match_radius = 2;
        let listed = pool.list_available(&filter);
        assert_eq!(listed[0].eta_to_pickup_ms, crate::clock::ONE_SEC_MS);
        assert!(listed[1].eta_to_pickup_ms > listed[0].eta_to_pickup_ms);
    }

    #[test]
    fn required_capabilities_and_gender_must_match() {
        let pool = SharedCandidatePool::new([
            Candidate::driver(1, VehicleClass::Mini, test_cell()),
            Candidate::driver(2, VehicleClass::Mini, test_cell())
                .with_capability(Capability::WheelchairAccessible)
                .with_gender(Gender::Female),
            Candidate::driver(3, VehicleClass::Mini, test_cell())
                .with_capability(Capability::WheelchairAccessible)
                .with_gender(Gender::Male),
        ]);
        let mut filter = driver_filter();
        filter.required = Accommodations::wheelchair().required_capabilities();
        filter.gender = Some(Gender::Female);
        let ids: Vec<_> = pool.list_available(&filter).iter().map(|c| c.id.0).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn reserved_candidates_are_hidden_until_released() {
        let pool =
            SharedCandidatePool::new([Candidate::driver(1, VehicleClass::Mini, test_cell())]);
        assert!(pool.reserve(CandidateId(1)));
        assert!(!pool.reserve(CandidateId(1)));
        assert!(pool.list_available(&driver_filter()).is_empty());
        assert_eq!(pool.available_count(), 0);

        pool.release(CandidateId(1));
        assert_eq!(pool.available_count(), 1);
        assert!(!pool.is_reserved(CandidateId(1)));
    }

    #[test]
    fn unknown_candidate_cannot_be_reserved() {
        let pool = SharedCandidatePool::default();
        assert!(!pool.reserve(CandidateId(99)));
        pool.release(CandidateId(99));
    }

    #[test]
    fn concurrent_reservations_have_a_single_winner() {
        let pool =
            SharedCandidatePool::new([Candidate::driver(7, VehicleClass::Mini, test_cell())]);
        let winners = (0..64)
            .into_par_iter()
            .filter(|_| pool.reserve(CandidateId(7)))
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn duplicate_ids_keep_first_entry() {
        let pool = SharedCandidatePool::new([
            Candidate::driver(1, VehicleClass::Mini, test_cell()),
            Candidate::driver(1, VehicleClass::Suv, test_cell()),
        ]);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.list_available(&driver_filter()).len(), 1);
    }
}
