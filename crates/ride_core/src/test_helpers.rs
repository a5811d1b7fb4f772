//! Test helpers: shared geography, configuration and pool fixtures.
//!
//! Compiled for unit tests and behind the `test-helpers` feature so
//! integration tests and benches can reuse them.

use std::sync::Arc;

use h3o::CellIndex;

use crate::config::EngineConfig;
use crate::engine::RideEngine;
use crate::fare::VehicleClass;
use crate::pool::{Candidate, SharedCandidatePool};

/// A valid H3 cell at resolution 10 in the San Francisco Bay Area. Finer than
/// [crate::spatial::DEFAULT_RESOLUTION]; the pool accepts cells at any resolution.
pub const TEST_CELL: u64 = 0x8a1fb46622dffff;

/// 2024-06-01T00:00:00Z. Every default coupon is still valid at this instant.
pub const TEST_EPOCH_MS: i64 = 1_717_200_000_000;

/// # Panics
///
/// Panics if the test cell constant is invalid (should never happen).
pub fn test_cell() -> CellIndex {
    CellIndex::try_from(TEST_CELL).expect("TEST_CELL should be a valid H3 cell")
}

/// A cell exactly `k` grid steps from [test_cell]. For small `k` the
/// straight-line distance grows strictly with `k`.
pub fn cell_at_distance(k: u32) -> CellIndex {
    let origin = test_cell();
    origin
        .grid_disk::<Vec<_>>(k)
        .into_iter()
        .find(|cell| origin.grid_distance(*cell).ok() == Some(k as i32))
        .expect("test cell should have a full ring at this distance")
}

pub fn test_neighbor_cell() -> CellIndex {
    cell_at_distance(1)
}

pub fn test_distant_cell() -> CellIndex {
    cell_at_distance(2)
}

/// Default configuration pinned to [TEST_EPOCH_MS] with a fixed seed.
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_epoch_ms(TEST_EPOCH_MS)
        .with_seed(42)
}

/// `count` drivers of one class, ids `1..=count`, all parked on [test_cell].
pub fn driver_pool(count: u64, class: VehicleClass) -> Arc<SharedCandidatePool> {
    SharedCandidatePool::new((1..=count).map(|id| Candidate::driver(id, class, test_cell())))
        .into_shared()
}

/// `count` drivers of one class where driver `i` sits `i` grid steps from
/// [test_cell], so ETA order equals id order.
pub fn ranked_driver_pool(count: u64, class: VehicleClass) -> Arc<SharedCandidatePool> {
    SharedCandidatePool::new(
        (1..=count).map(|id| Candidate::driver(id, class, cell_at_distance(id as u32))),
    )
    .into_shared()
}

pub fn test_engine(pool: Arc<SharedCandidatePool>) -> RideEngine {
    RideEngine::new(test_config(), pool).expect("test config is valid")
}
