//! Parallel dispatch: several [RideEngine] shards, each owning its own
//! sessions, stepped concurrently with rayon over one shared candidate pool.

use std::sync::Arc;

use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::engine::RideEngine;
use crate::error::ConfigError;
use crate::pool::CandidatePool;
use crate::telemetry::MatchTelemetry;

pub struct Dispatcher {
    shards: Vec<RideEngine>,
}

impl Dispatcher {
    /// Builds `shard_count` engines. Each shard gets its own tie-break seed
    /// derived from the configured one.
    pub fn new(
        config: &EngineConfig,
        pool: Arc<dyn CandidatePool>,
        shard_count: usize,
    ) -> Result<Self, ConfigError> {
        if shard_count == 0 {
            return Err(ConfigError::Invalid("dispatcher needs at least one shard".into()));
        }
        let shards = (0..shard_count)
            .map(|index| {
                let seed = config.matching.seed.wrapping_add(index as u64);
                RideEngine::new(config.clone().with_seed(seed), Arc::clone(&pool))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { shards })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard(&self, index: usize) -> Option<&RideEngine> {
        self.shards.get(index)
    }

    /// Runs `job` on every shard in parallel; results come back in shard order.
    pub fn run<T, F>(&mut self, job: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize, &mut RideEngine) -> T + Sync,
    {
        self.shards
            .par_iter_mut()
            .enumerate()
            .map(|(index, engine)| job(index, engine))
            .collect()
    }

    /// Advances every shard by `secs`. Returns the total number of events processed.
    pub fn advance_by_secs(&mut self, secs: u64) -> usize {
        self.run(|_, engine| engine.advance_by_secs(secs))
            .into_iter()
            .sum()
    }

    /// Counters summed over all shards.
    pub fn telemetry(&self) -> MatchTelemetry {
        self.shards
            .iter()
            .fold(MatchTelemetry::default(), |mut total, engine| {
                total.merge(&engine.telemetry());
                total
            })
    }
}
