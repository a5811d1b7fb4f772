//! Candidate ranking for match sessions.

pub mod algorithm;
pub mod eta;

use bevy_ecs::prelude::Resource;

pub use algorithm::{CandidateRanking, RankingContext};
pub use eta::EtaRanking;

/// Resource wrapper for the ranking trait object.
#[derive(Resource)]
pub struct RankingResource(pub Box<dyn CandidateRanking>);

impl RankingResource {
    pub fn new(ranking: Box<dyn CandidateRanking>) -> Self {
        Self(ranking)
    }
}

impl Default for RankingResource {
    fn default() -> Self {
        Self::new(Box::new(EtaRanking))
    }
}

impl std::ops::Deref for RankingResource {
    type Target = dyn CandidateRanking;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}
