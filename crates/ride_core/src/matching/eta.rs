use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::pool::Candidate;

use super::algorithm::{CandidateRanking, RankingContext};

/// Nearest-by-ETA ranking.
///
/// Order of precedence:
/// 1. the rider's preferred candidate, if present;
/// 2. for shared rides, candidates whose accommodation preferences equal the
///    rider's, ahead of everyone else;
/// 3. lowest pickup ETA.
///
/// Equal keys are broken by a seeded shuffle, so candidates at the same
/// distance are not always offered in roster order.
#[derive(Debug, Default)]
pub struct EtaRanking;

impl EtaRanking {
    fn tier(candidate: &Candidate, context: &RankingContext) -> u8 {
        if context.shared && candidate.accommodations != context.accommodations {
            1
        } else {
            0
        }
    }
}

impl CandidateRanking for EtaRanking {
    fn rank(&self, mut candidates: Vec<Candidate>, context: &RankingContext) -> Vec<Candidate> {
        // Pool listing order is not part of the contract; normalize first so
        // the seeded shuffle is reproducible.
        candidates.sort_by_key(|candidate| candidate.id);
        let mut rng = StdRng::seed_from_u64(context.seed);
        candidates.shuffle(&mut rng);
        candidates.sort_by_key(|candidate| {
            (
                context.preferred != Some(candidate.id),
                Self::tier(candidate, context),
                candidate.eta_to_pickup_ms,
            )
        });
        candidates
    }
}
