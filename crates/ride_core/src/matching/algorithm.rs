use crate::pool::{Accommodations, Candidate, CandidateId};

/// What a ranking needs to know about the session it orders candidates for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingContext {
    pub shared: bool,
    /// The rider's own accommodation needs (and, for shared rides, preferences).
    pub accommodations: Accommodations,
    pub preferred: Option<CandidateId>,
    /// Seed for tie-breaks. Same seed and input, same order.
    pub seed: u64,
}

/// Orders filtered candidates best-first for offering.
///
/// Implementations receive candidates that already passed the session's
/// [crate::pool::CandidateFilter] and must return a permutation of them; they
/// never drop or add candidates.
pub trait CandidateRanking: Send + Sync {
    fn rank(&self, candidates: Vec<Candidate>, context: &RankingContext) -> Vec<Candidate>;
}
