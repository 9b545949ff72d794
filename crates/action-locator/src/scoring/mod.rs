//! Candidate scoring
//!
//! Three signals (embedding similarity, rule-based relevance and learned
//! promotion) are fused into one score, less any contradiction penalty.

pub mod fusion;
pub mod heuristic;
pub mod penalty;
pub mod semantic;

use serde::Serialize;

pub use fusion::{
    discounted, CallCacheStats, FusionWeights, RankOptions, RankedCandidate, Ranker, Ranking,
};
pub use heuristic::{heuristic_score, HeuristicBreakdown, HeuristicWeights};
pub use penalty::{penalty, PenaltyBreakdown, PenaltyConfig};
pub use semantic::SemanticScorer;

/// Per-candidate signal values
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreSignals {
    /// Cosine similarity, [0, 1]
    pub semantic: f32,
    /// Weighted rule score, [0, 1]
    pub heuristic: f32,
    /// Best promotion score among the candidate's locators
    pub promotion: f32,
    pub penalty: f32,
    pub fused: f32,
}
