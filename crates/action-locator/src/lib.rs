//! Element resolution
//!
//! Turns a natural-language query plus a structural snapshot into a locator
//! that is verified to match exactly one element in its scope:
//! - multi-signal ranking (embedding similarity, heuristics, promotion, penalties)
//! - locator synthesis ordered by stability
//! - scope-aware uniqueness verification through a live driver
//! - bounded self-healing with a heal discount on confidence

pub mod driver;
pub mod errors;
pub mod events;
pub mod healer;
pub mod intent;
pub mod locator;
pub mod metrics;
pub mod promotion_store;
pub mod query;
pub mod resolver;
pub mod scoring;
pub mod synth;
pub mod types;
pub mod verifier;

pub use driver::{ElementHandle, LiveDriver, SnapshotDriver};
pub use errors::LocatorError;
pub use healer::{heal_chain, healed_forms, HealStep, HealedLocator};
pub use intent::{ActionKind, Intent, IntentParser, KeywordIntentParser};
pub use locator::{normalize_locator, Locator};
pub use promotion_store::{PromotionConfig, PromotionRecord, PromotionStore};
pub use query::QueryProfile;
pub use resolver::{ElementResolver, ResolverConfig, SelfHealingResolver};
pub use scoring::{
    CallCacheStats, FusionWeights, HeuristicWeights, PenaltyConfig, RankOptions, RankedCandidate,
    Ranker, Ranking, ScoreSignals, SemanticScorer,
};
pub use synth::{synthesize, LocatorTier, SynthesizedLocator};
pub use types::{
    Attempt, CandidateSummary, ResolutionOutcome, ResolutionReport, ScopeInfo, StopReason,
};
pub use verifier::{UniquenessVerifier, Verification};
