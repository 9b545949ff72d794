//! Signal fusion and candidate ranking

use std::cmp::Ordering;
use std::sync::Arc;

use embedding_cache::{CacheOutcome, Vector};
use locator_core_types::{BackendNodeId, ContextId, ScopeId};
use perceiver_structural::{DescriptorId, ElementDescriptor, Snapshot};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::heuristic::{heuristic_score, HeuristicWeights};
use super::penalty::{penalty, PenaltyConfig};
use super::semantic::SemanticScorer;
use super::ScoreSignals;
use crate::healer::healed_forms;
use crate::promotion_store::PromotionStore;
use crate::query::QueryProfile;
use crate::synth::{synthesize, SynthesizedLocator};

/// Markup that is never an interaction target.
const SKIP_TAGS: &[&str] = &[
    "html", "head", "body", "script", "style", "meta", "link", "noscript", "template", "title",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub semantic: f32,
    pub heuristic: f32,
    pub promotion: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            semantic: 0.3,
            heuristic: 0.4,
            promotion: 0.2,
        }
    }
}

impl FusionWeights {
    pub fn total(&self) -> f32 {
        self.semantic + self.heuristic + self.promotion
    }

    pub fn is_valid(&self) -> bool {
        [self.semantic, self.heuristic, self.promotion]
            .iter()
            .all(|w| w.is_finite() && *w >= 0.0)
    }

    /// Weighted sum minus penalty. Not bounded: penalties may push it below zero.
    pub fn fuse(&self, semantic: f32, heuristic: f32, promotion: f32, penalty: f32) -> f32 {
        self.semantic * semantic + self.heuristic * heuristic + self.promotion * promotion - penalty
    }

    /// Fused score normalized by the weight total and clamped to [0, 1].
    pub fn confidence(&self, fused: f32) -> f32 {
        let total = self.total();
        if total <= f32::EPSILON {
            return 0.0;
        }
        (fused / total).clamp(0.0, 1.0)
    }
}

/// Confidence after `heal_steps` healing transforms.
pub fn discounted(confidence: f32, heal_discount: f32, heal_steps: u32) -> f32 {
    (confidence * heal_discount.clamp(0.0, 1.0).powi(heal_steps as i32)).clamp(0.0, 1.0)
}

/// Embedding cache traffic caused by one resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallCacheStats {
    pub hits: u32,
    pub misses: u32,
}

impl CallCacheStats {
    pub fn record(&mut self, outcome: CacheOutcome) {
        if outcome.is_hit() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    pub descriptor: DescriptorId,
    pub backend_id: BackendNodeId,
    pub scope: ScopeId,
    pub tag: String,
    pub label: String,
    pub signals: ScoreSignals,
    pub confidence: f32,
    /// Synthesized locators, most stable first
    pub locators: Vec<SynthesizedLocator>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Ranking {
    pub candidates: Vec<RankedCandidate>,
    /// Descriptors scored before truncation
    pub considered: usize,
    pub cache: CallCacheStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankOptions {
    pub top_k: usize,
    /// Candidate count above which scoring fans out over the worker pool
    pub parallel_threshold: usize,
    /// Worker threads; 0 uses one per core
    pub workers: usize,
}

impl RankOptions {
    pub const MIN_TOP_K: usize = 5;
    pub const MAX_TOP_K: usize = 20;

    pub fn clamped_top_k(&self) -> usize {
        self.top_k.clamp(Self::MIN_TOP_K, Self::MAX_TOP_K)
    }
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            parallel_threshold: 64,
            workers: 0,
        }
    }
}

pub struct Ranker {
    semantic: SemanticScorer,
    promotion: Arc<PromotionStore>,
    fusion: FusionWeights,
    heuristic: HeuristicWeights,
    penalty: PenaltyConfig,
    options: RankOptions,
    pool: Option<rayon::ThreadPool>,
}

impl Ranker {
    pub fn new(
        semantic: SemanticScorer,
        promotion: Arc<PromotionStore>,
        fusion: FusionWeights,
        heuristic: HeuristicWeights,
        penalty: PenaltyConfig,
        options: RankOptions,
    ) -> Self {
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers)
            .thread_name(|idx| format!("locator-rank-{idx}"))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(err) => {
                warn!(
                    target: "locator.events",
                    event = "rank.pool_unavailable",
                    error = %err,
                    "ranking falls back to sequential scoring"
                );
                None
            }
        };
        Self {
            semantic,
            promotion,
            fusion,
            heuristic,
            penalty,
            options,
            pool,
        }
    }

    pub fn semantic(&self) -> &SemanticScorer {
        &self.semantic
    }

    pub fn fusion(&self) -> &FusionWeights {
        &self.fusion
    }

    /// Scores every interaction-relevant descriptor and keeps the top K,
    /// best first. Ties fall back to document order.
    pub fn rank(&self, profile: &QueryProfile, snapshot: &Snapshot, context: &ContextId) -> Ranking {
        let mut cache = CallCacheStats::default();
        let (query_vector, outcome) = self
            .semantic
            .embed_query(&profile.embedding_text(), Some(context));
        cache.record(outcome);

        let eligible: Vec<&ElementDescriptor> = snapshot
            .descriptors
            .iter()
            .filter(|descriptor| !SKIP_TAGS.contains(&descriptor.tag.to_ascii_lowercase().as_str()))
            .collect();
        let promoted_context = self.promotion.has_context(context);

        let score = |descriptor: &&ElementDescriptor| {
            self.score_one(
                profile,
                snapshot,
                descriptor,
                query_vector.as_ref(),
                context,
                promoted_context,
            )
        };
        let scored: Vec<(RankedCandidate, CacheOutcome)> =
            match (&self.pool, eligible.len() > self.options.parallel_threshold) {
                (Some(workers), true) => workers.install(|| eligible.par_iter().map(score).collect()),
                _ => eligible.iter().map(score).collect(),
            };

        let considered = scored.len();
        let mut candidates = Vec::with_capacity(considered);
        for (candidate, outcome) in scored {
            cache.record(outcome);
            candidates.push(candidate);
        }

        candidates.sort_by(|a, b| {
            b.signals
                .fused
                .partial_cmp(&a.signals.fused)
                .unwrap_or(Ordering::Equal)
                .then(a.descriptor.cmp(&b.descriptor))
        });
        candidates.truncate(self.options.clamped_top_k());
        for candidate in &mut candidates {
            if candidate.locators.is_empty() {
                if let Some(descriptor) = snapshot.get(candidate.descriptor) {
                    candidate.locators = synthesize(descriptor, snapshot);
                }
            }
        }

        debug!(
            target: "locator.events",
            event = "rank.completed",
            considered,
            kept = candidates.len(),
            cache_hits = cache.hits,
            cache_misses = cache.misses,
            "candidates ranked"
        );

        Ranking {
            candidates,
            considered,
            cache,
        }
    }

    fn score_one(
        &self,
        profile: &QueryProfile,
        snapshot: &Snapshot,
        descriptor: &ElementDescriptor,
        query_vector: Option<&Vector>,
        context: &ContextId,
        promoted_context: bool,
    ) -> (RankedCandidate, CacheOutcome) {
        let (element_vector, outcome) = self.semantic.embed_element(descriptor, Some(context));
        let semantic = SemanticScorer::similarity(query_vector, element_vector.as_ref());
        let heuristic = heuristic_score(profile, descriptor, &self.heuristic);
        let penalty = penalty(profile, descriptor, snapshot, &self.penalty);

        let mut notes = vec![format!(
            "text {:.2}, attributes {:.2}, affordance {:.2}, stable {:.2}, visible {:.0}",
            heuristic.text,
            heuristic.attributes,
            heuristic.affordance,
            heuristic.stable,
            heuristic.visibility
        )];

        // locators are only needed this early when promotion data exists;
        // a healed form that verified earlier counts for its element too
        let (promotion, locators) = if promoted_context {
            let locators = synthesize(descriptor, snapshot);
            let best = locators
                .iter()
                .flat_map(|locator| {
                    std::iter::once(locator.rendered.clone()).chain(
                        healed_forms(&locator.locator)
                            .into_iter()
                            .map(|(_, healed)| healed.to_string()),
                    )
                })
                .filter_map(|rendered| {
                    self.promotion
                        .record(&rendered, context)
                        .map(|record| (record.score, rendered))
                })
                .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
            let promotion = match best {
                Some((score, rendered)) => {
                    notes.push(format!("promotion {score:+.2} from {rendered}"));
                    score
                }
                None => 0.0,
            };
            (promotion, locators)
        } else {
            (0.0, Vec::new())
        };

        notes.extend(penalty.reasons.iter().cloned());

        let fused = self
            .fusion
            .fuse(semantic, heuristic.score, promotion, penalty.total);
        let signals = ScoreSignals {
            semantic,
            heuristic: heuristic.score,
            promotion,
            penalty: penalty.total,
            fused,
        };

        let candidate = RankedCandidate {
            descriptor: descriptor.id,
            backend_id: descriptor.backend_id,
            scope: descriptor.scope.clone(),
            tag: descriptor.tag.clone(),
            label: descriptor.label().to_string(),
            confidence: self.fusion.confidence(fused),
            signals,
            locators,
            notes,
        };
        (candidate, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{ActionKind, Intent};
    use embedding_cache::{EmbeddingCache, HashingEmbedder};
    use perceiver_structural::{snapshot_from_tree, CapturedTree, RawDomNode};

    fn ranker(options: RankOptions, promotion: Arc<PromotionStore>) -> Ranker {
        Ranker::new(
            SemanticScorer::new(
                Arc::new(HashingEmbedder::new(256)),
                Arc::new(EmbeddingCache::memory_only(1024)),
            ),
            promotion,
            FusionWeights::default(),
            HeuristicWeights::default(),
            PenaltyConfig::default(),
            options,
        )
    }

    fn profile(action: ActionKind, target: &str, snapshot: &Snapshot) -> QueryProfile {
        QueryProfile::build(
            &Intent {
                action,
                target: target.into(),
                value: None,
            },
            snapshot,
        )
    }

    fn two_forms() -> Snapshot {
        snapshot_from_tree(&CapturedTree::new(
            vec![
                RawDomNode::new(1, "form").attr("id", "form1"),
                RawDomNode::new(2, "button")
                    .child_of(1)
                    .text("Submit")
                    .attr("id", "form1-submit"),
                RawDomNode::new(3, "form").attr("id", "form2"),
                RawDomNode::new(4, "button")
                    .child_of(3)
                    .text("Submit")
                    .attr("id", "form2-submit"),
            ],
            vec![],
        ))
    }

    #[test]
    fn confidence_is_normalized_and_discounted() {
        let weights = FusionWeights::default();
        assert_eq!(weights.confidence(-0.4), 0.0);
        assert_eq!(weights.confidence(5.0), 1.0);
        let base = weights.confidence(0.45);
        assert!((base - 0.5).abs() < 1e-5);
        assert!((discounted(base, 0.95, 2) - 0.45125).abs() < 1e-5);
        assert_eq!(discounted(base, 0.95, 0), base);
    }

    #[test]
    fn entity_conflict_decides_between_twins() {
        let snapshot = two_forms();
        let ranker = ranker(RankOptions::default(), Arc::new(PromotionStore::in_memory()));
        let query = profile(ActionKind::Click, "the form2 submit button", &snapshot);
        let ranking = ranker.rank(&query, &snapshot, &ContextId::new("checkout"));

        let top = &ranking.candidates[0];
        assert_eq!(top.backend_id, BackendNodeId(4));
        assert_eq!(top.locators[0].rendered, "#form2-submit");
        let loser = ranking
            .candidates
            .iter()
            .find(|c| c.backend_id == BackendNodeId(2))
            .unwrap();
        assert!(loser.signals.penalty > 0.0);
        assert!(top.confidence > loser.confidence);
    }

    #[test]
    fn ranking_is_deterministic_and_bounded() {
        let nodes: Vec<RawDomNode> = (1..=100)
            .map(|i| RawDomNode::new(i, "button").text(format!("Item {i}")))
            .collect();
        let snapshot = snapshot_from_tree(&CapturedTree::new(nodes, vec![]));
        let ranker = ranker(
            RankOptions {
                top_k: 50,
                parallel_threshold: 8,
                workers: 2,
            },
            Arc::new(PromotionStore::in_memory()),
        );
        let query = profile(ActionKind::Click, "item 42", &snapshot);
        let context = ContextId::new("list");

        let first = ranker.rank(&query, &snapshot, &context);
        let second = ranker.rank(&query, &snapshot, &context);
        assert_eq!(first.candidates.len(), RankOptions::MAX_TOP_K);
        assert_eq!(first.considered, 100);
        let order = |r: &Ranking| r.candidates.iter().map(|c| c.descriptor).collect::<Vec<_>>();
        assert_eq!(order(&first), order(&second));
        assert_eq!(first.candidates[0].backend_id, BackendNodeId(42));
        assert_eq!(first.cache.misses, 101);
        assert_eq!(second.cache.hits, 101);
    }

    #[test]
    fn promotion_lifts_a_candidate() {
        let snapshot = snapshot_from_tree(&CapturedTree::new(
            vec![
                RawDomNode::new(1, "button").text("Continue").attr("id", "next-a"),
                RawDomNode::new(2, "button").text("Continue").attr("id", "next-b"),
            ],
            vec![],
        ));
        let store = Arc::new(PromotionStore::in_memory());
        let context = ContextId::new("wizard");
        let ranker = ranker(RankOptions::default(), Arc::clone(&store));
        let query = profile(ActionKind::Click, "continue", &snapshot);

        let before = ranker.rank(&query, &snapshot, &context);
        assert_eq!(before.candidates[0].signals.promotion, 0.0);

        for _ in 0..3 {
            store.promote("#next-b", &context);
        }
        let after = ranker.rank(&query, &snapshot, &context);
        assert_eq!(after.candidates[0].backend_id, BackendNodeId(2));
        assert!(after.candidates[0].signals.promotion > 0.0);
    }

    #[test]
    fn promoted_healed_form_lifts_its_element() {
        let snapshot = snapshot_from_tree(&CapturedTree::new(
            vec![
                RawDomNode::new(1, "form").attr("id", "checkout-a"),
                RawDomNode::new(2, "button").child_of(1).text("Pay now"),
                RawDomNode::new(3, "form").attr("id", "checkout-b"),
                RawDomNode::new(4, "button").child_of(3).text("Pay now"),
            ],
            vec![],
        ));
        let store = Arc::new(PromotionStore::in_memory());
        let context = ContextId::new("checkout");
        let ranker = ranker(RankOptions::default(), Arc::clone(&store));
        let query = profile(ActionKind::Click, "pay now", &snapshot);

        // the drop-position form of the second button's structural path
        for _ in 0..3 {
            store.promote("form#checkout-b > button", &context);
        }
        let ranked = ranker.rank(&query, &snapshot, &context);
        assert_eq!(ranked.candidates[0].backend_id, BackendNodeId(4));
        assert!(ranked.candidates[0].signals.promotion > 0.0);
        let other = ranked
            .candidates
            .iter()
            .find(|candidate| candidate.backend_id == BackendNodeId(2))
            .unwrap();
        assert_eq!(other.signals.promotion, 0.0);
    }
}
