//! Self-healing resolver
//!
//! Drives one resolution through an explicit state machine:
//!
//! ```text
//! Parse -> Match -> Synthesize -> Verify -> Success
//!                       ^           |  \
//!                       |         Heal  \
//!                       |           |    v
//!                       +----- AltCandidate -> Fail
//! ```
//!
//! Every verification counts against the attempt ceiling and the wall-clock
//! budget; the caller's cancellation token is honoured between and during
//! verifications. A candidate may not spend the attempts held back for the
//! alternates ranked below it, and a driver outage moves on to the next
//! candidate without healing.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use embedding_cache::{Embedder, EmbeddingCache};
use locator_core_types::{ContextId, RequestId, ScopeId, ScopeKind, ScopeRef};
use perceiver_structural::Snapshot;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::driver::{ElementHandle, LiveDriver};
use crate::errors::LocatorError;
use crate::events;
use crate::healer::{heal_chain, HealStep};
use crate::intent::{IntentParser, KeywordIntentParser};
use crate::promotion_store::PromotionStore;
use crate::query::QueryProfile;
use crate::scoring::{
    discounted, FusionWeights, HeuristicWeights, PenaltyConfig, RankOptions, RankedCandidate,
    Ranker, Ranking, SemanticScorer,
};
use crate::synth::LocatorTier;
use crate::types::{
    Attempt, CandidateSummary, ResolutionOutcome, ResolutionReport, ScopeInfo, StopReason,
};
use crate::verifier::{UniquenessVerifier, Verification};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Wall-clock budget for one resolution
    pub budget_ms: u64,
    /// Timeout of a single driver call
    pub per_attempt_ms: u64,
    /// Retries of a failed or timed-out driver call
    pub driver_retries: u32,
    /// Verification ceiling across all candidates and heals
    pub max_attempts: u32,
    /// Candidates tried before giving up
    pub alt_candidates: usize,
    /// Attempts held back for each alternate still waiting its turn
    pub alt_reserve: u32,
    /// Confidence factor per heal transform
    pub heal_discount: f32,
    pub rank: RankOptions,
    pub fusion: FusionWeights,
    pub heuristic: HeuristicWeights,
    pub penalty: PenaltyConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            budget_ms: 1500,
            per_attempt_ms: 250,
            driver_retries: 1,
            max_attempts: 12,
            alt_candidates: 3,
            alt_reserve: 2,
            heal_discount: 0.95,
            rank: RankOptions::default(),
            fusion: FusionWeights::default(),
            heuristic: HeuristicWeights::default(),
            penalty: PenaltyConfig::default(),
        }
    }
}

impl ResolverConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }

    pub fn per_attempt(&self) -> Duration {
        Duration::from_millis(self.per_attempt_ms)
    }

    pub fn validate(&self) -> Result<(), LocatorError> {
        let invalid = |what: &str| Err(LocatorError::InputInvalid(what.to_string()));
        if self.budget_ms == 0 {
            return invalid("resolver.budget_ms must be positive");
        }
        if self.per_attempt_ms == 0 {
            return invalid("resolver.per_attempt_ms must be positive");
        }
        if self.max_attempts == 0 {
            return invalid("resolver.max_attempts must be at least 1");
        }
        if self.alt_candidates == 0 {
            return invalid("resolver.alt_candidates must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.heal_discount) {
            return invalid("resolver.heal_discount must lie in [0, 1]");
        }
        if !self.fusion.is_valid() || self.fusion.total() <= 0.0 {
            return invalid("fusion weights must be non-negative with a positive sum");
        }
        if !self.heuristic.is_valid() {
            return invalid("heuristic weights must be non-negative");
        }
        if !self.penalty.is_valid() {
            return invalid("penalties must be non-negative");
        }
        Ok(())
    }
}

/// Element resolver port
#[async_trait]
pub trait ElementResolver: Send + Sync {
    async fn resolve(
        &self,
        query: &str,
        snapshot: &Snapshot,
        context: &ContextId,
    ) -> Result<ResolutionReport, LocatorError>;

    async fn resolve_with_cancel(
        &self,
        query: &str,
        snapshot: &Snapshot,
        context: &ContextId,
        cancel: CancellationToken,
    ) -> Result<ResolutionReport, LocatorError>;
}

/// Locator waiting for verification
#[derive(Debug, Clone)]
struct Pending {
    locator: String,
    tier: Option<LocatorTier>,
    heal: Option<HealStep>,
    depth: u32,
}

enum State {
    Parse,
    Match { profile: QueryProfile },
    Synthesize { rank: usize },
    Verify {
        rank: usize,
        queue: VecDeque<Pending>,
        failed: Vec<String>,
        healed: bool,
    },
    Heal { rank: usize, failed: Vec<String> },
    AltCandidate { rank: usize },
    Success {
        rank: usize,
        pending: Pending,
        handle: ElementHandle,
    },
    Fail { reason: StopReason },
}

/// Mutable bookkeeping of one resolution
struct Run {
    request_id: RequestId,
    ranking: Ranking,
    attempts: Vec<Attempt>,
    /// Locators already verified, per scope
    tried: HashSet<(ScopeId, String)>,
    /// Attempt count at which the current candidate yields
    candidate_cap: usize,
    deadline: Instant,
    started: Instant,
}

impl Run {
    /// Records `locator` as tried within the candidate's scope; false when it
    /// already was.
    fn first_try(&mut self, rank: usize, locator: &str) -> bool {
        let scope = self.ranking.candidates[rank].scope.clone();
        self.tried.insert((scope, locator.to_string()))
    }

    fn was_tried(&self, rank: usize, locator: &str) -> bool {
        let scope = self.ranking.candidates[rank].scope.clone();
        self.tried.contains(&(scope, locator.to_string()))
    }
}

pub struct SelfHealingResolver {
    parser: Arc<dyn IntentParser>,
    ranker: Ranker,
    verifier: UniquenessVerifier,
    promotion: Arc<PromotionStore>,
    config: ResolverConfig,
}

impl SelfHealingResolver {
    pub fn new(
        driver: Arc<dyn LiveDriver>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<EmbeddingCache>,
        promotion: Arc<PromotionStore>,
        config: ResolverConfig,
    ) -> Self {
        let ranker = Ranker::new(
            SemanticScorer::new(embedder, cache),
            Arc::clone(&promotion),
            config.fusion,
            config.heuristic,
            config.penalty,
            config.rank,
        );
        let verifier = UniquenessVerifier::new(driver, config.per_attempt(), config.driver_retries);
        Self {
            parser: Arc::new(KeywordIntentParser),
            ranker,
            verifier,
            promotion,
            config,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn IntentParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn promotion(&self) -> &Arc<PromotionStore> {
        &self.promotion
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        self.ranker.semantic().cache()
    }

    async fn run(
        &self,
        query: &str,
        snapshot: &Snapshot,
        context: &ContextId,
        cancel: &CancellationToken,
    ) -> Result<ResolutionReport, LocatorError> {
        let started = Instant::now();
        let mut run = Run {
            request_id: RequestId::new(),
            ranking: Ranking::default(),
            attempts: Vec::new(),
            tried: HashSet::new(),
            candidate_cap: 0,
            deadline: started + self.config.budget(),
            started,
        };

        let mut state = State::Parse;
        let report = loop {
            state = match state {
                State::Parse => {
                    if query.trim().is_empty() {
                        return Err(LocatorError::InputInvalid("empty query".to_string()));
                    }
                    if snapshot.is_empty() {
                        return Err(LocatorError::InputInvalid("empty snapshot".to_string()));
                    }
                    let intent = self.parser.parse(query)?;
                    debug!(
                        target: "locator.events",
                        request_id = %run.request_id,
                        action = intent.action.name(),
                        target_phrase = %intent.target,
                        "resolve.parsed"
                    );
                    State::Match {
                        profile: QueryProfile::build(&intent, snapshot),
                    }
                }

                State::Match { profile } => {
                    run.ranking = self.ranker.rank(&profile, snapshot, context);
                    if run.ranking.candidates.is_empty() {
                        State::Fail {
                            reason: StopReason::Exhausted,
                        }
                    } else {
                        State::Synthesize { rank: 0 }
                    }
                }

                State::Synthesize { rank } => {
                    run.candidate_cap = self.candidate_cap(&run, rank);
                    let queue = run.ranking.candidates[rank]
                        .locators
                        .iter()
                        .map(|locator| Pending {
                            locator: locator.rendered.clone(),
                            tier: Some(locator.tier),
                            heal: None,
                            depth: 0,
                        })
                        .collect();
                    State::Verify {
                        rank,
                        queue,
                        failed: Vec::new(),
                        healed: false,
                    }
                }

                State::Verify {
                    rank,
                    mut queue,
                    mut failed,
                    healed,
                } => {
                    if let Some(reason) = self.limit_reached(&run, cancel) {
                        State::Fail { reason }
                    } else if run.attempts.len() >= run.candidate_cap {
                        debug!(
                            target: "locator.events",
                            request_id = %run.request_id,
                            candidate = rank + 1,
                            attempts = run.attempts.len(),
                            "resolve.candidate_share_spent"
                        );
                        State::AltCandidate { rank }
                    } else {
                        match queue.pop_front() {
                            None if !healed => State::Heal { rank, failed },
                            None => State::AltCandidate { rank },
                            Some(pending) if !run.first_try(rank, &pending.locator) => {
                                State::Verify {
                                    rank,
                                    queue,
                                    failed,
                                    healed,
                                }
                            }
                            Some(pending) => {
                                let result = self
                                    .verify(&mut run, snapshot, rank, &pending, cancel)
                                    .await;
                                match result {
                                    Verification::Unique { handle } => State::Success {
                                        rank,
                                        pending,
                                        handle,
                                    },
                                    Verification::Cancelled => State::Fail {
                                        reason: StopReason::Cancelled,
                                    },
                                    // healing cannot help while the driver is down
                                    Verification::Unavailable { .. } => {
                                        State::AltCandidate { rank }
                                    }
                                    _ => {
                                        failed.push(pending.locator);
                                        State::Verify {
                                            rank,
                                            queue,
                                            failed,
                                            healed,
                                        }
                                    }
                                }
                            }
                        }
                    }
                }

                State::Heal { rank, failed } => {
                    let queue: VecDeque<Pending> = failed
                        .iter()
                        .flat_map(|locator| heal_chain(locator))
                        .filter(|healed| !run.was_tried(rank, &healed.locator))
                        .map(|healed| Pending {
                            locator: healed.locator,
                            tier: None,
                            heal: Some(healed.step),
                            depth: healed.depth,
                        })
                        .collect();
                    events::emit_heal(&run.request_id, rank + 1, queue.len());
                    if queue.is_empty() {
                        State::AltCandidate { rank }
                    } else {
                        State::Verify {
                            rank,
                            queue,
                            failed: Vec::new(),
                            healed: true,
                        }
                    }
                }

                State::AltCandidate { rank } => {
                    self.demote_exhausted(&run, rank, context);
                    let next = rank + 1;
                    if next < self.candidate_limit(&run) {
                        State::Synthesize { rank: next }
                    } else {
                        State::Fail {
                            reason: StopReason::Exhausted,
                        }
                    }
                }

                State::Success {
                    rank,
                    pending,
                    handle,
                } => break self.success(run, snapshot, context, rank, pending, handle),

                State::Fail {
                    reason: StopReason::Exhausted,
                } if driver_down(&run.attempts) => {
                    break self.failure(run, StopReason::DriverUnavailable)
                }

                State::Fail { reason } => break self.failure(run, reason),
            };
        };

        events::emit_report(&report, started.elapsed());
        Ok(report)
    }

    fn candidate_limit(&self, run: &Run) -> usize {
        self.config.alt_candidates.min(run.ranking.candidates.len())
    }

    /// Last attempt index the candidate at `rank` may use: the ceiling minus
    /// the reserve of every alternate ranked below it, and never less than
    /// one fresh attempt.
    fn candidate_cap(&self, run: &Run, rank: usize) -> usize {
        let waiting = self.candidate_limit(run).saturating_sub(rank + 1);
        let reserve = self.config.alt_reserve as usize * waiting;
        (self.config.max_attempts as usize)
            .saturating_sub(reserve)
            .max(run.attempts.len() + 1)
    }

    fn limit_reached(&self, run: &Run, cancel: &CancellationToken) -> Option<StopReason> {
        if cancel.is_cancelled() {
            Some(StopReason::Cancelled)
        } else if Instant::now() >= run.deadline {
            Some(StopReason::Budget)
        } else if run.attempts.len() >= self.config.max_attempts as usize {
            Some(StopReason::AttemptCeiling)
        } else {
            None
        }
    }

    async fn verify(
        &self,
        run: &mut Run,
        snapshot: &Snapshot,
        rank: usize,
        pending: &Pending,
        cancel: &CancellationToken,
    ) -> Verification {
        let candidate = &run.ranking.candidates[rank];
        let scope = scope_ref(snapshot, &candidate.scope);
        let started = Instant::now();
        let result = self
            .verifier
            .verify(
                &pending.locator,
                &scope,
                candidate.backend_id,
                run.deadline,
                cancel,
            )
            .await;
        let attempt = Attempt {
            candidate_rank: rank + 1,
            locator: pending.locator.clone(),
            tier: pending.tier,
            heal: pending.heal,
            heal_depth: pending.depth,
            result: result.clone(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        events::emit_attempt(&run.request_id, &attempt);
        run.attempts.push(attempt);
        result
    }

    /// Demotes a candidate's primary locator once every locator for it failed
    /// on evidence from the page. Driver outages say nothing about the locator.
    fn demote_exhausted(&self, run: &Run, rank: usize, context: &ContextId) {
        let evidence = run.attempts.iter().any(|attempt| {
            attempt.candidate_rank == rank + 1
                && matches!(
                    attempt.result,
                    Verification::NotFound
                        | Verification::Ambiguous { .. }
                        | Verification::Drifted { .. }
                )
        });
        if !evidence {
            return;
        }
        if let Some(primary) = run.ranking.candidates[rank].locators.first() {
            self.promotion.demote(&primary.rendered, context);
        }
    }

    fn success(
        &self,
        run: Run,
        snapshot: &Snapshot,
        context: &ContextId,
        rank: usize,
        pending: Pending,
        handle: ElementHandle,
    ) -> ResolutionReport {
        self.promotion.promote(&pending.locator, context);

        let candidate = &run.ranking.candidates[rank];
        let confidence = discounted(candidate.confidence, self.config.heal_discount, pending.depth);
        let scope = ScopeInfo::from(&scope_ref(snapshot, &candidate.scope));

        let mut explanation = vec![format!(
            "resolved candidate #{} <{}> '{}' with {}",
            rank + 1,
            candidate.tag,
            candidate.label,
            pending.locator
        )];
        if let Some(step) = pending.heal {
            explanation.push(format!(
                "locator healed through {} transform(s), last '{}'; confidence discounted to {confidence:.2}",
                pending.depth,
                step.name()
            ));
        }
        explanation.extend(candidate.notes.iter().cloned());

        ResolutionReport {
            outcome: ResolutionOutcome::Resolved,
            locator: Some(pending.locator),
            backend_id: handle.backend_id.or(Some(candidate.backend_id)),
            confidence,
            scope: Some(scope),
            candidates: summaries(&run.ranking.candidates),
            explanation,
            stop_reason: None,
            cache: run.ranking.cache,
            elapsed_ms: run.started.elapsed().as_millis() as u64,
            request_id: run.request_id,
            attempts: run.attempts,
        }
    }

    fn failure(&self, run: Run, reason: StopReason) -> ResolutionReport {
        let all_ambiguous = !run.attempts.is_empty()
            && run
                .attempts
                .iter()
                .all(|attempt| matches!(attempt.result, Verification::Ambiguous { .. }));
        let outcome = if all_ambiguous {
            ResolutionOutcome::Ambiguous
        } else {
            ResolutionOutcome::NotFound
        };

        let mut explanation = vec![match reason {
            StopReason::Budget => format!(
                "resolution budget of {}ms spent after {} verification(s)",
                self.config.budget_ms,
                run.attempts.len()
            ),
            StopReason::Cancelled => "resolution cancelled by caller".to_string(),
            StopReason::AttemptCeiling => format!(
                "attempt ceiling of {} verifications reached",
                self.config.max_attempts
            ),
            StopReason::Exhausted if run.ranking.candidates.is_empty() => {
                "no element in the snapshot could be scored".to_string()
            }
            StopReason::Exhausted => "no locator matched exactly one element in scope".to_string(),
            StopReason::DriverUnavailable => format!(
                "driver unavailable for all {} verification(s)",
                run.attempts.len()
            ),
        }];
        if all_ambiguous {
            explanation.push("every locator tried matched several elements".to_string());
        }
        for (idx, candidate) in run
            .ranking
            .candidates
            .iter()
            .take(self.config.alt_candidates)
            .enumerate()
        {
            let tried = run
                .attempts
                .iter()
                .filter(|attempt| attempt.candidate_rank == idx + 1)
                .map(|attempt| format!("{} -> {}", attempt.locator, attempt.result.label()))
                .collect::<Vec<_>>();
            explanation.push(format!(
                "candidate #{} <{}> '{}' confidence {:.2}; {}",
                idx + 1,
                candidate.tag,
                candidate.label,
                candidate.confidence,
                if tried.is_empty() {
                    "not verified".to_string()
                } else {
                    tried.join(", ")
                }
            ));
        }

        ResolutionReport {
            outcome,
            locator: None,
            backend_id: None,
            confidence: 0.0,
            scope: None,
            candidates: summaries(&run.ranking.candidates),
            explanation,
            stop_reason: Some(reason),
            cache: run.ranking.cache,
            elapsed_ms: run.started.elapsed().as_millis() as u64,
            request_id: run.request_id,
            attempts: run.attempts,
        }
    }
}

#[async_trait]
impl ElementResolver for SelfHealingResolver {
    async fn resolve(
        &self,
        query: &str,
        snapshot: &Snapshot,
        context: &ContextId,
    ) -> Result<ResolutionReport, LocatorError> {
        self.run(query, snapshot, context, &CancellationToken::new())
            .await
    }

    async fn resolve_with_cancel(
        &self,
        query: &str,
        snapshot: &Snapshot,
        context: &ContextId,
        cancel: CancellationToken,
    ) -> Result<ResolutionReport, LocatorError> {
        self.run(query, snapshot, context, &cancel).await
    }
}

fn driver_down(attempts: &[Attempt]) -> bool {
    !attempts.is_empty()
        && attempts
            .iter()
            .all(|attempt| matches!(attempt.result, Verification::Unavailable { .. }))
}

fn summaries(candidates: &[RankedCandidate]) -> Vec<CandidateSummary> {
    candidates
        .iter()
        .enumerate()
        .map(|(idx, candidate)| CandidateSummary::from_ranked(idx + 1, candidate))
        .collect()
}

/// Scope handle from the snapshot's scope tree. A scope missing from the tree
/// is addressed as a frame directly below the main document.
fn scope_ref(snapshot: &Snapshot, scope: &ScopeId) -> ScopeRef {
    match snapshot.scopes.scope_ref(scope) {
        Some(found) => found.clone(),
        None if scope.is_main() => ScopeRef::main(),
        None => ScopeRef::main().child(scope.clone(), ScopeKind::Frame),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SnapshotDriver;
    use embedding_cache::HashingEmbedder;
    use perceiver_structural::{snapshot_from_tree, CapturedTree, RawDomNode};

    fn resolver(page: Arc<Snapshot>, config: ResolverConfig) -> SelfHealingResolver {
        SelfHealingResolver::new(
            Arc::new(SnapshotDriver::new(page)),
            Arc::new(HashingEmbedder::new(256)),
            Arc::new(EmbeddingCache::memory_only(1024)),
            Arc::new(PromotionStore::in_memory()),
            config,
        )
    }

    fn login_page() -> Arc<Snapshot> {
        Arc::new(snapshot_from_tree(&CapturedTree::new(
            vec![
                RawDomNode::new(1, "form").attr("id", "login"),
                RawDomNode::new(2, "input").child_of(1).attr("name", "user"),
                RawDomNode::new(3, "button")
                    .child_of(1)
                    .text("Sign in")
                    .attr("data-testid", "sign-in"),
                RawDomNode::new(4, "a").text("Forgot password"),
            ],
            vec![],
        )))
    }

    #[tokio::test]
    async fn resolves_and_promotes() {
        let page = login_page();
        let resolver = resolver(Arc::clone(&page), ResolverConfig::default());
        let context = ContextId::new("login");

        let report = resolver.resolve("click sign in", &page, &context).await.unwrap();
        assert!(report.is_resolved());
        assert_eq!(report.locator.as_deref(), Some("[data-testid=\"sign-in\"]"));
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.heal_steps(), 0);
        assert!(report.confidence > 0.0 && report.confidence <= 1.0);
        assert_eq!(report.scope.as_ref().unwrap().scope_path, "main");
        assert!(resolver.promotion().score("[data-testid=\"sign-in\"]", &context) > 0.0);
    }

    #[tokio::test]
    async fn empty_inputs_are_rejected() {
        let page = login_page();
        let resolver = resolver(Arc::clone(&page), ResolverConfig::default());
        let context = ContextId::new("login");
        assert!(matches!(
            resolver.resolve("  ", &page, &context).await,
            Err(LocatorError::InputInvalid(_))
        ));
        let empty = snapshot_from_tree(&CapturedTree::default());
        assert!(matches!(
            resolver.resolve("click sign in", &empty, &context).await,
            Err(LocatorError::InputInvalid(_))
        ));
    }

    #[tokio::test]
    async fn attempt_ceiling_stops_the_search() {
        let page = login_page();
        // the live page lost every element the capture knew about
        let live = Arc::new(snapshot_from_tree(&CapturedTree::new(
            vec![RawDomNode::new(9, "div").text("Maintenance")],
            vec![],
        )));
        let config = ResolverConfig {
            max_attempts: 2,
            ..ResolverConfig::default()
        };
        let resolver = resolver(live, config);
        let report = resolver
            .resolve("click sign in", &page, &ContextId::new("login"))
            .await
            .unwrap();
        assert_eq!(report.outcome, ResolutionOutcome::NotFound);
        assert_eq!(report.stop_reason, Some(StopReason::AttemptCeiling));
        assert_eq!(report.attempts.len(), 2);
        assert!(!report.explanation.is_empty());
    }

    #[test]
    fn config_validation() {
        assert!(ResolverConfig::default().validate().is_ok());
        let bad = ResolverConfig {
            max_attempts: 0,
            ..ResolverConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = ResolverConfig {
            fusion: FusionWeights {
                semantic: -0.1,
                ..FusionWeights::default()
            },
            ..ResolverConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
