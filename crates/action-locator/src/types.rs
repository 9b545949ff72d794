//! Resolution report types

use locator_core_types::{BackendNodeId, RequestId, ScopeId, ScopeRef};
use serde::Serialize;

use crate::healer::HealStep;
use crate::scoring::{CallCacheStats, RankedCandidate, ScoreSignals};
use crate::synth::LocatorTier;
use crate::verifier::Verification;

/// Final outcome of one resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Resolved,
    NotFound,
    /// Every verification matched more than one element
    Ambiguous,
}

/// Why the resolver stopped without a verified locator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Wall-clock budget spent
    Budget,
    Cancelled,
    /// Verification attempt ceiling reached
    AttemptCeiling,
    /// Every candidate and heal exhausted
    Exhausted,
    /// Every verification failed in the driver
    DriverUnavailable,
}

impl StopReason {
    pub fn name(&self) -> &'static str {
        match self {
            StopReason::Budget => "budget",
            StopReason::Cancelled => "cancelled",
            StopReason::AttemptCeiling => "attempt_ceiling",
            StopReason::Exhausted => "exhausted",
            StopReason::DriverUnavailable => "driver_unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeInfo {
    pub scope_id: ScopeId,
    /// `main/checkout/payment`
    pub scope_path: String,
}

impl From<&ScopeRef> for ScopeInfo {
    fn from(scope: &ScopeRef) -> Self {
        Self {
            scope_id: scope.id.clone(),
            scope_path: scope.path_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateSummary {
    /// 1-based rank
    pub rank: usize,
    pub backend_id: BackendNodeId,
    pub scope: ScopeId,
    pub tag: String,
    pub label: String,
    pub confidence: f32,
    pub signals: ScoreSignals,
    /// Primary synthesized locator
    pub locator: Option<String>,
    pub notes: Vec<String>,
}

impl CandidateSummary {
    pub fn from_ranked(rank: usize, candidate: &RankedCandidate) -> Self {
        Self {
            rank,
            backend_id: candidate.backend_id,
            scope: candidate.scope.clone(),
            tag: candidate.tag.clone(),
            label: candidate.label.clone(),
            confidence: candidate.confidence,
            signals: candidate.signals,
            locator: candidate.locators.first().map(|l| l.rendered.clone()),
            notes: candidate.notes.clone(),
        }
    }
}

/// One verification call
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    pub candidate_rank: usize,
    pub locator: String,
    /// Synthesis tier, for locators that were not healed
    pub tier: Option<LocatorTier>,
    /// Last heal transform applied, for healed locators
    pub heal: Option<HealStep>,
    pub heal_depth: u32,
    pub result: Verification,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionReport {
    pub request_id: RequestId,
    pub outcome: ResolutionOutcome,
    /// Verified locator, when resolved
    pub locator: Option<String>,
    pub backend_id: Option<BackendNodeId>,
    /// Winner's fused confidence after the heal discount; 0 when unresolved
    pub confidence: f32,
    pub scope: Option<ScopeInfo>,
    pub candidates: Vec<CandidateSummary>,
    /// Human-readable reasoning; never empty on failure
    pub explanation: Vec<String>,
    pub attempts: Vec<Attempt>,
    pub stop_reason: Option<StopReason>,
    pub cache: CallCacheStats,
    pub elapsed_ms: u64,
}

impl ResolutionReport {
    pub fn is_resolved(&self) -> bool {
        self.outcome == ResolutionOutcome::Resolved
    }

    /// Heal transforms applied to the verified locator
    pub fn heal_steps(&self) -> u32 {
        if !self.is_resolved() {
            return 0;
        }
        self.attempts
            .last()
            .map(|attempt| attempt.heal_depth)
            .unwrap_or(0)
    }
}
