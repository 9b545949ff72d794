use std::time::Duration;

use locator_core_types::RequestId;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::types::{Attempt, ResolutionOutcome, ResolutionReport, StopReason};

pub fn emit_attempt(request_id: &RequestId, attempt: &Attempt) {
    metrics::record_attempt();
    debug!(
        target: "locator.events",
        request_id = %request_id,
        candidate = attempt.candidate_rank,
        locator = %attempt.locator,
        heal = attempt.heal.map(|step| step.name()).unwrap_or("none"),
        result = attempt.result.label(),
        elapsed_ms = attempt.elapsed_ms,
        "resolve.verify.attempt"
    );
}

pub fn emit_heal(request_id: &RequestId, candidate: usize, added: usize) {
    debug!(
        target: "locator.events",
        request_id = %request_id,
        candidate,
        added,
        "resolve.heal.generated"
    );
}

pub fn emit_report(report: &ResolutionReport, duration: Duration) {
    metrics::record_resolution(duration);
    match report.outcome {
        ResolutionOutcome::Resolved => {
            metrics::record_resolved(report.heal_steps() > 0);
            info!(
                target: "locator.events",
                request_id = %report.request_id,
                locator = report.locator.as_deref().unwrap_or_default(),
                confidence = report.confidence,
                heal_steps = report.heal_steps(),
                attempts = report.attempts.len(),
                elapsed_ms = report.elapsed_ms,
                "resolve.resolved"
            );
        }
        outcome => {
            if outcome == ResolutionOutcome::Ambiguous {
                metrics::record_ambiguous();
            } else {
                metrics::record_not_found();
            }
            match report.stop_reason {
                Some(StopReason::Budget) => metrics::record_budget_stop(),
                Some(StopReason::Cancelled) => metrics::record_cancelled(),
                Some(StopReason::DriverUnavailable) => metrics::record_driver_stop(),
                _ => {}
            }
            warn!(
                target: "locator.events",
                request_id = %report.request_id,
                outcome = ?outcome,
                stop_reason = report.stop_reason.map(|r| r.name()).unwrap_or("none"),
                attempts = report.attempts.len(),
                candidates = report.candidates.len(),
                elapsed_ms = report.elapsed_ms,
                "resolve.failed"
            );
        }
    }
}
