//! Scope-aware uniqueness verification
//!
//! A locator is accepted only when it matches exactly one element inside the
//! candidate's scope and that element is the candidate itself. Every driver
//! call is bounded by the per-attempt timeout, the remaining budget and the
//! caller's cancellation token.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use locator_core_types::{BackendNodeId, ScopeRef};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::driver::{ElementHandle, LiveDriver};
use crate::errors::LocatorError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verification {
    Unique { handle: ElementHandle },
    NotFound,
    Ambiguous { count: usize },
    /// Exactly one match, but not the element that was ranked
    Drifted { handle: ElementHandle },
    /// Driver failed or timed out after retries
    Unavailable { reason: String },
    /// Locator string could not be evaluated
    Invalid { reason: String },
    Cancelled,
}

impl Verification {
    pub fn is_unique(&self) -> bool {
        matches!(self, Verification::Unique { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verification::Unique { .. } => "unique",
            Verification::NotFound => "not_found",
            Verification::Ambiguous { .. } => "ambiguous",
            Verification::Drifted { .. } => "drifted",
            Verification::Unavailable { .. } => "unavailable",
            Verification::Invalid { .. } => "invalid",
            Verification::Cancelled => "cancelled",
        }
    }
}

pub struct UniquenessVerifier {
    driver: Arc<dyn LiveDriver>,
    per_attempt: Duration,
    retries: u32,
}

impl UniquenessVerifier {
    pub fn new(driver: Arc<dyn LiveDriver>, per_attempt: Duration, retries: u32) -> Self {
        Self {
            driver,
            per_attempt,
            retries,
        }
    }

    pub async fn verify(
        &self,
        locator: &str,
        scope: &ScopeRef,
        expected: BackendNodeId,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Verification {
        let count = self
            .call(deadline, cancel, || self.driver.count_matches(locator, scope))
            .await;
        match count {
            Ok(0) => return Verification::NotFound,
            Ok(1) => {}
            Ok(count) => return Verification::Ambiguous { count },
            Err(err) => return fold_error(err),
        }

        let handle = match self
            .call(deadline, cancel, || self.driver.resolve_one(locator, scope))
            .await
        {
            Ok(handle) => handle,
            Err(err) => return fold_error(err),
        };
        match handle.backend_id {
            Some(found) if found != expected => {
                debug!(
                    target: "locator.events",
                    event = "verify.drifted",
                    locator,
                    expected = expected.0,
                    found = found.0,
                    "locator resolved to a different element"
                );
                Verification::Drifted { handle }
            }
            _ => Verification::Unique { handle },
        }
    }

    async fn call<T, F, Fut>(
        &self,
        deadline: Instant,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, LocatorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LocatorError>>,
    {
        let mut retry = 0;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(LocatorError::Timeout("resolution budget exhausted".to_string()));
            }
            let limit = self.per_attempt.min(deadline - now);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(LocatorError::Cancelled("cancelled during verification".to_string()));
                }
                outcome = tokio::time::timeout(limit, op()) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(LocatorError::Timeout(format!(
                        "driver call exceeded {}ms",
                        limit.as_millis()
                    ))),
                },
            };
            match result {
                Err(err) if err.is_retryable() && retry < self.retries => {
                    retry += 1;
                    warn!(
                        target: "locator.events",
                        event = "verify.retry",
                        retry,
                        error = %err,
                        "driver call failed; retrying"
                    );
                }
                other => return other,
            }
        }
    }
}

fn fold_error(err: LocatorError) -> Verification {
    match err {
        LocatorError::NotFound(_) => Verification::NotFound,
        LocatorError::Ambiguous { count, .. } => Verification::Ambiguous { count },
        LocatorError::Cancelled(_) => Verification::Cancelled,
        LocatorError::InputInvalid(reason) => Verification::Invalid { reason },
        other => Verification::Unavailable {
            reason: other.to_string(),
        },
    }
}
