//! Process-wide resolution counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

static RESOLVE_TOTAL: AtomicU64 = AtomicU64::new(0);
static RESOLVE_LAT_NS: AtomicU64 = AtomicU64::new(0);
static RESOLVED: AtomicU64 = AtomicU64::new(0);
static RESOLVED_HEALED: AtomicU64 = AtomicU64::new(0);
static NOT_FOUND: AtomicU64 = AtomicU64::new(0);
static AMBIGUOUS: AtomicU64 = AtomicU64::new(0);
static STOPPED_BUDGET: AtomicU64 = AtomicU64::new(0);
static STOPPED_CANCELLED: AtomicU64 = AtomicU64::new(0);
static STOPPED_DRIVER: AtomicU64 = AtomicU64::new(0);
static VERIFY_ATTEMPTS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResolveMetrics {
    pub total: u64,
    pub avg_ms: f64,
    pub resolved: u64,
    pub resolved_healed: u64,
    pub not_found: u64,
    pub ambiguous: u64,
    pub stopped_budget: u64,
    pub stopped_cancelled: u64,
    pub stopped_driver: u64,
    pub verify_attempts: u64,
}

pub fn record_resolution(duration: Duration) {
    RESOLVE_TOTAL.fetch_add(1, Ordering::Relaxed);
    RESOLVE_LAT_NS.fetch_add(duration.as_nanos().min(u64::MAX as u128) as u64, Ordering::Relaxed);
}

pub fn record_resolved(healed: bool) {
    RESOLVED.fetch_add(1, Ordering::Relaxed);
    if healed {
        RESOLVED_HEALED.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_not_found() {
    NOT_FOUND.fetch_add(1, Ordering::Relaxed);
}

pub fn record_ambiguous() {
    AMBIGUOUS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_budget_stop() {
    STOPPED_BUDGET.fetch_add(1, Ordering::Relaxed);
}

pub fn record_cancelled() {
    STOPPED_CANCELLED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_driver_stop() {
    STOPPED_DRIVER.fetch_add(1, Ordering::Relaxed);
}

pub fn record_attempt() {
    VERIFY_ATTEMPTS.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> ResolveMetrics {
    let total = RESOLVE_TOTAL.load(Ordering::Relaxed);
    let nanos = RESOLVE_LAT_NS.load(Ordering::Relaxed);
    ResolveMetrics {
        total,
        avg_ms: if total == 0 {
            0.0
        } else {
            (nanos as f64 / total as f64) / 1_000_000.0
        },
        resolved: RESOLVED.load(Ordering::Relaxed),
        resolved_healed: RESOLVED_HEALED.load(Ordering::Relaxed),
        not_found: NOT_FOUND.load(Ordering::Relaxed),
        ambiguous: AMBIGUOUS.load(Ordering::Relaxed),
        stopped_budget: STOPPED_BUDGET.load(Ordering::Relaxed),
        stopped_cancelled: STOPPED_CANCELLED.load(Ordering::Relaxed),
        stopped_driver: STOPPED_DRIVER.load(Ordering::Relaxed),
        verify_attempts: VERIFY_ATTEMPTS.load(Ordering::Relaxed),
    }
}
