//! Capture counters: snapshots taken, unchanged recaptures, scopes captured
//! or skipped, diff latency and reindex marks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

static SNAPSHOT_TOTAL: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_UNCHANGED: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_LAT_NS: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_LAT_SAMPLES: AtomicU64 = AtomicU64::new(0);

static SCOPES_CAPTURED: AtomicU64 = AtomicU64::new(0);
static SCOPES_SKIPPED: AtomicU64 = AtomicU64::new(0);

static DIFF_TOTAL: AtomicU64 = AtomicU64::new(0);
static DIFF_LAT_NS: AtomicU64 = AtomicU64::new(0);
static DIFF_LAT_SAMPLES: AtomicU64 = AtomicU64::new(0);

static REINDEX_MARKS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricCounter {
    pub total: u64,
    pub avg_ms: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricSnapshot {
    pub snapshot: MetricCounter,
    pub snapshot_unchanged: u64,
    pub scopes_captured: u64,
    pub scopes_skipped: u64,
    pub diff: MetricCounter,
    pub reindex_marks: u64,
}

pub fn record_snapshot(scopes: usize, duration: Duration) {
    SNAPSHOT_TOTAL.fetch_add(1, Ordering::Relaxed);
    SCOPES_CAPTURED.fetch_add(scopes as u64, Ordering::Relaxed);
    record_latency(&SNAPSHOT_LAT_NS, &SNAPSHOT_LAT_SAMPLES, duration);
}

pub fn record_unchanged() {
    SNAPSHOT_UNCHANGED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_scope_skipped() {
    SCOPES_SKIPPED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_diff(duration: Duration) {
    DIFF_TOTAL.fetch_add(1, Ordering::Relaxed);
    record_latency(&DIFF_LAT_NS, &DIFF_LAT_SAMPLES, duration);
}

pub fn record_reindex_mark() {
    REINDEX_MARKS.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> MetricSnapshot {
    MetricSnapshot {
        snapshot: make_counter(
            SNAPSHOT_TOTAL.load(Ordering::Relaxed),
            SNAPSHOT_LAT_NS.load(Ordering::Relaxed),
            SNAPSHOT_LAT_SAMPLES.load(Ordering::Relaxed),
        ),
        snapshot_unchanged: SNAPSHOT_UNCHANGED.load(Ordering::Relaxed),
        scopes_captured: SCOPES_CAPTURED.load(Ordering::Relaxed),
        scopes_skipped: SCOPES_SKIPPED.load(Ordering::Relaxed),
        diff: make_counter(
            DIFF_TOTAL.load(Ordering::Relaxed),
            DIFF_LAT_NS.load(Ordering::Relaxed),
            DIFF_LAT_SAMPLES.load(Ordering::Relaxed),
        ),
        reindex_marks: REINDEX_MARKS.load(Ordering::Relaxed),
    }
}

fn make_counter(total: u64, nanos: u64, samples: u64) -> MetricCounter {
    let avg_ms = if samples == 0 {
        0.0
    } else {
        (nanos as f64 / samples as f64) / 1_000_000.0
    };
    MetricCounter { total, avg_ms }
}

fn record_latency(total_ns: &AtomicU64, samples: &AtomicU64, duration: Duration) {
    let nanos = duration_to_nanos(duration);
    total_ns.fetch_add(nanos, Ordering::Relaxed);
    samples.fetch_add(1, Ordering::Relaxed);
}

fn duration_to_nanos(duration: Duration) -> u64 {
    let nanos = duration.as_nanos();
    if nanos > u64::MAX as u128 {
        u64::MAX
    } else {
        nanos as u64
    }
}
