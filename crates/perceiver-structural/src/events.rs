use std::time::Duration;

use locator_core_types::ScopeRef;
use tracing::{debug, warn};

use crate::metrics;

pub fn emit_snapshot(scope_count: usize, descriptor_count: usize, content_hash: &str, duration: Duration) {
    metrics::record_snapshot(scope_count, duration);
    debug!(
        target: "perceiver.events",
        scope_count,
        descriptor_count,
        content_hash,
        elapsed_ms = duration.as_millis() as u64,
        "structural.snapshot.captured"
    );
}

pub fn emit_unchanged(content_hash: &str) {
    metrics::record_unchanged();
    debug!(
        target: "perceiver.events",
        content_hash,
        "structural.snapshot.unchanged"
    );
}

pub fn emit_scope_skipped(scope: &ScopeRef, reason: &str) {
    metrics::record_scope_skipped();
    warn!(
        target: "perceiver.events",
        scope = %scope,
        reason,
        "structural.scope.skipped"
    );
}

pub fn emit_diff(change_count: usize, duration: Duration) {
    metrics::record_diff(duration);
    debug!(
        target: "perceiver.events",
        change_count,
        "structural.diff.generated"
    );
}

pub fn emit_reindex(kind: &str, newly_marked: bool) {
    if newly_marked {
        metrics::record_reindex_mark();
    }
    debug!(
        target: "perceiver.events",
        kind,
        newly_marked,
        "structural.route.reindex"
    );
}
