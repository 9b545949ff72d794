use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use serde::Serialize;

use crate::events;
use crate::model::{ElementDescriptor, Snapshot};

/// Content hash over everything a resolution can observe: identity, text,
/// accessibility fields, visibility and scope, in document order.
pub fn compute_hash(descriptors: &[ElementDescriptor]) -> String {
    let mut hasher = blake3::Hasher::new();
    for descriptor in descriptors {
        hasher.update(descriptor.identity_hash.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(descriptor.text.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(descriptor.role.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\x1f");
        hasher.update(descriptor.name.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\x1f");
        hasher.update(descriptor.scope.as_str().as_bytes());
        hasher.update(if descriptor.visible { b"\x01" } else { b"\x00" });
        for (key, value) in &descriptor.attributes {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b";");
        }
        hasher.update(b"\x1e");
    }
    format!("snap_{}", hasher.finalize().to_hex())
}

/// Snapshots with equal content hashes are treated as the same document.
pub fn detect_change(old: &Snapshot, new: &Snapshot) -> bool {
    old.content_hash != new.content_hash
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SnapshotDiff {
    pub changed: bool,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Identities present in both snapshots whose text or visibility moved.
    pub retexted: Vec<String>,
}

impl SnapshotDiff {
    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.retexted.len()
    }
}

/// Identity-level diff, capped at `max_changes` entries per list.
pub fn diff(base: &Snapshot, current: &Snapshot, max_changes: usize) -> SnapshotDiff {
    let started = Instant::now();
    if !detect_change(base, current) {
        events::emit_diff(0, started.elapsed());
        return SnapshotDiff::default();
    }

    let before: HashMap<&str, &ElementDescriptor> = base
        .descriptors
        .iter()
        .map(|d| (d.identity_hash.as_str(), d))
        .collect();
    let after: HashMap<&str, &ElementDescriptor> = current
        .descriptors
        .iter()
        .map(|d| (d.identity_hash.as_str(), d))
        .collect();

    let before_keys: BTreeSet<&str> = before.keys().copied().collect();
    let after_keys: BTreeSet<&str> = after.keys().copied().collect();

    let added: Vec<String> = after_keys
        .difference(&before_keys)
        .take(max_changes)
        .map(|key| key.to_string())
        .collect();
    let removed: Vec<String> = before_keys
        .difference(&after_keys)
        .take(max_changes)
        .map(|key| key.to_string())
        .collect();
    let retexted: Vec<String> = before_keys
        .intersection(&after_keys)
        .filter(|key| {
            let old = before[*key];
            let new = after[*key];
            old.text != new.text || old.visible != new.visible
        })
        .take(max_changes)
        .map(|key| key.to_string())
        .collect();

    let diff = SnapshotDiff {
        changed: true,
        added,
        removed,
        retexted,
    };
    events::emit_diff(diff.change_count(), started.elapsed());
    diff
}
