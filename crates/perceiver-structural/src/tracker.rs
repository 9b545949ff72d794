use std::sync::Arc;

use parking_lot::RwLock;

use crate::events;
use crate::lifecycle::ReindexFlag;
use crate::model::Snapshot;

/// Result of offering a fresh capture to the tracker.
#[derive(Clone, Debug)]
pub enum SnapshotChange {
    /// Same content hash as the current snapshot; the current one is kept.
    Unchanged(Arc<Snapshot>),
    /// The content moved (or nothing was held yet) and the snapshot was swapped.
    Replaced {
        previous: Option<Arc<Snapshot>>,
        current: Arc<Snapshot>,
    },
}

impl SnapshotChange {
    pub fn snapshot(&self) -> &Arc<Snapshot> {
        match self {
            SnapshotChange::Unchanged(snapshot) => snapshot,
            SnapshotChange::Replaced { current, .. } => current,
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, SnapshotChange::Replaced { .. })
    }
}

/// Holds the current snapshot. Snapshots are immutable; a change swaps the
/// whole `Arc` so in-flight readers keep a consistent view.
#[derive(Debug, Default)]
pub struct SnapshotTracker {
    current: RwLock<Option<Arc<Snapshot>>>,
    reindex: ReindexFlag,
}

impl SnapshotTracker {
    pub fn new(reindex: ReindexFlag) -> Self {
        Self {
            current: RwLock::new(None),
            reindex,
        }
    }

    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    pub fn reindex_flag(&self) -> &ReindexFlag {
        &self.reindex
    }

    /// Whether the caller should recapture before resolving.
    pub fn needs_capture(&self) -> bool {
        self.current.read().is_none() || self.reindex.is_pending()
    }

    /// Clears a pending reindex mark ahead of a capture. A mark raised while
    /// that capture runs stays pending for the next one.
    pub fn begin_capture(&self) -> bool {
        self.reindex.take()
    }

    /// Installs `snapshot`. The reindex flag is left alone; callers clear it
    /// with [`SnapshotTracker::begin_capture`] before capturing.
    pub fn offer(&self, snapshot: Snapshot) -> SnapshotChange {
        let mut guard = self.current.write();
        if let Some(existing) = guard.as_ref() {
            if existing.content_hash == snapshot.content_hash {
                events::emit_unchanged(&existing.content_hash);
                return SnapshotChange::Unchanged(Arc::clone(existing));
            }
        }
        let current = Arc::new(snapshot);
        let previous = guard.replace(Arc::clone(&current));
        SnapshotChange::Replaced { previous, current }
    }

    pub fn invalidate(&self) {
        self.current.write().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::snapshot_from_tree;
    use crate::model::{CapturedTree, RawDomNode};

    fn page(label: &str) -> Snapshot {
        snapshot_from_tree(&CapturedTree::new(
            vec![RawDomNode::new(1, "button").text(label)],
            vec![],
        ))
    }

    #[test]
    fn identical_capture_keeps_current_snapshot() {
        let tracker = SnapshotTracker::default();
        assert!(tracker.needs_capture());

        let first = tracker.offer(page("Save"));
        assert!(first.is_changed());
        let held = Arc::clone(first.snapshot());

        let second = tracker.offer(page("Save"));
        assert!(!second.is_changed());
        assert!(Arc::ptr_eq(second.snapshot(), &held));
        assert!(!tracker.needs_capture());
    }

    #[test]
    fn changed_capture_replaces_and_clears_reindex() {
        let tracker = SnapshotTracker::default();
        tracker.offer(page("Save"));
        tracker.reindex_flag().mark();
        assert!(tracker.needs_capture());

        assert!(tracker.begin_capture());
        match tracker.offer(page("Saved")) {
            SnapshotChange::Replaced { previous, current } => {
                assert!(previous.is_some());
                assert_eq!(current.descriptors[0].text, "Saved");
            }
            other => panic!("expected replacement, got {other:?}"),
        }
        assert!(!tracker.needs_capture());
    }

    #[test]
    fn mark_raised_during_capture_stays_pending() {
        let tracker = SnapshotTracker::default();
        tracker.offer(page("Save"));
        tracker.reindex_flag().mark();

        assert!(tracker.begin_capture());
        // route change lands while the capture is in flight
        tracker.reindex_flag().mark();
        tracker.offer(page("Saved"));
        assert!(tracker.needs_capture());

        assert!(tracker.begin_capture());
        tracker.offer(page("Saved again"));
        assert!(!tracker.needs_capture());
    }
}
