//! Snapshot capture for element resolution.
//!
//! Structural and accessibility trees are merged per scope (main document,
//! frames, shadow roots) into flat [`ElementDescriptor`]s carrying an
//! identity hash that survives re-rendering with regenerated ids.

pub mod differ;
pub mod errors;
pub mod events;
pub mod identity;
pub mod lifecycle;
pub mod merge;
pub mod metrics;
pub mod model;
pub mod policy;
pub mod ports;
pub mod sampler;
pub mod stability;
pub mod tracker;

pub use differ::{compute_hash, detect_change, diff, SnapshotDiff};
pub use errors::PerceiverError;
pub use identity::identity_hash;
pub use lifecycle::{route_channel, ReindexFlag, RouteEvent, RouteEventSender, RouteWatcher};
pub use merge::{merge, snapshot_from_tree, MergeOutput, SnapshotBuilder};
pub use model::{
    CapturedTree, DescriptorId, ElementDescriptor, RawAxNode, RawDomNode, ScopeNode, ScopeTree,
    Snapshot, SnapshotId,
};
pub use policy::CaptureOptions;
pub use ports::{CapturePort, StaticCapturePort};
pub use sampler::Sampler;
pub use tracker::{SnapshotChange, SnapshotTracker};
