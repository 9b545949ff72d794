use std::collections::HashMap;

use async_trait::async_trait;
use locator_core_types::{ScopeId, ScopeRef};
use parking_lot::RwLock;

use crate::errors::PerceiverError;
use crate::model::CapturedTree;

/// Boundary to the automation driver for reading document structure.
#[async_trait]
pub trait CapturePort: Send + Sync {
    /// Structural and accessibility nodes of one scope.
    async fn capture_tree(&self, scope: &ScopeRef) -> Result<CapturedTree, PerceiverError>;

    /// Frames and shadow roots nested directly inside `scope`.
    async fn list_frames(&self, scope: &ScopeRef) -> Result<Vec<ScopeRef>, PerceiverError>;
}

/// In-memory capture port serving pre-recorded trees, for offline use and tests.
#[derive(Default)]
pub struct StaticCapturePort {
    trees: RwLock<HashMap<ScopeId, CapturedTree>>,
    frames: RwLock<HashMap<ScopeId, Vec<ScopeRef>>>,
    failing: RwLock<HashMap<ScopeId, String>>,
}

impl StaticCapturePort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tree(&self, scope: &ScopeId, tree: CapturedTree) {
        self.trees.write().insert(scope.clone(), tree);
    }

    pub fn add_frame(&self, parent: &ScopeId, child: ScopeRef) {
        self.frames
            .write()
            .entry(parent.clone())
            .or_default()
            .push(child);
    }

    /// Makes captures of `scope` fail, the way cross-origin frames do.
    pub fn fail_scope(&self, scope: &ScopeId, reason: impl Into<String>) {
        self.failing.write().insert(scope.clone(), reason.into());
    }
}

#[async_trait]
impl CapturePort for StaticCapturePort {
    async fn capture_tree(&self, scope: &ScopeRef) -> Result<CapturedTree, PerceiverError> {
        if let Some(reason) = self.failing.read().get(&scope.id) {
            return Err(PerceiverError::scope_unavailable(scope.to_string(), reason.clone()));
        }
        self.trees
            .read()
            .get(&scope.id)
            .cloned()
            .ok_or_else(|| PerceiverError::CaptureFailed(format!("no tree recorded for {scope}")))
    }

    async fn list_frames(&self, scope: &ScopeRef) -> Result<Vec<ScopeRef>, PerceiverError> {
        Ok(self
            .frames
            .read()
            .get(&scope.id)
            .cloned()
            .unwrap_or_default())
    }
}
