//! Live driver port
//!
//! The resolver never talks to a browser directly. It asks a [`LiveDriver`]
//! how many elements a locator matches inside one scope and for a handle to
//! the single match.

use std::sync::Arc;

use async_trait::async_trait;
use locator_core_types::{BackendNodeId, ScopeId, ScopeRef};
use parking_lot::RwLock;
use perceiver_structural::Snapshot;
use serde::Serialize;

use crate::errors::LocatorError;
use crate::locator::Locator;

/// Reference to the element a locator resolved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementHandle {
    /// Unknown when the driver cannot map the live node back to a capture
    pub backend_id: Option<BackendNodeId>,
    pub scope: ScopeId,
    pub locator: String,
}

#[async_trait]
pub trait LiveDriver: Send + Sync {
    /// Matches of `locator` inside `scope` only.
    async fn count_matches(&self, locator: &str, scope: &ScopeRef) -> Result<usize, LocatorError>;

    /// The single match of `locator` inside `scope`. `NotFound` or
    /// `Ambiguous` when there is not exactly one.
    async fn resolve_one(&self, locator: &str, scope: &ScopeRef) -> Result<ElementHandle, LocatorError>;
}

/// Evaluates locators against a captured snapshot standing in for the live
/// page. The page can be swapped to simulate re-renders.
pub struct SnapshotDriver {
    page: RwLock<Arc<Snapshot>>,
}

impl SnapshotDriver {
    pub fn new(page: Arc<Snapshot>) -> Self {
        Self {
            page: RwLock::new(page),
        }
    }

    pub fn set_page(&self, page: Arc<Snapshot>) {
        *self.page.write() = page;
    }

    pub fn page(&self) -> Arc<Snapshot> {
        Arc::clone(&self.page.read())
    }

    fn matches(&self, locator: &str, scope: &ScopeRef) -> Result<Vec<BackendNodeId>, LocatorError> {
        let parsed: Locator = locator.parse()?;
        let page = self.page();
        if !page.scopes.contains(&scope.id) {
            return Err(LocatorError::DriverUnavailable(format!(
                "scope '{scope}' is not attached"
            )));
        }
        Ok(parsed
            .select(&page, &scope.id)
            .into_iter()
            .map(|descriptor| descriptor.backend_id)
            .collect())
    }
}

#[async_trait]
impl LiveDriver for SnapshotDriver {
    async fn count_matches(&self, locator: &str, scope: &ScopeRef) -> Result<usize, LocatorError> {
        self.matches(locator, scope).map(|found| found.len())
    }

    async fn resolve_one(&self, locator: &str, scope: &ScopeRef) -> Result<ElementHandle, LocatorError> {
        let found = self.matches(locator, scope)?;
        match found.as_slice() {
            [backend_id] => Ok(ElementHandle {
                backend_id: Some(*backend_id),
                scope: scope.id.clone(),
                locator: locator.to_string(),
            }),
            [] => Err(LocatorError::NotFound(format!("{locator} in {scope}"))),
            many => Err(LocatorError::Ambiguous {
                locator: locator.to_string(),
                count: many.len(),
            }),
        }
    }
}
