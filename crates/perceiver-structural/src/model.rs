use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use locator_core_types::{BackendNodeId, ScopeId, ScopeRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::PerceiverError;
use crate::stability::TEST_ID_ATTRS;

/// Structural node as reported by the capture port, in document order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawDomNode {
    pub backend_id: BackendNodeId,
    pub parent: Option<BackendNodeId>,
    pub tag: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attributes: Vec<(String, String)>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl RawDomNode {
    pub fn new(backend_id: u64, tag: impl Into<String>) -> Self {
        Self {
            backend_id: BackendNodeId(backend_id),
            parent: None,
            tag: tag.into(),
            text: String::new(),
            attributes: Vec::new(),
            visible: true,
        }
    }

    pub fn child_of(mut self, parent: u64) -> Self {
        self.parent = Some(BackendNodeId(parent));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// Accessibility node. Only nodes that carry a backend id known to the
/// structural tree survive the merge.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawAxNode {
    pub backend_id: Option<BackendNodeId>,
    pub role: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub ignored: bool,
}

impl RawAxNode {
    pub fn new(backend_id: u64, role: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            backend_id: Some(BackendNodeId(backend_id)),
            role: Some(role.into()),
            name: Some(name.into()),
            ignored: false,
        }
    }
}

/// Both trees captured for one scope.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CapturedTree {
    pub dom: Vec<RawDomNode>,
    pub ax: Vec<RawAxNode>,
}

impl CapturedTree {
    pub fn new(dom: Vec<RawDomNode>, ax: Vec<RawAxNode>) -> Self {
        Self { dom, ax }
    }

    /// Parses a recorded capture (`{"dom": [...], "ax": [...]}`).
    pub fn from_json(raw: &str) -> Result<Self, PerceiverError> {
        serde_json::from_str(raw).map_err(|err| PerceiverError::InvalidTree(err.to_string()))
    }
}

/// Arena index of a descriptor inside its snapshot.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DescriptorId(pub usize);

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub id: DescriptorId,
    pub backend_id: BackendNodeId,
    pub tag: String,
    pub text: String,
    pub role: Option<String>,
    pub name: Option<String>,
    pub attributes: BTreeMap<String, String>,
    /// Ancestor signatures from the scope root down to the parent.
    pub ancestry: Vec<String>,
    pub parent: Option<DescriptorId>,
    pub children: Vec<DescriptorId>,
    /// 1-based position among same-tag siblings.
    pub nth_of_type: usize,
    pub visible: bool,
    pub scope: ScopeId,
    pub identity_hash: String,
}

impl ElementDescriptor {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn classes(&self) -> Vec<&str> {
        self.attr("class")
            .map(|value| value.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// First test-id style attribute present, as `(attribute, value)`.
    pub fn test_id(&self) -> Option<(&'static str, &str)> {
        TEST_ID_ATTRS.iter().find_map(|attr| {
            self.attr(attr)
                .filter(|value| !value.trim().is_empty())
                .map(|value| (*attr, value))
        })
    }

    /// Accessible name, else the rendered text.
    pub fn label(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.text,
        }
    }

    /// Compact signature used in ancestry paths and logs, e.g. `form#checkout`.
    pub fn signature(&self) -> String {
        signature(&self.tag, self.attr("id"))
    }
}

pub(crate) fn signature(tag: &str, id: Option<&str>) -> String {
    match id {
        Some(id) if !id.is_empty() && !crate::stability::is_volatile_value(id) => {
            format!("{tag}#{id}")
        }
        _ => tag.to_string(),
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub String);

impl SnapshotId {
    pub fn new() -> Self {
        SnapshotId(Uuid::new_v4().to_string())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScopeNode {
    pub scope: ScopeRef,
    pub parent: Option<ScopeId>,
    pub descriptor_count: usize,
}

/// Scopes captured into a snapshot, main document first.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScopeTree {
    nodes: Vec<ScopeNode>,
}

impl ScopeTree {
    pub fn push(&mut self, node: ScopeNode) {
        self.nodes.push(node);
    }

    pub fn get(&self, id: &ScopeId) -> Option<&ScopeNode> {
        self.nodes.iter().find(|node| &node.scope.id == id)
    }

    pub fn scope_ref(&self, id: &ScopeId) -> Option<&ScopeRef> {
        self.get(id).map(|node| &node.scope)
    }

    pub fn contains(&self, id: &ScopeId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScopeNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children(&self, id: &ScopeId) -> Vec<&ScopeNode> {
        self.nodes
            .iter()
            .filter(|node| node.parent.as_ref() == Some(id))
            .collect()
    }
}

/// Immutable capture of every scope. Replaced wholesale on re-capture.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub descriptors: Vec<ElementDescriptor>,
    pub content_hash: String,
    pub scopes: ScopeTree,
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn get(&self, id: DescriptorId) -> Option<&ElementDescriptor> {
        self.descriptors.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn in_scope<'a>(
        &'a self,
        scope: &'a ScopeId,
    ) -> impl Iterator<Item = &'a ElementDescriptor> + 'a {
        self.descriptors
            .iter()
            .filter(move |descriptor| &descriptor.scope == scope)
    }

    pub fn ancestors(&self, id: DescriptorId) -> Vec<&ElementDescriptor> {
        let mut chain = Vec::new();
        let mut cursor = self.get(id).and_then(|descriptor| descriptor.parent);
        while let Some(parent_id) = cursor {
            match self.get(parent_id) {
                Some(parent) => {
                    chain.push(parent);
                    cursor = parent.parent;
                }
                None => break,
            }
        }
        chain
    }

    pub fn scope_of(&self, descriptor: &ElementDescriptor) -> Option<&ScopeRef> {
        self.scopes.scope_ref(&descriptor.scope)
    }
}
