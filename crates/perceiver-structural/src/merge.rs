//! Joins the structural and accessibility trees of each scope into flat,
//! identity-stable descriptors and assembles them into a [`Snapshot`].

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use locator_core_types::{BackendNodeId, ScopeId, ScopeRef};
use tracing::debug;

use crate::differ::compute_hash;
use crate::identity::identity_hash;
use crate::model::{
    signature, CapturedTree, DescriptorId, ElementDescriptor, RawAxNode, ScopeNode, ScopeTree,
    Snapshot, SnapshotId,
};
use crate::policy::CaptureOptions;

/// Outcome of merging one scope.
#[derive(Debug, Default)]
pub struct MergeOutput {
    pub descriptors: Vec<ElementDescriptor>,
    /// Accessibility nodes without a structural counterpart.
    pub dropped_ax: usize,
}

/// Merges one scope's trees. Descriptor ids start at `base` so several
/// scopes can share one arena.
pub fn merge(
    scope: &ScopeRef,
    tree: &CapturedTree,
    base: usize,
    options: &CaptureOptions,
) -> MergeOutput {
    let known: HashSet<BackendNodeId> = tree.dom.iter().map(|node| node.backend_id).collect();

    let mut ax_index: HashMap<BackendNodeId, &RawAxNode> = HashMap::new();
    let mut dropped_ax = 0usize;
    for node in &tree.ax {
        match node.backend_id {
            Some(id) if known.contains(&id) => {
                if !node.ignored {
                    ax_index.entry(id).or_insert(node);
                }
            }
            _ => dropped_ax += 1,
        }
    }

    let scope_path = scope.path_string();
    // backend id -> (nearest kept descriptor, ancestry handed to its children)
    let mut placement: HashMap<BackendNodeId, (Option<usize>, Vec<String>)> = HashMap::new();
    let mut sibling_counts: HashMap<(Option<usize>, String), usize> = HashMap::new();
    let mut descriptors: Vec<ElementDescriptor> = Vec::with_capacity(tree.dom.len());

    for node in &tree.dom {
        let (parent_local, ancestry) = node
            .parent
            .and_then(|parent| placement.get(&parent).cloned())
            .unwrap_or((None, Vec::new()));

        let tag = node.tag.trim().to_ascii_lowercase();
        let mut attributes = BTreeMap::new();
        for (name, value) in &node.attributes {
            attributes
                .entry(name.trim().to_ascii_lowercase())
                .or_insert_with(|| value.clone());
        }

        if !node.visible && !options.include_invisible {
            placement.insert(node.backend_id, (parent_local, ancestry));
            continue;
        }

        let local = descriptors.len();
        let counter = sibling_counts
            .entry((parent_local, tag.clone()))
            .or_insert(0);
        *counter += 1;
        let nth_of_type = *counter;

        let ax = ax_index.get(&node.backend_id);
        let role = ax
            .and_then(|ax| ax.role.as_deref())
            .filter(|role| !matches!(*role, "" | "generic" | "none" | "presentation"))
            .map(str::to_string)
            .or_else(|| attributes.get("role").cloned())
            .or_else(|| implicit_role(&tag, &attributes).map(str::to_string));
        let name = ax
            .and_then(|ax| ax.name.as_deref())
            .map(collapse_whitespace)
            .filter(|name| !name.is_empty())
            .or_else(|| {
                attributes
                    .get("aria-label")
                    .map(|label| collapse_whitespace(label))
                    .filter(|label| !label.is_empty())
            });

        let mut identity_path = Vec::with_capacity(ancestry.len() + 1);
        identity_path.push(scope_path.clone());
        identity_path.extend(ancestry.iter().cloned());
        let identity = identity_hash(&tag, &attributes, &identity_path);

        let mut child_ancestry = ancestry.clone();
        child_ancestry.push(signature(&tag, attributes.get("id").map(String::as_str)));
        placement.insert(node.backend_id, (Some(local), child_ancestry));

        descriptors.push(ElementDescriptor {
            id: DescriptorId(base + local),
            backend_id: node.backend_id,
            tag,
            text: collapse_whitespace(&node.text),
            role,
            name,
            attributes,
            ancestry,
            parent: parent_local.map(|idx| DescriptorId(base + idx)),
            children: Vec::new(),
            nth_of_type,
            visible: node.visible,
            scope: scope.id.clone(),
            identity_hash: identity,
        });
    }

    for idx in 0..descriptors.len() {
        if let Some(parent) = descriptors[idx].parent {
            let child = descriptors[idx].id;
            descriptors[parent.0 - base].children.push(child);
        }
    }

    if dropped_ax > 0 {
        debug!(
            target: "perceiver.events",
            scope = %scope,
            dropped_ax,
            "structural.merge.unmatched_ax_dropped"
        );
    }

    MergeOutput {
        descriptors,
        dropped_ax,
    }
}

/// Accumulates merged scopes into a single snapshot arena.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    descriptors: Vec<ElementDescriptor>,
    scopes: ScopeTree,
    options: CaptureOptions,
    dropped_ax: usize,
}

impl SnapshotBuilder {
    pub fn new(options: CaptureOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn add_scope(&mut self, scope: ScopeRef, parent: Option<ScopeId>, tree: &CapturedTree) {
        let output = merge(&scope, tree, self.descriptors.len(), &self.options);
        self.dropped_ax += output.dropped_ax;
        self.scopes.push(ScopeNode {
            scope,
            parent,
            descriptor_count: output.descriptors.len(),
        });
        self.descriptors.extend(output.descriptors);
    }

    pub fn with_scope(mut self, scope: ScopeRef, parent: Option<ScopeId>, tree: &CapturedTree) -> Self {
        self.add_scope(scope, parent, tree);
        self
    }

    pub fn dropped_ax(&self) -> usize {
        self.dropped_ax
    }

    pub fn build(self) -> Snapshot {
        let content_hash = compute_hash(&self.descriptors);
        Snapshot {
            id: SnapshotId::new(),
            descriptors: self.descriptors,
            content_hash,
            scopes: self.scopes,
            captured_at: Utc::now(),
        }
    }
}

/// Single-scope convenience: a main-document snapshot from one capture.
pub fn snapshot_from_tree(tree: &CapturedTree) -> Snapshot {
    SnapshotBuilder::new(CaptureOptions::default())
        .with_scope(ScopeRef::main(), None, tree)
        .build()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn implicit_role(tag: &str, attributes: &BTreeMap<String, String>) -> Option<&'static str> {
    let input_type = attributes
        .get("type")
        .map(|ty| ty.to_ascii_lowercase())
        .unwrap_or_default();
    match tag {
        "button" => Some("button"),
        "a" if attributes.contains_key("href") => Some("link"),
        "input" => match input_type.as_str() {
            "submit" | "button" | "reset" | "image" => Some("button"),
            "checkbox" => Some("checkbox"),
            "radio" => Some("radio"),
            "range" => Some("slider"),
            "search" => Some("searchbox"),
            "hidden" => None,
            _ => Some("textbox"),
        },
        "textarea" => Some("textbox"),
        "select" => Some("combobox"),
        "option" => Some("option"),
        "img" => Some("img"),
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Some("heading"),
        "nav" => Some("navigation"),
        "ul" | "ol" => Some("list"),
        "li" => Some("listitem"),
        "table" => Some("table"),
        "dialog" => Some("dialog"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawDomNode;

    fn login_tree() -> CapturedTree {
        CapturedTree::new(
            vec![
                RawDomNode::new(1, "FORM").attr("id", "login"),
                RawDomNode::new(2, "input")
                    .child_of(1)
                    .attr("name", "email")
                    .attr("type", "email"),
                RawDomNode::new(3, "button")
                    .child_of(1)
                    .text("  Sign \n in ")
                    .attr("id", "a1b2c3")
                    .attr("data-testid", "login-btn"),
                RawDomNode::new(4, "button").child_of(1).text("Cancel"),
            ],
            vec![
                RawAxNode::new(3, "button", "Sign in"),
                RawAxNode::new(99, "button", "Ghost"),
                RawAxNode {
                    backend_id: None,
                    role: Some("StaticText".into()),
                    name: Some("orphan".into()),
                    ignored: false,
                },
            ],
        )
    }

    #[test]
    fn joins_trees_by_backend_id() {
        let output = merge(&ScopeRef::main(), &login_tree(), 0, &CaptureOptions::default());
        assert_eq!(output.descriptors.len(), 4);
        assert_eq!(output.dropped_ax, 2);

        let button = &output.descriptors[2];
        assert_eq!(button.tag, "button");
        assert_eq!(button.text, "Sign in");
        assert_eq!(button.role.as_deref(), Some("button"));
        assert_eq!(button.name.as_deref(), Some("Sign in"));
        assert_eq!(button.parent, Some(DescriptorId(0)));
        assert_eq!(button.ancestry, vec!["form#login".to_string()]);
        assert_eq!(button.nth_of_type, 1);

        // unmatched structural nodes keep empty accessibility fields, apart from implicit roles
        let cancel = &output.descriptors[3];
        assert_eq!(cancel.name, None);
        assert_eq!(cancel.nth_of_type, 2);
        assert_eq!(output.descriptors[1].role.as_deref(), Some("textbox"));
        assert_eq!(output.descriptors[0].children.len(), 3);
    }

    #[test]
    fn ids_are_offset_by_base() {
        let output = merge(&ScopeRef::main(), &login_tree(), 10, &CaptureOptions::default());
        assert_eq!(output.descriptors[0].id, DescriptorId(10));
        assert_eq!(output.descriptors[1].parent, Some(DescriptorId(10)));
    }

    #[test]
    fn invisible_nodes_can_be_skipped() {
        let tree = CapturedTree::new(
            vec![
                RawDomNode::new(1, "div").attr("id", "wrap").hidden(),
                RawDomNode::new(2, "button").child_of(1).text("Go"),
            ],
            vec![],
        );
        let options = CaptureOptions {
            include_invisible: false,
            ..CaptureOptions::default()
        };
        let output = merge(&ScopeRef::main(), &tree, 0, &options);
        assert_eq!(output.descriptors.len(), 1);
        assert_eq!(output.descriptors[0].parent, None);
        assert!(output.descriptors[0].ancestry.is_empty());
    }

    #[test]
    fn builder_assigns_every_descriptor_one_scope() {
        let main = ScopeRef::main();
        let frame = main.child(ScopeId::new("payment"), locator_core_types::ScopeKind::Frame);
        let snapshot = SnapshotBuilder::new(CaptureOptions::default())
            .with_scope(main.clone(), None, &login_tree())
            .with_scope(frame.clone(), Some(main.id.clone()), &login_tree())
            .build();

        assert_eq!(snapshot.len(), 8);
        assert_eq!(snapshot.scopes.len(), 2);
        assert_eq!(snapshot.in_scope(&frame.id).count(), 4);
        for (idx, descriptor) in snapshot.descriptors.iter().enumerate() {
            assert_eq!(descriptor.id, DescriptorId(idx));
            assert!(snapshot.scopes.contains(&descriptor.scope));
        }
        // same markup, different scope => different identity
        assert_ne!(
            snapshot.descriptors[2].identity_hash,
            snapshot.descriptors[6].identity_hash
        );
    }
}
