//! Locator synthesis
//!
//! Candidate locators for one descriptor, most stable first:
//! test-id, accessible name, stable id, `name` attribute, meaningful class
//! combination, literal text, and finally a structural path anchored on the
//! nearest stable ancestor. Locators built from auto-generated values are
//! kept but sorted behind every stable one.

use perceiver_structural::stability::{is_volatile_value, meaningful_classes};
use perceiver_structural::{ElementDescriptor, Snapshot};
use serde::{Deserialize, Serialize};

use crate::locator::{AttrSelector, Locator, Step, TextMatch};

/// Longest text embedded literally into a locator.
const MAX_TEXT_LEN: usize = 80;
const MAX_CLASSES: usize = 2;

/// Locator family, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorTier {
    TestId,
    AccessibleName,
    StableId,
    NameAttr,
    ClassCombo,
    Text,
    StructuralPath,
}

impl LocatorTier {
    /// Get tier name as string
    pub fn name(&self) -> &'static str {
        match self {
            LocatorTier::TestId => "test-id",
            LocatorTier::AccessibleName => "accessible-name",
            LocatorTier::StableId => "id",
            LocatorTier::NameAttr => "name-attr",
            LocatorTier::ClassCombo => "class",
            LocatorTier::Text => "text",
            LocatorTier::StructuralPath => "path",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesizedLocator {
    pub locator: Locator,
    pub rendered: String,
    pub tier: LocatorTier,
    /// Built from a value that looks auto-generated
    pub volatile: bool,
}

impl SynthesizedLocator {
    fn new(locator: Locator, tier: LocatorTier, volatile: bool) -> Self {
        Self {
            rendered: locator.to_string(),
            locator,
            tier,
            volatile,
        }
    }

    fn sort_key(&self) -> (bool, bool, LocatorTier) {
        (self.tier == LocatorTier::StructuralPath, self.volatile, self.tier)
    }
}

/// Ordered candidate locators for `descriptor`. Never empty: the structural
/// path is always available.
pub fn synthesize(descriptor: &ElementDescriptor, snapshot: &Snapshot) -> Vec<SynthesizedLocator> {
    let tag = descriptor.tag.as_str();
    let mut out = Vec::new();

    if let Some((attr, value)) = descriptor.test_id() {
        let step = Step {
            attrs: vec![AttrSelector::equals(attr, value)],
            ..Step::default()
        };
        out.push(SynthesizedLocator::new(
            Locator::single(step),
            LocatorTier::TestId,
            is_volatile_value(value),
        ));
    }

    if let (Some(role), Some(name)) = (descriptor.role.as_deref(), descriptor.name.as_deref()) {
        if !name.is_empty() && name.chars().count() <= MAX_TEXT_LEN {
            out.push(SynthesizedLocator::new(
                Locator::role(role, Some(TextMatch::Exact(name.to_string()))),
                LocatorTier::AccessibleName,
                false,
            ));
        }
    }
    if let Some(label) = non_empty(descriptor.attr("aria-label")) {
        let step = Step {
            tag: Some(tag.to_string()),
            attrs: vec![AttrSelector::equals("aria-label", label)],
            ..Step::default()
        };
        out.push(SynthesizedLocator::new(
            Locator::single(step),
            LocatorTier::AccessibleName,
            false,
        ));
    }

    if let Some(id) = non_empty(descriptor.attr("id")) {
        let step = Step {
            id: Some(id.to_string()),
            ..Step::default()
        };
        out.push(SynthesizedLocator::new(
            Locator::single(step),
            LocatorTier::StableId,
            is_volatile_value(id),
        ));
    }

    if let Some(name) = non_empty(descriptor.attr("name")) {
        let step = Step {
            tag: Some(tag.to_string()),
            attrs: vec![AttrSelector::equals("name", name)],
            ..Step::default()
        };
        out.push(SynthesizedLocator::new(
            Locator::single(step),
            LocatorTier::NameAttr,
            is_volatile_value(name),
        ));
    }

    let classes = descriptor.classes();
    if !classes.is_empty() {
        let meaningful = meaningful_classes(&classes);
        let (picked, volatile) = if meaningful.is_empty() {
            (vec![classes[0]], true)
        } else {
            (meaningful.into_iter().take(MAX_CLASSES).collect(), false)
        };
        let step = Step {
            tag: Some(tag.to_string()),
            classes: picked.into_iter().map(str::to_string).collect(),
            ..Step::default()
        };
        out.push(SynthesizedLocator::new(
            Locator::single(step),
            LocatorTier::ClassCombo,
            volatile,
        ));
    }

    let text = descriptor.text.trim();
    if !text.is_empty() && text.chars().count() <= MAX_TEXT_LEN {
        let step = Step {
            tag: Some(tag.to_string()),
            text: Some(TextMatch::Exact(text.to_string())),
            ..Step::default()
        };
        out.push(SynthesizedLocator::new(
            Locator::single(step),
            LocatorTier::Text,
            false,
        ));
    }

    out.push(structural_path(descriptor, snapshot));

    out.sort_by_key(|candidate| candidate.sort_key());
    let mut seen = std::collections::HashSet::new();
    out.retain(|candidate| seen.insert(candidate.rendered.clone()));
    out
}

/// `anchor > tag:nth-of-type(n) > ...` from the nearest ancestor carrying a
/// stable test-id or id, else `:scope > ...` from the scope root.
fn structural_path(descriptor: &ElementDescriptor, snapshot: &Snapshot) -> SynthesizedLocator {
    let ancestors = snapshot.ancestors(descriptor.id);
    let mut steps = vec![positional_step(descriptor)];
    for ancestor in &ancestors {
        if let Some(anchor) = stable_anchor(ancestor) {
            steps.push(anchor);
            steps.reverse();
            return SynthesizedLocator::new(Locator::Css(steps), LocatorTier::StructuralPath, false);
        }
        steps.push(positional_step(ancestor));
    }
    steps.push(Step::scope_root());
    steps.reverse();
    SynthesizedLocator::new(Locator::Css(steps), LocatorTier::StructuralPath, false)
}

fn positional_step(descriptor: &ElementDescriptor) -> Step {
    Step {
        tag: Some(descriptor.tag.clone()),
        nth_of_type: Some(descriptor.nth_of_type),
        ..Step::default()
    }
}

fn stable_anchor(descriptor: &ElementDescriptor) -> Option<Step> {
    if let Some((attr, value)) = descriptor.test_id() {
        if !is_volatile_value(value) {
            return Some(Step {
                tag: Some(descriptor.tag.clone()),
                attrs: vec![AttrSelector::equals(attr, value)],
                ..Step::default()
            });
        }
    }
    let id = non_empty(descriptor.attr("id"))?;
    if is_volatile_value(id) {
        return None;
    }
    Some(Step {
        tag: Some(descriptor.tag.clone()),
        id: Some(id.to_string()),
        ..Step::default()
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
