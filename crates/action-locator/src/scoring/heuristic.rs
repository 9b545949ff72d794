//! Rule-based relevance of a descriptor to the query

use std::collections::BTreeSet;

use embedding_cache::tokenize;
use locator_core_types::normalize_text;
use perceiver_structural::stability::{is_meaningful_class, is_volatile_value};
use perceiver_structural::ElementDescriptor;
use serde::{Deserialize, Serialize};

use crate::intent::ActionKind;
use crate::query::QueryProfile;

/// Attributes whose values an author picks to describe the element.
const DESCRIPTIVE_ATTRS: &[&str] = &["id", "name", "placeholder", "title", "alt", "aria-label"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicWeights {
    pub text: f32,
    pub attributes: f32,
    pub affordance: f32,
    pub stable: f32,
    pub visibility: f32,
}

impl Default for HeuristicWeights {
    fn default() -> Self {
        Self {
            text: 0.35,
            attributes: 0.2,
            affordance: 0.2,
            stable: 0.1,
            visibility: 0.15,
        }
    }
}

impl HeuristicWeights {
    pub fn total(&self) -> f32 {
        self.text + self.attributes + self.affordance + self.stable + self.visibility
    }

    pub fn is_valid(&self) -> bool {
        [self.text, self.attributes, self.affordance, self.stable, self.visibility]
            .iter()
            .all(|w| w.is_finite() && *w >= 0.0)
    }
}

/// Per-term values, each in [0, 1], and their weighted mean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HeuristicBreakdown {
    pub text: f32,
    pub attributes: f32,
    pub affordance: f32,
    pub stable: f32,
    pub visibility: f32,
    pub score: f32,
}

pub fn heuristic_score(
    profile: &QueryProfile,
    descriptor: &ElementDescriptor,
    weights: &HeuristicWeights,
) -> HeuristicBreakdown {
    let mut text_tokens: BTreeSet<String> = tokenize(&descriptor.text).into_iter().collect();
    if let Some(name) = descriptor.name.as_deref() {
        text_tokens.extend(tokenize(name));
    }
    let attr_tokens = attribute_tokens(descriptor);

    let query_len = profile.tokens.len().max(1) as f32;
    let phrase = profile.tokens.join(" ");
    let exact = !phrase.is_empty() && normalize_text(descriptor.label()) == phrase;

    let mut text_hits = 0usize;
    let mut attr_hits = 0usize;
    for token in &profile.tokens {
        if text_tokens.contains(token) {
            text_hits += 1;
        } else if attr_tokens.contains(token) {
            attr_hits += 1;
        }
    }

    let text = if exact { 1.0 } else { text_hits as f32 / query_len };
    let attributes = if exact { 0.0 } else { attr_hits as f32 / query_len };
    let affordance = affordance(profile, descriptor);
    let stable = stability(descriptor);
    let visibility = if descriptor.visible { 1.0 } else { 0.0 };

    let total = weights.total();
    let score = if total <= f32::EPSILON {
        0.0
    } else {
        (weights.text * text
            + weights.attributes * attributes
            + weights.affordance * affordance
            + weights.stable * stable
            + weights.visibility * visibility)
            / total
    };

    HeuristicBreakdown {
        text,
        attributes,
        affordance,
        stable,
        visibility,
        score: score.clamp(0.0, 1.0),
    }
}

fn attribute_tokens(descriptor: &ElementDescriptor) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    for attr in DESCRIPTIVE_ATTRS {
        if let Some(value) = descriptor.attr(attr) {
            if !is_volatile_value(value) {
                tokens.extend(tokenize(value));
            }
        }
    }
    if let Some((_, value)) = descriptor.test_id() {
        tokens.extend(tokenize(value));
    }
    tokens
}

/// How well the element's kind fits the action and the kind words in the query.
fn affordance(profile: &QueryProfile, descriptor: &ElementDescriptor) -> f32 {
    let tag = descriptor.tag.to_ascii_lowercase();
    let role = descriptor
        .role
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let input_type = descriptor
        .attr("type")
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let action = match profile.action {
        ActionKind::Click => match tag.as_str() {
            "button" => 1.0,
            "input" if matches!(input_type.as_str(), "submit" | "button" | "reset" | "image") => 1.0,
            "a" => 0.9,
            _ if matches!(role.as_str(), "button" | "link" | "menuitem" | "tab" | "option") => 0.9,
            "summary" => 0.7,
            "label" => 0.5,
            _ => 0.2,
        },
        ActionKind::Type => {
            let editable = descriptor.attr("contenteditable").is_some();
            match tag.as_str() {
                "input" if !matches!(input_type.as_str(), "submit" | "button" | "checkbox" | "radio" | "hidden") => 1.0,
                "textarea" => 1.0,
                _ if matches!(role.as_str(), "textbox" | "searchbox" | "combobox") => 1.0,
                _ if editable => 0.8,
                _ => 0.1,
            }
        }
        ActionKind::Select => match tag.as_str() {
            "select" => 1.0,
            _ if matches!(role.as_str(), "combobox" | "listbox") => 1.0,
            "option" => 0.8,
            _ if role == "option" => 0.8,
            _ => 0.2,
        },
        ActionKind::Check => {
            if matches!(input_type.as_str(), "checkbox" | "radio")
                || matches!(role.as_str(), "checkbox" | "radio" | "switch")
            {
                1.0
            } else {
                0.1
            }
        }
        ActionKind::Hover => match tag.as_str() {
            "a" | "button" => 0.7,
            _ => 0.5,
        },
        ActionKind::Unknown => 0.5,
    };

    let named = profile
        .kind_targets()
        .any(|target| target == tag || target == role);
    if named {
        1.0
    } else {
        action
    }
}

fn stability(descriptor: &ElementDescriptor) -> f32 {
    let stable_attr = descriptor
        .test_id()
        .map(|(_, value)| value)
        .into_iter()
        .chain(["id", "aria-label", "name"].iter().filter_map(|attr| descriptor.attr(attr)))
        .any(|value| !value.trim().is_empty() && !is_volatile_value(value));
    if stable_attr {
        1.0
    } else if descriptor.classes().iter().any(|class| is_meaningful_class(class)) {
        0.5
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::Intent;
    use perceiver_structural::{snapshot_from_tree, CapturedTree, RawDomNode};

    fn profile(action: ActionKind, target: &str) -> QueryProfile {
        let snapshot = snapshot_from_tree(&CapturedTree::default());
        QueryProfile::build(
            &Intent {
                action,
                target: target.into(),
                value: None,
            },
            &snapshot,
        )
    }

    fn descriptor(node: RawDomNode) -> ElementDescriptor {
        let snapshot = snapshot_from_tree(&CapturedTree::new(vec![node], vec![]));
        snapshot.descriptors[0].clone()
    }

    #[test]
    fn attribute_tokens_complement_text() {
        let query = profile(ActionKind::Click, "form2 submit button");
        let button = descriptor(
            RawDomNode::new(1, "button")
                .text("Submit")
                .attr("id", "form2-submit"),
        );
        let breakdown = heuristic_score(&query, &button, &HeuristicWeights::default());
        assert_eq!(breakdown.text, 0.5);
        assert_eq!(breakdown.attributes, 0.5);
        assert_eq!(breakdown.affordance, 1.0);
        assert_eq!(breakdown.stable, 1.0);
        assert!((breakdown.score - 0.725).abs() < 1e-5);
    }

    #[test]
    fn exact_label_scores_full_text() {
        let query = profile(ActionKind::Click, "Sign in");
        let link = descriptor(RawDomNode::new(1, "a").text("Sign in"));
        let breakdown = heuristic_score(&query, &link, &HeuristicWeights::default());
        assert_eq!(breakdown.text, 1.0);
        assert_eq!(breakdown.affordance, 0.9);
    }

    #[test]
    fn hidden_and_unstable_elements_score_lower() {
        let query = profile(ActionKind::Click, "Save");
        let visible = descriptor(RawDomNode::new(1, "button").text("Save").attr("id", "save"));
        let hidden = descriptor(
            RawDomNode::new(1, "button")
                .text("Save")
                .attr("id", "ember1234")
                .hidden(),
        );
        let weights = HeuristicWeights::default();
        assert!(heuristic_score(&query, &visible, &weights).score > heuristic_score(&query, &hidden, &weights).score);
        assert_eq!(heuristic_score(&query, &hidden, &weights).stable, 0.0);
    }

    #[test]
    fn zero_weights_score_zero() {
        let query = profile(ActionKind::Click, "Save");
        let button = descriptor(RawDomNode::new(1, "button").text("Save"));
        let weights = HeuristicWeights {
            text: 0.0,
            attributes: 0.0,
            affordance: 0.0,
            stable: 0.0,
            visibility: 0.0,
        };
        assert_eq!(heuristic_score(&query, &button, &weights).score, 0.0);
    }
}
