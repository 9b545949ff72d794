//! Contradiction penalties
//!
//! A candidate is penalised when its surroundings name a sibling entity of
//! the one the query asks for (`form1` when the query says `form2`), or when
//! it sits outside the scope the query names. Each kind fires at most once.

use std::collections::BTreeSet;

use embedding_cache::tokenize;
use perceiver_structural::stability::is_volatile_value;
use perceiver_structural::{ElementDescriptor, Snapshot};
use serde::{Deserialize, Serialize};

use crate::query::{entity_parts, QueryProfile};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyConfig {
    pub entity_conflict: f32,
    pub scope_conflict: f32,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            entity_conflict: 0.35,
            scope_conflict: 0.5,
        }
    }
}

impl PenaltyConfig {
    pub fn is_valid(&self) -> bool {
        [self.entity_conflict, self.scope_conflict]
            .iter()
            .all(|p| p.is_finite() && *p >= 0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PenaltyBreakdown {
    pub total: f32,
    pub reasons: Vec<String>,
}

pub fn penalty(
    profile: &QueryProfile,
    descriptor: &ElementDescriptor,
    snapshot: &Snapshot,
    config: &PenaltyConfig,
) -> PenaltyBreakdown {
    let mut out = PenaltyBreakdown::default();

    if !profile.entities.is_empty() {
        let context = context_tokens(descriptor, snapshot);
        let conflict = profile.entities.iter().find_map(|entity| {
            let (stem, suffix) = entity_parts(entity)?;
            if context.contains(entity) {
                return None;
            }
            context.iter().find(|token| {
                entity_parts(token)
                    .map(|(other_stem, other_suffix)| other_stem == stem && other_suffix != suffix)
                    .unwrap_or(false)
            })
            .map(|found| (entity.clone(), found.clone()))
        });
        if let Some((wanted, found)) = conflict {
            out.total += config.entity_conflict;
            out.reasons
                .push(format!("entity conflict: found '{found}' where query names '{wanted}'"));
        }
    }

    if let Some(hint) = &profile.scope_hint {
        if &descriptor.scope != hint {
            out.total += config.scope_conflict;
            out.reasons.push(format!(
                "scope conflict: element in '{}', query names '{hint}'",
                descriptor.scope
            ));
        }
    }

    out
}

/// Tokens from the element's own identifying values, its ancestry and its
/// parent's identifying attributes.
fn context_tokens(descriptor: &ElementDescriptor, snapshot: &Snapshot) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    push_identifying(descriptor, &mut tokens);
    tokens.extend(tokenize(&descriptor.text));
    for signature in &descriptor.ancestry {
        tokens.extend(tokenize(signature));
    }
    if let Some(parent) = descriptor.parent.and_then(|id| snapshot.get(id)) {
        push_identifying(parent, &mut tokens);
    }
    tokens
}

fn push_identifying(descriptor: &ElementDescriptor, tokens: &mut BTreeSet<String>) {
    for attr in ["id", "name", "aria-label"] {
        if let Some(value) = descriptor.attr(attr) {
            if !is_volatile_value(value) {
                tokens.extend(tokenize(value));
            }
        }
    }
    if let Some((_, value)) = descriptor.test_id() {
        tokens.extend(tokenize(value));
    }
}
