//! Query-side features shared by every scorer

use std::collections::BTreeSet;

use embedding_cache::tokenize;
use locator_core_types::ScopeId;
use once_cell::sync::Lazy;
use perceiver_structural::Snapshot;
use regex::Regex;
use serde::Serialize;

use crate::intent::{ActionKind, Intent};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "at", "by", "for", "from", "in", "inside", "into", "of", "on", "or",
    "please", "the", "this", "that", "to", "with", "within",
];

/// Words naming the kind of element rather than its content.
const KIND_WORDS: &[(&str, &[&str])] = &[
    ("button", &["button"]),
    ("btn", &["button"]),
    ("link", &["a", "link"]),
    ("field", &["input", "textarea", "textbox", "searchbox", "combobox"]),
    ("input", &["input", "textbox"]),
    ("textbox", &["input", "textarea", "textbox"]),
    ("box", &["input", "textarea", "textbox", "checkbox"]),
    ("checkbox", &["checkbox"]),
    ("dropdown", &["select", "combobox", "listbox"]),
    ("menu", &["menu", "menuitem", "select"]),
    ("tab", &["tab"]),
    ("image", &["img"]),
    ("heading", &["heading", "h1", "h2", "h3"]),
];

const SCOPE_WORDS: &[&str] = &["frame", "iframe", "shadow", "widget", "section"];

/// `form2`, `step3`, `item12`: an alphabetic stem followed by digits.
static ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z]+)(\d+)$").expect("valid entity regex"));

/// Stem and suffix of an entity-like token.
pub fn entity_parts(token: &str) -> Option<(&str, &str)> {
    let captures = ENTITY.captures(token)?;
    let stem = captures.get(1)?.as_str();
    let suffix = captures.get(2)?.as_str();
    Some((stem, suffix))
}

/// Content tokens of a phrase: lowercased, stopwords removed.
pub fn content_tokens(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|token| !STOPWORDS.contains(&token.as_str()))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryProfile {
    pub action: ActionKind,
    /// Target phrase as parsed
    pub target: String,
    /// Content tokens used for text and attribute matching
    pub tokens: Vec<String>,
    /// Element kinds the query names (`button`, `link`, ...)
    pub kinds: Vec<String>,
    /// Entity-like tokens (`form2`) checked for conflicts
    pub entities: Vec<String>,
    /// Scope the query names, when one of the snapshot's scopes is mentioned
    pub scope_hint: Option<ScopeId>,
}

impl QueryProfile {
    pub fn build(intent: &Intent, snapshot: &Snapshot) -> Self {
        let raw = content_tokens(&intent.target);
        let raw_set: BTreeSet<&str> = raw.iter().map(String::as_str).collect();

        let scope_hint = snapshot
            .scopes
            .iter()
            .filter(|node| !node.scope.id.is_main())
            .filter_map(|node| {
                let scope_tokens = tokenize(node.scope.id.as_str());
                let named = !scope_tokens.is_empty()
                    && scope_tokens.iter().all(|t| raw_set.contains(t.as_str()));
                named.then(|| (scope_tokens.len(), node.scope.id.clone()))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, id)| id);

        let scope_tokens: BTreeSet<String> = scope_hint
            .as_ref()
            .map(|id| tokenize(id.as_str()).into_iter().collect())
            .unwrap_or_default();

        let mut tokens = Vec::new();
        let mut kinds = Vec::new();
        for token in raw {
            if KIND_WORDS.iter().any(|(word, _)| *word == token) {
                kinds.push(token);
                continue;
            }
            if scope_hint.is_some()
                && (scope_tokens.contains(&token) || SCOPE_WORDS.contains(&token.as_str()))
            {
                continue;
            }
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        // a phrase made only of kind words ("click the button") still matches on them
        if tokens.is_empty() && !kinds.is_empty() {
            tokens = kinds.clone();
        }

        let entities = tokens
            .iter()
            .filter(|token| entity_parts(token).is_some())
            .cloned()
            .collect();

        Self {
            action: intent.action,
            target: intent.target.clone(),
            tokens,
            kinds,
            entities,
            scope_hint,
        }
    }

    /// Text embedded for the semantic signal.
    pub fn embedding_text(&self) -> String {
        if self.tokens.is_empty() {
            self.target.clone()
        } else {
            self.tokens.join(" ")
        }
    }

    /// Tags and roles the query's kind words point at.
    pub fn kind_targets(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kinds.iter().flat_map(|kind| {
            KIND_WORDS
                .iter()
                .filter(move |(word, _)| *word == kind.as_str())
                .flat_map(|(_, targets)| targets.iter().copied())
        })
    }
}
