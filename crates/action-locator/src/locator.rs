//! Locator grammar
//!
//! Two engines share one string form:
//!
//! - CSS-like chains of compound steps joined by ` > ` (child combinator).
//!   A step carries an optional tag, `#id`, `.class`, `[attr="v"]`,
//!   `[attr*="v"]`, `:nth-of-type(n)`, `:text-is("t")` and `:has-text("t")`.
//!   A leading `:scope` step pins the chain to the top of the scope.
//! - Role locators: `role=button[name="Sign in"]` or `[name*="Sign"]`.
//!
//! Quoted values use CSS string escaping and `#id`/`.class` use CSS
//! identifier escaping, so arbitrary page text can be embedded safely.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use locator_core_types::{normalize_text, ScopeId};
use perceiver_structural::{ElementDescriptor, Snapshot};
use serde::{Deserialize, Serialize};

use crate::errors::LocatorError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextMatch {
    Exact(String),
    Contains(String),
}

impl TextMatch {
    pub fn value(&self) -> &str {
        match self {
            TextMatch::Exact(value) | TextMatch::Contains(value) => value,
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        let candidate = normalize_text(candidate);
        match self {
            TextMatch::Exact(value) => candidate == normalize_text(value),
            TextMatch::Contains(value) => candidate.contains(&normalize_text(value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrOp {
    Equals,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrSelector {
    pub name: String,
    pub op: AttrOp,
    pub value: String,
}

impl AttrSelector {
    pub fn equals(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: AttrOp::Equals,
            value: value.into(),
        }
    }
}

/// One compound selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// `:scope`: matches only where the next step sits at the top of the scope
    #[serde(default)]
    pub scope_root: bool,
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: Vec<AttrSelector>,
    pub nth_of_type: Option<usize>,
    pub text: Option<TextMatch>,
}

impl Step {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::default()
        }
    }

    pub fn scope_root() -> Self {
        Self {
            scope_root: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.scope_root
            && self.tag.is_none()
            && self.id.is_none()
            && self.classes.is_empty()
            && self.attrs.is_empty()
            && self.nth_of_type.is_none()
            && self.text.is_none()
    }

    pub fn matches(&self, descriptor: &ElementDescriptor) -> bool {
        if let Some(tag) = &self.tag {
            if !tag.eq_ignore_ascii_case(&descriptor.tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if descriptor.attr("id") != Some(id.as_str()) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let classes = descriptor.classes();
            if !self.classes.iter().all(|class| classes.contains(&class.as_str())) {
                return false;
            }
        }
        for attr in &self.attrs {
            let ok = match (descriptor.attr(&attr.name), attr.op) {
                (Some(actual), AttrOp::Equals) => actual == attr.value,
                (Some(actual), AttrOp::Contains) => actual.contains(&attr.value),
                (None, _) => false,
            };
            if !ok {
                return false;
            }
        }
        if let Some(nth) = self.nth_of_type {
            if descriptor.nth_of_type != nth {
                return false;
            }
        }
        if let Some(text) = &self.text {
            if !text.matches(&descriptor.text) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scope_root {
            return f.write_str(":scope");
        }
        match &self.tag {
            Some(tag) => f.write_str(tag)?,
            None if self.id.is_none() && self.classes.is_empty() && self.attrs.is_empty() => {
                f.write_char('*')?
            }
            None => {}
        }
        if let Some(id) = &self.id {
            write!(f, "#{}", escape_ident(id))?;
        }
        for class in &self.classes {
            write!(f, ".{}", escape_ident(class))?;
        }
        for attr in &self.attrs {
            let op = match attr.op {
                AttrOp::Equals => "=",
                AttrOp::Contains => "*=",
            };
            write!(f, "[{}{}{}]", attr.name, op, quote(&attr.value))?;
        }
        if let Some(nth) = self.nth_of_type {
            write!(f, ":nth-of-type({nth})")?;
        }
        match &self.text {
            Some(TextMatch::Exact(text)) => write!(f, ":text-is({})", quote(text))?,
            Some(TextMatch::Contains(text)) => write!(f, ":has-text({})", quote(text))?,
            None => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locator {
    /// Outermost step first; each step is the parent of the next.
    Css(Vec<Step>),
    Role { role: String, name: Option<TextMatch> },
}

impl Locator {
    pub fn single(step: Step) -> Self {
        Locator::Css(vec![step])
    }

    pub fn role(role: impl Into<String>, name: Option<TextMatch>) -> Self {
        Locator::Role {
            role: role.into(),
            name,
        }
    }

    /// Rendered form, used as promotion key.
    pub fn key(&self) -> String {
        self.to_string()
    }

    pub fn last_step(&self) -> Option<&Step> {
        match self {
            Locator::Css(steps) => steps.last(),
            Locator::Role { .. } => None,
        }
    }

    pub fn matches(&self, snapshot: &Snapshot, descriptor: &ElementDescriptor) -> bool {
        match self {
            Locator::Role { role, name } => {
                let role_ok = descriptor
                    .role
                    .as_deref()
                    .map(|actual| actual.eq_ignore_ascii_case(role))
                    .unwrap_or(false);
                role_ok
                    && name
                        .as_ref()
                        .map(|name| name.matches(descriptor.label()))
                        .unwrap_or(true)
            }
            Locator::Css(steps) => {
                let mut current = Some(descriptor);
                for (idx, step) in steps.iter().rev().enumerate() {
                    if step.scope_root {
                        return current.is_none();
                    }
                    let Some(node) = current else {
                        return false;
                    };
                    if !step.matches(node) {
                        return false;
                    }
                    if idx + 1 < steps.len() {
                        current = node
                            .parent
                            .and_then(|parent| snapshot.get(parent))
                            .filter(|parent| parent.scope == descriptor.scope);
                    }
                }
                true
            }
        }
    }

    /// Descriptors matched inside `scope`. Uniqueness is always judged here,
    /// never across the whole snapshot.
    pub fn select<'a>(&self, snapshot: &'a Snapshot, scope: &ScopeId) -> Vec<&'a ElementDescriptor> {
        snapshot
            .descriptors
            .iter()
            .filter(|descriptor| &descriptor.scope == scope && self.matches(snapshot, descriptor))
            .collect()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(steps) => {
                for (idx, step) in steps.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(" > ")?;
                    }
                    write!(f, "{step}")?;
                }
                Ok(())
            }
            Locator::Role { role, name } => {
                write!(f, "role={role}")?;
                match name {
                    Some(TextMatch::Exact(name)) => write!(f, "[name={}]", quote(name)),
                    Some(TextMatch::Contains(name)) => write!(f, "[name*={}]", quote(name)),
                    None => Ok(()),
                }
            }
        }
    }
}

impl FromStr for Locator {
    type Err = LocatorError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser::new(input);
        parser.skip_ws();
        let locator = if parser.rest().starts_with("role=") {
            parser.advance("role=".len());
            parser.parse_role()?
        } else {
            parser.parse_chain()?
        };
        parser.skip_ws();
        if !parser.at_end() {
            return Err(parser.error("trailing input"));
        }
        Ok(locator)
    }
}

/// Parses and re-renders, so equivalent spellings share one key.
pub fn normalize_locator(raw: &str) -> Result<String, LocatorError> {
    raw.parse::<Locator>().map(|locator| locator.key())
}

/// CSS string literal, double-quoted.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => {
                let _ = write!(out, "\\{:x} ", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// CSS identifier escaping, as `CSS.escape` does it.
pub fn escape_ident(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let chars: Vec<char> = value.chars().collect();
    for (idx, &c) in chars.iter().enumerate() {
        let leading_digit =
            c.is_ascii_digit() && (idx == 0 || (idx == 1 && chars[0] == '-'));
        if c == '\0' {
            out.push('\u{FFFD}');
        } else if c.is_control() || leading_digit {
            let _ = write!(out, "\\{:x} ", c as u32);
        } else if idx == 0 && c == '-' && chars.len() == 1 {
            out.push_str("\\-");
        } else if c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii() {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn advance(&mut self, bytes: usize) {
        self.pos = (self.pos + bytes).min(self.input.len());
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), LocatorError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{expected}'")))
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn error(&self, what: &str) -> LocatorError {
        LocatorError::InputInvalid(format!(
            "malformed locator '{}': {what} at offset {}",
            self.input, self.pos
        ))
    }

    fn parse_chain(&mut self) -> Result<Locator, LocatorError> {
        let mut steps = Vec::new();
        loop {
            self.skip_ws();
            let start = self.pos;
            let step = self.parse_step()?;
            if self.pos == start {
                return Err(self.error("empty step"));
            }
            if step.scope_root && !steps.is_empty() {
                return Err(self.error("':scope' must open the chain"));
            }
            steps.push(step);
            self.skip_ws();
            if self.eat('>') {
                continue;
            }
            break;
        }
        if steps.last().map(|step| step.scope_root).unwrap_or(false) {
            return Err(self.error("':scope' needs a target step"));
        }
        Ok(Locator::Css(steps))
    }

    fn parse_step(&mut self) -> Result<Step, LocatorError> {
        if self.rest().starts_with(":scope") {
            self.advance(":scope".len());
            return Ok(Step::scope_root());
        }
        let mut step = Step::default();
        if self.eat('*') {
            // universal selector: no tag constraint
        } else if matches!(self.peek(), Some(c) if c.is_ascii_alphabetic()) {
            step.tag = Some(self.parse_name().to_ascii_lowercase());
        }
        loop {
            match self.peek() {
                Some('#') => {
                    self.bump();
                    step.id = Some(self.parse_ident()?);
                }
                Some('.') => {
                    self.bump();
                    step.classes.push(self.parse_ident()?);
                }
                Some('[') => {
                    self.bump();
                    step.attrs.push(self.parse_attr()?);
                }
                Some(':') => {
                    self.bump();
                    self.parse_pseudo(&mut step)?;
                }
                _ => break,
            }
        }
        Ok(step)
    }

    /// Tag, attribute or pseudo-class name.
    fn parse_name(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            self.bump();
        }
        self.input[start..self.pos].to_string()
    }

    fn parse_ident(&mut self) -> Result<String, LocatorError> {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' {
                self.bump();
                out.push(self.parse_escape()?);
            } else if c.is_alphanumeric() || c == '-' || c == '_' || !c.is_ascii() {
                out.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if out.is_empty() {
            return Err(self.error("expected identifier"));
        }
        Ok(out)
    }

    /// Escape body after a backslash: 1-6 hex digits plus one optional
    /// whitespace, or any single character taken literally.
    fn parse_escape(&mut self) -> Result<char, LocatorError> {
        let start = self.pos;
        while self.pos - start < 6 && matches!(self.peek(), Some(c) if c.is_ascii_hexdigit()) {
            self.bump();
        }
        if self.pos > start {
            let code = u32::from_str_radix(&self.input[start..self.pos], 16)
                .map_err(|_| self.error("bad escape"))?;
            if matches!(self.peek(), Some(c) if c.is_whitespace()) {
                self.bump();
            }
            return Ok(char::from_u32(code).unwrap_or('\u{FFFD}'));
        }
        self.bump().ok_or_else(|| self.error("dangling escape"))
    }

    fn parse_quoted(&mut self) -> Result<String, LocatorError> {
        let quote = match self.peek() {
            Some(c @ ('"' | '\'')) => c,
            _ => return Err(self.error("expected quoted string")),
        };
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => out.push(self.parse_escape()?),
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string")),
            }
        }
    }

    fn parse_attr(&mut self) -> Result<AttrSelector, LocatorError> {
        self.skip_ws();
        let name = self.parse_name();
        if name.is_empty() {
            return Err(self.error("expected attribute name"));
        }
        self.skip_ws();
        let op = if self.eat('*') {
            self.expect('=')?;
            AttrOp::Contains
        } else {
            self.expect('=')?;
            AttrOp::Equals
        };
        self.skip_ws();
        let value = if matches!(self.peek(), Some('"' | '\'')) {
            self.parse_quoted()?
        } else {
            self.parse_ident()?
        };
        self.skip_ws();
        self.expect(']')?;
        Ok(AttrSelector {
            name: name.to_ascii_lowercase(),
            op,
            value,
        })
    }

    fn parse_pseudo(&mut self, step: &mut Step) -> Result<(), LocatorError> {
        let name = self.parse_name();
        self.expect('(')?;
        self.skip_ws();
        match name.as_str() {
            "nth-of-type" => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.bump();
                }
                let nth: usize = self.input[start..self.pos]
                    .parse()
                    .map_err(|_| self.error("expected position"))?;
                if nth == 0 {
                    return Err(self.error("positions are 1-based"));
                }
                step.nth_of_type = Some(nth);
            }
            "text-is" => step.text = Some(TextMatch::Exact(self.parse_quoted()?)),
            "has-text" => step.text = Some(TextMatch::Contains(self.parse_quoted()?)),
            other => return Err(self.error(&format!("unsupported pseudo-class ':{other}'"))),
        }
        self.skip_ws();
        self.expect(')')
    }

    fn parse_role(&mut self) -> Result<Locator, LocatorError> {
        let role = self.parse_name();
        if role.is_empty() {
            return Err(self.error("expected role"));
        }
        let mut name = None;
        if self.eat('[') {
            self.skip_ws();
            if self.parse_name() != "name" {
                return Err(self.error("role locators only filter on name"));
            }
            let contains = self.eat('*');
            self.expect('=')?;
            let value = self.parse_quoted()?;
            self.expect(']')?;
            name = Some(if contains {
                TextMatch::Contains(value)
            } else {
                TextMatch::Exact(value)
            });
        }
        Ok(Locator::Role {
            role: role.to_ascii_lowercase(),
            name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perceiver_structural::{snapshot_from_tree, CapturedTree, RawAxNode, RawDomNode};

    fn parse(raw: &str) -> Locator {
        raw.parse().unwrap()
    }

    #[test]
    fn renders_compound_chain() {
        let locator = Locator::Css(vec![
            Step {
                tag: Some("form".into()),
                id: Some("checkout".into()),
                ..Step::default()
            },
            Step {
                tag: Some("button".into()),
                classes: vec!["btn-primary".into()],
                nth_of_type: Some(2),
                text: Some(TextMatch::Exact("Pay now".into())),
                ..Step::default()
            },
        ]);
        let rendered = locator.to_string();
        assert_eq!(
            rendered,
            "form#checkout > button.btn-primary:nth-of-type(2):text-is(\"Pay now\")"
        );
        assert_eq!(parse(&rendered), locator);
    }

    #[test]
    fn hostile_text_is_escaped() {
        let text = "Say \"hi\" \\ then > leave]";
        let locator = Locator::single(Step {
            tag: Some("button".into()),
            text: Some(TextMatch::Contains(text.into())),
            ..Step::default()
        });
        let parsed = parse(&locator.to_string());
        assert_eq!(parsed.last_step().unwrap().text, Some(TextMatch::Contains(text.into())));
    }

    #[test]
    fn identifiers_with_leading_digits_are_escaped() {
        let step = Step {
            id: Some("1st:item".into()),
            ..Step::default()
        };
        let rendered = Locator::single(step.clone()).to_string();
        assert_eq!(rendered, "#\\31 st\\:item");
        assert_eq!(parse(&rendered), Locator::single(step));
    }

    #[test]
    fn role_locators_parse() {
        assert_eq!(
            parse("role=button[name=\"Sign in\"]"),
            Locator::role("button", Some(TextMatch::Exact("Sign in".into())))
        );
        assert_eq!(
            parse("role=link[name*='Help']").to_string(),
            "role=link[name*=\"Help\"]"
        );
    }

    #[test]
    fn malformed_locators_are_input_errors() {
        for raw in [
            "",
            "button[",
            "div:hover(1)",
            "a >",
            "#",
            "button:nth-of-type(0)",
            "role=[name=\"x\"]",
            ":scope",
            "div > :scope > span",
        ] {
            assert!(
                matches!(raw.parse::<Locator>(), Err(LocatorError::InputInvalid(_))),
                "{raw:?} should not parse"
            );
        }
    }

    #[test]
    fn normalization_unifies_spellings() {
        assert_eq!(
            normalize_locator("  BUTTON[data-testid='go']  ").unwrap(),
            "button[data-testid=\"go\"]"
        );
    }

    #[test]
    fn selects_within_scope_using_child_chain() {
        let snapshot = snapshot_from_tree(&CapturedTree::new(
            vec![
                RawDomNode::new(1, "form").attr("id", "login"),
                RawDomNode::new(2, "button").child_of(1).text("Sign in"),
                RawDomNode::new(3, "div"),
                RawDomNode::new(4, "button").child_of(3).text("Sign in"),
            ],
            vec![RawAxNode::new(2, "button", "Sign in")],
        ));
        let main = ScopeId::main();
        assert_eq!(parse("button:text-is(\"sign in\")").select(&snapshot, &main).len(), 2);
        assert_eq!(parse("form#login > button").select(&snapshot, &main).len(), 1);
        assert_eq!(parse("div > button:has-text(\"Sign\")").select(&snapshot, &main).len(), 1);
        assert_eq!(parse("role=button[name=\"Sign in\"]").select(&snapshot, &main).len(), 2);
        assert!(parse("button").select(&snapshot, &ScopeId::new("payment")).is_empty());
    }

    #[test]
    fn scope_anchor_only_matches_top_level_chains() {
        let snapshot = snapshot_from_tree(&CapturedTree::new(
            vec![
                RawDomNode::new(1, "div"),
                RawDomNode::new(2, "span").child_of(1),
                RawDomNode::new(3, "div"),
                RawDomNode::new(4, "div").child_of(3),
                RawDomNode::new(5, "span").child_of(4),
            ],
            vec![],
        ));
        let main = ScopeId::main();
        let loose = parse("div:nth-of-type(1) > span:nth-of-type(1)");
        assert_eq!(loose.select(&snapshot, &main).len(), 2);

        let anchored = parse(":scope > div:nth-of-type(1) > span:nth-of-type(1)");
        assert_eq!(anchored.to_string(), ":scope > div:nth-of-type(1) > span:nth-of-type(1)");
        let matched = anchored.select(&snapshot, &main);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].backend_id.0, 2);
    }
}
